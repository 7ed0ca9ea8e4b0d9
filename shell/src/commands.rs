// commands.rs - コマンドの解釈と実行
//
// ## コマンド
//
// - info: ボリュームのレイアウトを表示
// - ls: カレントディレクトリの一覧
// - cd <dir>: カレントディレクトリを変更
// - mkdir <dir> / creat <file>: 作成
// - rm <file> / rmdir <dir>: 削除
// - mv <src> <dest>: リネーム、またはディレクトリへ移動
// - open <file> <-r|-w|-rw|-wr> / close <file> / lsof
// - lseek <file> <offset> / read <file> <size> / write <file> <string>
// - help / exit

use std::io::{self, Write};

use imgfs_fat32::{BlockDevice, FsError, MoveOutcome, Session};
use thiserror::Error;

/// コマンド実行後にシェルを続けるか
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("'{0}' is not a valid number")]
    BadNumber(String),
    #[error("unknown command '{0}', type 'help' for available commands")]
    Unknown(String),
    #[error(transparent)]
    Fs(#[from] FsError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// 1 行分のトークンを実行する。エラーは `out` に表示して続行する
pub fn execute<D: BlockDevice>(session: &mut Session<D>, tokens: &[String], out: &mut impl Write) -> Flow {
    let Some((cmd, args)) = tokens.split_first() else {
        return Flow::Continue;
    };
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    match run(session, cmd, &args, out) {
        Ok(flow) => flow,
        Err(e) => {
            log::debug!("command '{cmd}' failed: {e:?}");
            let _ = writeln!(out, "Error: {e}");
            Flow::Continue
        }
    }
}

fn run<D: BlockDevice>(
    session: &mut Session<D>,
    cmd: &str,
    args: &[&str],
    out: &mut impl Write,
) -> Result<Flow, CommandError> {
    match (cmd, args) {
        ("exit", []) => return Ok(Flow::Exit),
        ("help", []) => cmd_help(out)?,
        ("info", []) => writeln!(out, "{}", session.info())?,
        ("ls", []) => cmd_ls(session, out)?,
        ("cd", [name]) => session.cd(name)?,
        ("mkdir", [name]) => session.mkdir(name)?,
        ("creat", [name]) => session.creat(name)?,
        ("rm", [name]) => session.rm(name)?,
        ("rmdir", [name]) => session.rmdir(name)?,
        ("mv", [src, dest]) => cmd_mv(session, src, dest, out)?,
        ("open", [name, flag]) => {
            let id = session.open(name, flag)?;
            writeln!(out, "opened {} as handle {}", name, id.0)?;
        }
        ("close", [name]) => session.close(name)?,
        ("lsof", []) => cmd_lsof(session, out)?,
        ("lseek", [name, offset]) => session.lseek(name, parse_number(offset)?)?,
        ("read", [name, size]) => {
            let data = session.read(name, parse_number(size)?)?;
            writeln!(out, "{}", String::from_utf8_lossy(&data))?;
        }
        ("write", [name, rest @ ..]) if !rest.is_empty() => {
            let text = rest.join(" ");
            session.write(name, text.as_bytes())?;
        }
        _ => return Err(usage_of(cmd).map_or_else(|| CommandError::Unknown(cmd.to_string()), CommandError::Usage)),
    }
    Ok(Flow::Continue)
}

fn usage_of(cmd: &str) -> Option<&'static str> {
    let usage = match cmd {
        "exit" => "exit",
        "help" => "help",
        "info" => "info",
        "ls" => "ls",
        "cd" => "cd <dir>",
        "mkdir" => "mkdir <dir>",
        "creat" => "creat <file>",
        "rm" => "rm <file>",
        "rmdir" => "rmdir <dir>",
        "mv" => "mv <src> <dest>",
        "open" => "open <file> <-r|-w|-rw|-wr>",
        "close" => "close <file>",
        "lsof" => "lsof",
        "lseek" => "lseek <file> <offset>",
        "read" => "read <file> <size>",
        "write" => "write <file> <string>",
        _ => return None,
    };
    Some(usage)
}

fn parse_number(s: &str) -> Result<u32, CommandError> {
    s.parse().map_err(|_| CommandError::BadNumber(s.to_string()))
}

/// help コマンド: ヘルプを表示
fn cmd_help(out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "Available commands:")?;
    for cmd in [
        "info", "ls", "cd", "mkdir", "creat", "rm", "rmdir", "mv", "open", "close", "lsof", "lseek",
        "read", "write", "exit",
    ] {
        if let Some(usage) = usage_of(cmd) {
            writeln!(out, "  {usage}")?;
        }
    }
    Ok(())
}

/// ls コマンド: ディスク上の順に 1 行 1 エントリ
fn cmd_ls<D: BlockDevice>(session: &mut Session<D>, out: &mut impl Write) -> Result<(), CommandError> {
    for entry in session.ls()? {
        if entry.is_directory() {
            writeln!(out, "{}/", entry.display_name())?;
        } else {
            writeln!(out, "{:<12} {:>10}", entry.display_name(), entry.size)?;
        }
    }
    Ok(())
}

fn cmd_mv<D: BlockDevice>(
    session: &mut Session<D>,
    src: &str,
    dest: &str,
    out: &mut impl Write,
) -> Result<(), CommandError> {
    match session.mv(src, dest)? {
        MoveOutcome::Renamed => {}
        MoveOutcome::MovedInto { .. } => writeln!(out, "moved {src} into {dest}")?,
    }
    Ok(())
}

/// lsof コマンド: 開いているファイルの一覧
fn cmd_lsof<D: BlockDevice>(session: &Session<D>, out: &mut impl Write) -> io::Result<()> {
    let mut any = false;
    for (id, handle) in session.lsof() {
        if !any {
            writeln!(out, "{:<6}{:<13}{:<5}{:<8}PATH", "INDEX", "NAME", "MODE", "OFFSET")?;
            any = true;
        }
        writeln!(
            out,
            "{:<6}{:<13}{:<5}{:<8}{}",
            id.0,
            handle.name(),
            handle.mode.label(),
            handle.offset,
            handle.path
        )?;
    }
    if !any {
        writeln!(out, "No files are currently open.")?;
    }
    Ok(())
}

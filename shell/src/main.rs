// main.rs - imgfs: FAT32 イメージファイルを操作する対話シェル
//
// 使い方: imgfs <fat32_image>
//
// プロンプトは "<イメージ名><カレントディレクトリ>> "。
// exit または EOF で、開いているファイルを閉じてアンマウントする。
// ログレベルは環境変数 IMGFS_LOG（error|warn|info|debug|trace|off、既定は warn）。

mod commands;
mod logger;
mod tokenize;

use std::io::{self, BufRead, Write};
use std::process::ExitCode;

use imgfs_fat32::Session;

use crate::commands::Flow;

fn main() -> ExitCode {
    logger::init(logger::parse_level(std::env::var(logger::LOG_ENV).ok().as_deref()));

    let args: Vec<String> = std::env::args().collect();
    let [_, image] = args.as_slice() else {
        let program = args.first().map_or("imgfs", String::as_str);
        eprintln!("usage: {program} <fat32_image>");
        return ExitCode::FAILURE;
    };

    let mut session = match Session::mount(image) {
        Ok(session) => session,
        Err(e) if e.is_fatal() => {
            eprintln!("Error: cannot mount '{image}': {e}");
            if let Some(source) = std::error::Error::source(&e) {
                eprintln!("  caused by: {source}");
            }
            return ExitCode::FAILURE;
        }
        Err(e) => {
            log::error!("device error while mounting '{image}': {e:?}");
            eprintln!("Error: {e}");
            if let Some(source) = std::error::Error::source(&e) {
                eprintln!("  caused by: {source}");
            }
            return ExitCode::FAILURE;
        }
    };
    log::info!("Shell started");

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut line = String::new();
    loop {
        let cwd = session.cwd();
        let prompt = format!("{}{}> ", session.image_name(), cwd);
        let _ = stdout.write_all(prompt.as_bytes());
        let _ = stdout.flush();

        line.clear();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => {
                // EOF
                let _ = writeln!(stdout);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                log::error!("cannot read input: {e}");
                break;
            }
        }

        let tokens = tokenize::tokenize(&line);
        if commands::execute(&mut session, &tokens, &mut stdout) == Flow::Exit {
            break;
        }
    }

    session.unmount();
    ExitCode::SUCCESS
}

// error.rs - FAT32 操作のエラー型
//
// マウント失敗だけがセッション全体を止める。それ以外は呼び出し元に返して
// シェルは続行する。

use std::io;
use std::path::PathBuf;

use imgfs_blockdev::BlockError;
use thiserror::Error;

pub type Result<T> = core::result::Result<T, FsError>;

#[derive(Debug, Error)]
pub enum FsError {
    /// イメージファイルが開けない（マウント失敗）
    #[error("cannot open image file '{}'", path.display())]
    ImageOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// ブートセクタが読めない、または壊れている（マウント失敗）
    #[error("cannot read boot sector: {0}")]
    BootSector(&'static str),
    /// アンマウント後に操作しようとした
    #[error("volume is not mounted")]
    NotMounted,
    #[error("'{0}': name must be 1-11 characters")]
    NameTooLong(String),
    /// "." や ".." など、実体のあるエントリ名として使えない名前
    #[error("'{0}' is not a valid name here")]
    InvalidName(String),
    #[error("directory/file '{0}' already exists")]
    AlreadyExists(String),
    #[error("directory is full, cannot create '{0}'")]
    DirectoryFull(String),
    #[error("no free clusters available")]
    NoFreeClusters,
    #[error("'{0}' does not exist")]
    NotFound(String),
    #[error("'{0}' is not a directory")]
    NotADirectory(String),
    #[error("'{0}' is a directory")]
    IsADirectory(String),
    #[error("directory '{0}' is not empty")]
    DirectoryNotEmpty(String),
    #[error("'{0}' is currently open")]
    FileIsOpen(String),
    #[error("'{0}' is not open in a mode that allows this")]
    NotOpenOrWrongMode(String),
    #[error("offset {offset} is larger than the size of '{name}' ({size} bytes)")]
    OffsetExceedsSize { name: String, offset: u32, size: u32 },
    #[error("'{0}' is already open")]
    AlreadyOpen(String),
    #[error("too many open files (limit {0})")]
    TooManyOpenFiles(usize),
    #[error("'{0}' is not open")]
    NotOpen(String),
    #[error("invalid open mode '{0}' (use -r, -w, -rw or -wr)")]
    InvalidMode(String),
    #[error(transparent)]
    Device(#[from] BlockError),
}

impl FsError {
    /// セッションを続けられないエラーか
    pub fn is_fatal(&self) -> bool {
        matches!(self, FsError::ImageOpen { .. } | FsError::BootSector(_))
    }
}

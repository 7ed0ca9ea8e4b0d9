// lib.rs - FAT32 イメージファイル上のファイルシステム操作
//
// Volume<D: BlockDevice> が FAT・ディレクトリ・ファイルデータ操作をまとめて持ち、
// Session がそれにオープンファイルテーブルを加えてシェルのコマンドを提供する。

mod cluster;
mod dir;
mod error;
mod fat;
mod file_io;
mod image;
mod open_files;
mod path;
mod session;
mod volume;

#[cfg(test)]
mod test_image;

pub use dir::{EntryKind, EntryLocation, FoundEntry, MoveOutcome, SlotScan, MAX_NAME_LEN};
pub use error::{FsError, Result};
pub use image::ImageFile;
pub use open_files::{HandleId, OpenFileHandle, OpenFileTable, OpenMode, MAX_OPEN_FILES};
pub use session::Session;
pub use volume::{Volume, VolumeInfo};

pub use imgfs_blockdev::{BlockDevice, BlockError, MemDevice};
pub use imgfs_fat_core::{build_short_name, short_name_to_string, BootSector, DirEntry, FatLink};

// image.rs - ディスクイメージファイルを BlockDevice として扱う

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use imgfs_blockdev::{BlockDevice, BlockError};

/// 読み書きモードで開いたイメージファイル
#[derive(Debug)]
pub struct ImageFile {
    file: File,
}

impl ImageFile {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self { file })
    }
}

fn map_io(op: &str, offset: u64, err: io::Error) -> BlockError {
    log::warn!("image {op} at offset {offset:#x} failed: {err}");
    if err.kind() == io::ErrorKind::UnexpectedEof {
        BlockError::OutOfRange
    } else {
        BlockError::Io
    }
}

impl BlockDevice for ImageFile {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), BlockError> {
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| map_io("seek", offset, e))?;
        self.file
            .read_exact(buf)
            .map_err(|e| map_io("read", offset, e))
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<(), BlockError> {
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| map_io("seek", offset, e))?;
        self.file
            .write_all(buf)
            .map_err(|e| map_io("write", offset, e))
    }

    fn flush(&mut self) -> Result<(), BlockError> {
        self.file.flush().map_err(|e| map_io("flush", 0, e))?;
        self.file.sync_data().map_err(|e| map_io("sync", 0, e))
    }
}

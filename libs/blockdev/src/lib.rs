#![cfg_attr(not(test), no_std)]

extern crate alloc;

use alloc::vec::Vec;
use core::fmt;

/// ディスクイメージの抽象インターフェース。
///
/// FAT のフィールドはセクタ境界をまたいで置かれることがあるため、
/// セクタ単位ではなくバイトオフセット単位で読み書きする。
/// 各呼び出しは「シーク + 転送」を 1 回で完結させる。
pub trait BlockDevice {
    /// `offset` から `buf.len()` バイト読み取る。足りなければ `OutOfRange`。
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), BlockError>;
    /// `offset` に `buf` を書き込む
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<(), BlockError>;
    /// バッファ済みの書き込みを下位に反映する
    fn flush(&mut self) -> Result<(), BlockError> {
        Ok(())
    }
}

/// ブロックデバイスエラー
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockError {
    Io,
    OutOfRange,
}

impl fmt::Display for BlockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockError::Io => f.write_str("device I/O error"),
            BlockError::OutOfRange => f.write_str("access beyond end of device"),
        }
    }
}

impl core::error::Error for BlockError {}

/// メモリ上のイメージ（テストやツール用）
#[derive(Debug, Clone, Default)]
pub struct MemDevice {
    data: Vec<u8>,
}

impl MemDevice {
    /// ゼロ埋めされた `len` バイトのデバイス
    pub fn zeroed(len: usize) -> Self {
        Self {
            data: alloc::vec![0u8; len],
        }
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    fn range(&self, offset: u64, len: usize) -> Result<core::ops::Range<usize>, BlockError> {
        let start = usize::try_from(offset).map_err(|_| BlockError::OutOfRange)?;
        let end = start.checked_add(len).ok_or(BlockError::OutOfRange)?;
        if end > self.data.len() {
            return Err(BlockError::OutOfRange);
        }
        Ok(start..end)
    }
}

impl BlockDevice for MemDevice {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), BlockError> {
        let range = self.range(offset, buf.len())?;
        buf.copy_from_slice(&self.data[range]);
        Ok(())
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<(), BlockError> {
        let range = self.range(offset, buf.len())?;
        self.data[range].copy_from_slice(buf);
        Ok(())
    }
}

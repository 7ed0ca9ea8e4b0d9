#![cfg_attr(not(test), no_std)]

extern crate alloc;

use alloc::string::String;

/// ブートセクタのサイズ
pub const BOOT_SECTOR_SIZE: usize = 512;
/// ディレクトリエントリ 1 個のサイズ
pub const DIR_ENTRY_SIZE: usize = 32;
/// 8.3 形式の短い名前の長さ（名前 8 + 拡張子 3）
pub const SHORT_NAME_LEN: usize = 11;

/// ディレクトリ属性
pub const ATTR_DIRECTORY: u8 = 0x10;
/// アーカイブ属性（通常ファイル）
pub const ATTR_ARCHIVE: u8 = 0x20;
/// LFN エントリの属性（下位 4bit がすべて立つ）
pub const ATTR_LFN: u8 = 0x0F;

/// 先頭バイト: このスロット以降はクラスタ内で未使用
pub const ENTRY_END: u8 = 0x00;
/// 先頭バイト: 削除済みスロット（再利用可）
pub const ENTRY_DELETED: u8 = 0xE5;

/// チェーン終端の正規値
pub const FAT32_EOC: u32 = 0x0FFF_FFFF;
/// この値以上はすべてチェーン終端として扱う
pub const FAT32_EOC_MIN: u32 = 0x0FFF_FFF8;
/// FAT32 エントリの有効ビット（上位 4bit は予約）
const FAT32_ENTRY_MASK: u32 = 0x0FFF_FFFF;

/// "." エントリの名前
pub const DOT_NAME: [u8; SHORT_NAME_LEN] = *b".          ";
/// ".." エントリの名前
pub const DOTDOT_NAME: [u8; SHORT_NAME_LEN] = *b"..         ";

/// ブートセクタ (BPB) の解析結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootSector {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub num_fats: u8,
    pub total_sectors: u32,
    pub fat_size: u32,
    pub root_cluster: u32,
    /// 0x55AA シグネチャがあったか（無くてもマウントは続ける）
    pub has_signature: bool,
}

/// ブートセクタをパースする
///
/// 16bit の総セクタ数が 0 のときだけ 32bit 側を使う。
pub fn parse_boot_sector(buf: &[u8]) -> Result<BootSector, &'static str> {
    if buf.len() < BOOT_SECTOR_SIZE {
        return Err("boot sector shorter than 512 bytes");
    }

    let bytes_per_sector = u16::from_le_bytes([buf[0x0B], buf[0x0C]]);
    let sectors_per_cluster = buf[0x0D];
    let reserved_sectors = u16::from_le_bytes([buf[0x0E], buf[0x0F]]);
    let num_fats = buf[0x10];
    let total_sectors_16 = u16::from_le_bytes([buf[0x13], buf[0x14]]);
    let total_sectors_32 = u32::from_le_bytes([buf[0x20], buf[0x21], buf[0x22], buf[0x23]]);
    let fat_size = u32::from_le_bytes([buf[0x24], buf[0x25], buf[0x26], buf[0x27]]);
    let root_cluster = u32::from_le_bytes([buf[0x2C], buf[0x2D], buf[0x2E], buf[0x2F]]);

    if bytes_per_sector == 0 || sectors_per_cluster == 0 {
        return Err("zero bytes-per-sector or sectors-per-cluster");
    }

    let total_sectors = if total_sectors_16 != 0 {
        total_sectors_16 as u32
    } else {
        total_sectors_32
    };

    Ok(BootSector {
        bytes_per_sector,
        sectors_per_cluster,
        reserved_sectors,
        num_fats,
        total_sectors,
        fat_size,
        root_cluster,
        has_signature: buf[510] == 0x55 && buf[511] == 0xAA,
    })
}

/// FAT スロット 1 個の値
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatLink {
    Free,
    Next(u32),
    EndOfChain,
}

impl FatLink {
    /// ディスク上の 4 バイト値から解釈する（上位 4bit をマスク）
    pub fn from_raw(raw: u32) -> Self {
        match raw & FAT32_ENTRY_MASK {
            0 => FatLink::Free,
            v if v >= FAT32_EOC_MIN => FatLink::EndOfChain,
            v => FatLink::Next(v),
        }
    }

    pub fn to_raw(self) -> u32 {
        match self {
            FatLink::Free => 0,
            FatLink::Next(c) => c & FAT32_ENTRY_MASK,
            FatLink::EndOfChain => FAT32_EOC,
        }
    }
}

/// 32 バイトのディレクトリエントリ（短い名前のみ）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry {
    pub short_name: [u8; SHORT_NAME_LEN],
    pub attr: u8,
    pub first_cluster: u32,
    pub size: u32,
}

impl DirEntry {
    pub fn is_directory(&self) -> bool {
        self.attr & ATTR_DIRECTORY != 0
    }

    /// "." または ".." か
    pub fn is_dot(&self) -> bool {
        self.short_name == DOT_NAME || self.short_name == DOTDOT_NAME
    }

    /// `NAME.EXT` 形式の表示名
    pub fn display_name(&self) -> String {
        short_name_to_string(&self.short_name)
    }

    /// 32 バイトにシリアライズする（未使用フィールドは 0）
    pub fn encode(&self) -> [u8; DIR_ENTRY_SIZE] {
        let mut raw = [0u8; DIR_ENTRY_SIZE];
        raw[..SHORT_NAME_LEN].copy_from_slice(&self.short_name);
        raw[11] = self.attr;
        // クラスタ番号を high/low に分割
        let hi = ((self.first_cluster >> 16) as u16).to_le_bytes();
        let lo = ((self.first_cluster & 0xFFFF) as u16).to_le_bytes();
        raw[20..22].copy_from_slice(&hi);
        raw[26..28].copy_from_slice(&lo);
        raw[28..32].copy_from_slice(&self.size.to_le_bytes());
        raw
    }

    /// 32 バイトから復元する（スロット種別の判定は `parse_slot` で行う）
    pub fn decode(raw: &[u8]) -> Self {
        let mut short_name = [0u8; SHORT_NAME_LEN];
        short_name.copy_from_slice(&raw[..SHORT_NAME_LEN]);
        let hi = u16::from_le_bytes([raw[20], raw[21]]) as u32;
        let lo = u16::from_le_bytes([raw[26], raw[27]]) as u32;
        Self {
            short_name,
            attr: raw[11],
            first_cluster: (hi << 16) | lo,
            size: u32::from_le_bytes([raw[28], raw[29], raw[30], raw[31]]),
        }
    }
}

/// ディレクトリのスロット 1 個の状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// 0x00: このクラスタの残りは未使用
    End,
    /// 0xE5: 削除済み
    Deleted,
    /// LFN エントリ（読み飛ばす）
    LongName,
    Entry(DirEntry),
}

/// 32 バイトのスロットを分類する
pub fn parse_slot(raw: &[u8]) -> Slot {
    match raw[0] {
        ENTRY_END => Slot::End,
        ENTRY_DELETED => Slot::Deleted,
        _ if raw[11] & ATTR_LFN == ATTR_LFN => Slot::LongName,
        _ => Slot::Entry(DirEntry::decode(raw)),
    }
}

/// ユーザー入力から 11 バイトの短い名前を作る
///
/// - ASCII 英小文字を大文字にする
/// - 空白で 11 バイトに埋め、長すぎる分は切り捨てる
/// - '.' は特別扱いしない（"A.TXT" はそのまま 5 文字の名前になる）
pub fn build_short_name(name: &str) -> [u8; SHORT_NAME_LEN] {
    let mut out = [b' '; SHORT_NAME_LEN];
    for (dst, b) in out.iter_mut().zip(name.bytes()) {
        *dst = b.to_ascii_uppercase();
    }
    out
}

/// 短い名前を `NAME.EXT` 形式に戻す（拡張子が空ならドットなし）
pub fn short_name_to_string(name: &[u8; SHORT_NAME_LEN]) -> String {
    let base = trim_padding(&name[..8]);
    let ext = trim_padding(&name[8..]);
    let mut s = String::with_capacity(SHORT_NAME_LEN + 1);
    s.extend(base.iter().map(|&b| char::from(b)));
    if !ext.is_empty() {
        s.push('.');
        s.extend(ext.iter().map(|&b| char::from(b)));
    }
    s
}

fn trim_padding(field: &[u8]) -> &[u8] {
    let len = field.iter().rposition(|&b| b != b' ').map_or(0, |i| i + 1);
    &field[..len]
}

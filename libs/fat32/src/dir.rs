// dir.rs - ディレクトリエントリの走査・作成・削除・リネーム
//
// ディレクトリの中身はクラスタチェーン全体にまたがる。
// 検索はチェーンの全クラスタを見るが、空きスロットの探索と新規作成は
// 先頭クラスタだけを対象にする（ディレクトリの拡張はしない）。

use core::ops::ControlFlow;

use imgfs_blockdev::BlockDevice;
use imgfs_fat_core::{
    build_short_name, parse_slot, short_name_to_string, DirEntry, Slot, ATTR_ARCHIVE,
    ATTR_DIRECTORY, DIR_ENTRY_SIZE, DOTDOT_NAME, DOT_NAME, ENTRY_DELETED, SHORT_NAME_LEN,
};

use crate::error::{FsError, Result};
use crate::volume::Volume;

/// 1 つのディレクトリ内で使える名前の最大長
pub const MAX_NAME_LEN: usize = SHORT_NAME_LEN;

/// ディレクトリエントリの位置（所属クラスタとクラスタ内オフセット）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryLocation {
    pub cluster: u32,
    pub offset: u32,
}

/// 見つかったエントリ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FoundEntry {
    pub location: EntryLocation,
    pub entry: DirEntry,
}

/// 先頭クラスタの走査結果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlotScan {
    /// 最初に見つかった 0x00 / 0xE5 スロット
    pub free: Option<EntryLocation>,
    /// 同じ名前のエントリがあったか
    pub exists: bool,
}

/// 作成するエントリの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// mv の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// 同じディレクトリ内で名前だけ変えた
    Renamed,
    /// 指定ディレクトリへ移した（名前はそのまま）
    MovedInto { dir_cluster: u32 },
}

/// 名前の長さを検査して短い名前にする
pub fn validate_name(name: &str) -> Result<[u8; SHORT_NAME_LEN]> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(FsError::NameTooLong(name.to_string()));
    }
    Ok(build_short_name(name))
}

fn is_dot_name(name: &str) -> bool {
    name == "." || name == ".."
}

impl<D: BlockDevice> Volume<D> {
    /// エントリの絶対バイト位置
    pub fn entry_offset(&self, location: EntryLocation) -> u64 {
        self.cluster_to_offset(location.cluster) + location.offset as u64
    }

    pub(crate) fn read_cluster(&mut self, cluster: u32) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.cluster_bytes() as usize];
        let offset = self.cluster_to_offset(cluster);
        self.device()?.read_at(offset, &mut buf)?;
        log::trace!("read cluster {cluster}");
        Ok(buf)
    }

    /// ディレクトリのチェーン全体を走査し、生きているエントリごとに `f` を呼ぶ
    ///
    /// 0x00 はそのクラスタの走査だけを終わらせ、次のクラスタに進む。
    fn visit_entries<F>(&mut self, dir_cluster: u32, mut f: F) -> Result<()>
    where
        F: FnMut(&FoundEntry) -> ControlFlow<()>,
    {
        for cluster in self.cluster_chain(dir_cluster) {
            let buf = self.read_cluster(cluster)?;
            for (i, raw) in buf.chunks_exact(DIR_ENTRY_SIZE).enumerate() {
                match parse_slot(raw) {
                    Slot::End => break,
                    Slot::Deleted | Slot::LongName => continue,
                    Slot::Entry(entry) => {
                        let found = FoundEntry {
                            location: EntryLocation {
                                cluster,
                                offset: (i * DIR_ENTRY_SIZE) as u32,
                            },
                            entry,
                        };
                        if f(&found).is_break() {
                            return Ok(());
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// 短い名前が一致する最初のエントリを探す
    pub fn find_entry(
        &mut self,
        dir_cluster: u32,
        short_name: &[u8; SHORT_NAME_LEN],
    ) -> Result<Option<FoundEntry>> {
        let mut hit = None;
        self.visit_entries(dir_cluster, |found| {
            if &found.entry.short_name == short_name {
                hit = Some(*found);
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })?;
        Ok(hit)
    }

    /// 先頭クラスタが `target` のサブディレクトリのエントリを探す（"." / ".." は除く）
    pub fn find_entry_by_cluster(
        &mut self,
        dir_cluster: u32,
        target: u32,
    ) -> Result<Option<FoundEntry>> {
        let mut hit = None;
        self.visit_entries(dir_cluster, |found| {
            if !found.entry.is_dot() && found.entry.first_cluster == target {
                hit = Some(*found);
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })?;
        Ok(hit)
    }

    /// ディレクトリ内の全エントリ（"." / ".." を含む、ディスク上の順）
    pub fn list_entries(&mut self, dir_cluster: u32) -> Result<Vec<FoundEntry>> {
        let mut entries = Vec::new();
        self.visit_entries(dir_cluster, |found| {
            entries.push(*found);
            ControlFlow::Continue(())
        })?;
        Ok(entries)
    }

    /// 先頭クラスタだけを見て、空きスロットと名前の重複を調べる
    pub fn scan_for_free_slot(
        &mut self,
        dir_cluster: u32,
        short_name: &[u8; SHORT_NAME_LEN],
    ) -> Result<SlotScan> {
        let buf = self.read_cluster(dir_cluster)?;
        let mut scan = SlotScan::default();
        for (i, raw) in buf.chunks_exact(DIR_ENTRY_SIZE).enumerate() {
            let here = EntryLocation {
                cluster: dir_cluster,
                offset: (i * DIR_ENTRY_SIZE) as u32,
            };
            match parse_slot(raw) {
                Slot::End => {
                    scan.free.get_or_insert(here);
                    break;
                }
                Slot::Deleted => {
                    scan.free.get_or_insert(here);
                }
                Slot::LongName => {}
                Slot::Entry(entry) => {
                    if &entry.short_name == short_name {
                        scan.exists = true;
                    }
                }
            }
        }
        Ok(scan)
    }

    /// 32 バイトのエントリを書き込む
    pub fn write_dir_entry(&mut self, location: EntryLocation, entry: &DirEntry) -> Result<()> {
        let offset = self.entry_offset(location);
        self.device()?.write_at(offset, &entry.encode())?;
        Ok(())
    }

    pub(crate) fn read_raw_entry(&mut self, location: EntryLocation) -> Result<[u8; DIR_ENTRY_SIZE]> {
        let offset = self.entry_offset(location);
        let mut raw = [0u8; DIR_ENTRY_SIZE];
        self.device()?.read_at(offset, &mut raw)?;
        Ok(raw)
    }

    pub(crate) fn write_raw_entry(&mut self, location: EntryLocation, raw: &[u8; DIR_ENTRY_SIZE]) -> Result<()> {
        let offset = self.entry_offset(location);
        self.device()?.write_at(offset, raw)?;
        Ok(())
    }

    /// 新しいディレクトリクラスタを "." と ".." で初期化する
    fn init_dir_cluster(&mut self, cluster: u32, parent_cluster: u32) -> Result<()> {
        let mut buf = vec![0u8; self.cluster_bytes() as usize];
        let dot = DirEntry {
            short_name: DOT_NAME,
            attr: ATTR_DIRECTORY,
            first_cluster: cluster,
            size: 0,
        };
        let dotdot = DirEntry {
            short_name: DOTDOT_NAME,
            attr: ATTR_DIRECTORY,
            first_cluster: parent_cluster,
            size: 0,
        };
        buf[..DIR_ENTRY_SIZE].copy_from_slice(&dot.encode());
        buf[DIR_ENTRY_SIZE..2 * DIR_ENTRY_SIZE].copy_from_slice(&dotdot.encode());
        let offset = self.cluster_to_offset(cluster);
        self.device()?.write_at(offset, &buf)?;
        Ok(())
    }

    /// `parent` にファイルまたはディレクトリを作る
    ///
    /// ファイルはクラスタを確保せず（先頭クラスタ 0、サイズ 0）、最初の書き込みで確保する。
    /// エントリの書き込みは最後に行うので、途中で失敗しても親は変わらない。
    pub fn create_entry(&mut self, parent: u32, name: &str, kind: EntryKind) -> Result<DirEntry> {
        let short_name = validate_name(name)?;
        if is_dot_name(name) {
            return Err(FsError::InvalidName(name.to_string()));
        }

        let scan = self.scan_for_free_slot(parent, &short_name)?;
        if scan.exists || self.find_entry(parent, &short_name)?.is_some() {
            return Err(FsError::AlreadyExists(name.to_string()));
        }
        let slot = scan
            .free
            .ok_or_else(|| FsError::DirectoryFull(name.to_string()))?;

        let entry = match kind {
            EntryKind::Directory => {
                let cluster = self.allocate_cluster()?;
                if let Err(e) = self.init_dir_cluster(cluster, parent) {
                    if let Err(free_err) = self.free_cluster_chain(cluster) {
                        log::warn!("cannot release cluster {cluster} after failed mkdir: {free_err}");
                    }
                    return Err(e);
                }
                DirEntry {
                    short_name,
                    attr: ATTR_DIRECTORY,
                    first_cluster: cluster,
                    size: 0,
                }
            }
            EntryKind::File => DirEntry {
                short_name,
                attr: ATTR_ARCHIVE,
                first_cluster: 0,
                size: 0,
            },
        };

        self.write_dir_entry(slot, &entry)?;
        self.flush()?;
        log::debug!(
            "created {:?} '{}' at cluster {} offset {} (data cluster {})",
            kind,
            name,
            slot.cluster,
            slot.offset,
            entry.first_cluster
        );
        Ok(entry)
    }

    /// エントリの先頭バイトを 0xE5 にする（残りのバイトはそのまま）
    pub fn delete_entry(&mut self, location: EntryLocation) -> Result<()> {
        let offset = self.entry_offset(location);
        self.device()?.write_at(offset, &[ENTRY_DELETED])?;
        Ok(())
    }

    /// "." と ".." 以外に生きたエントリが無いか
    pub fn is_dir_empty(&mut self, dir_cluster: u32) -> Result<bool> {
        let mut empty = true;
        self.visit_entries(dir_cluster, |found| {
            if found.entry.is_dot() {
                ControlFlow::Continue(())
            } else {
                empty = false;
                ControlFlow::Break(())
            }
        })?;
        Ok(empty)
    }

    /// ".." などの先頭クラスタ 0 はルートを指す
    pub(crate) fn resolve_dir_cluster(&self, cluster: u32) -> u32 {
        if cluster == 0 { self.root_cluster() } else { cluster }
    }

    /// `dir_cluster` 内のファイル `src` を `dest` にリネーム、または `dest` ディレクトリへ移動する
    ///
    /// - `dest` が既存ディレクトリ: エントリ 32 バイトをそのまま移し、元を削除
    /// - `dest` が存在しない: 名前フィールドだけ書き換える
    /// - `dest` が既存ファイル: エラー
    ///
    /// ディレクトリ自体は移動できない。
    pub fn rename_or_move(&mut self, dir_cluster: u32, src: &str, dest: &str) -> Result<MoveOutcome> {
        let src_short = validate_name(src)?;
        let dest_short = validate_name(dest)?;

        let source = self
            .find_entry(dir_cluster, &src_short)?
            .ok_or_else(|| FsError::NotFound(src.to_string()))?;
        if source.entry.is_directory() {
            return Err(FsError::IsADirectory(src.to_string()));
        }

        match self.find_entry(dir_cluster, &dest_short)? {
            Some(target) if target.entry.is_directory() => {
                let target_dir = self.resolve_dir_cluster(target.entry.first_cluster);
                if self.find_entry(target_dir, &src_short)?.is_some() {
                    return Err(FsError::AlreadyExists(short_name_to_string(&src_short)));
                }
                let slot = self
                    .scan_for_free_slot(target_dir, &src_short)?
                    .free
                    .ok_or_else(|| FsError::DirectoryFull(dest.to_string()))?;

                let raw = self.read_raw_entry(source.location)?;
                self.write_raw_entry(slot, &raw)?;
                self.delete_entry(source.location)?;
                self.flush()?;
                log::debug!("moved '{src}' into directory cluster {target_dir}");
                Ok(MoveOutcome::MovedInto {
                    dir_cluster: target_dir,
                })
            }
            Some(_) => Err(FsError::NotADirectory(dest.to_string())),
            None if is_dot_name(dest) => Err(FsError::InvalidName(dest.to_string())),
            None => {
                let mut raw = self.read_raw_entry(source.location)?;
                raw[..SHORT_NAME_LEN].copy_from_slice(&dest_short);
                self.write_raw_entry(source.location, &raw)?;
                self.flush()?;
                log::debug!("renamed '{src}' to '{dest}'");
                Ok(MoveOutcome::Renamed)
            }
        }
    }
}

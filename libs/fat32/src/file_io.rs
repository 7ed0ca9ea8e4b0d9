// file_io.rs - クラスタチェーンにまたがるファイルデータの読み書き

use imgfs_blockdev::BlockDevice;
use imgfs_fat_core::{DirEntry, FatLink};

use crate::dir::EntryLocation;
use crate::error::{FsError, Result};
use crate::open_files::OpenFileHandle;
use crate::volume::Volume;

impl<D: BlockDevice> Volume<D> {
    /// ファイルの `offset` から最大 `max_bytes` バイトを読む
    ///
    /// 範囲はファイルサイズで切り詰める。チェーンが途中で終わったり
    /// 読み込みに失敗した場合は、そこまでのデータを返す。
    pub fn read_file_at(&mut self, entry: &DirEntry, offset: u32, max_bytes: u32) -> Vec<u8> {
        let mut out = Vec::new();
        if offset >= entry.size || entry.first_cluster < 2 {
            return out;
        }
        let want = max_bytes.min(entry.size - offset) as usize;
        let cluster_bytes = self.cluster_bytes();

        // offset を含むクラスタまで進む
        let mut cluster = entry.first_cluster;
        for _ in 0..offset / cluster_bytes {
            match self.next_cluster(cluster) {
                Some(next) => cluster = next,
                None => {
                    log::warn!("chain of '{}' ends before offset {offset}", entry.display_name());
                    return out;
                }
            }
        }

        let mut in_cluster = offset % cluster_bytes;
        out.reserve(want);
        while out.len() < want {
            let n = ((cluster_bytes - in_cluster) as usize).min(want - out.len());
            let start = out.len();
            out.resize(start + n, 0);
            let pos = self.cluster_to_offset(cluster) + in_cluster as u64;
            let read = self
                .device()
                .and_then(|dev| dev.read_at(pos, &mut out[start..]).map_err(FsError::from));
            if let Err(e) = read {
                log::warn!("read of cluster {cluster} failed ({e}), returning {start} byte(s)");
                out.truncate(start);
                break;
            }
            log::trace!("read {n} byte(s) from cluster {cluster}");
            in_cluster = 0;

            if out.len() < want {
                match self.next_cluster(cluster) {
                    Some(next) => cluster = next,
                    None => {
                        log::warn!("short read of '{}': chain ended after {} byte(s)", entry.display_name(), out.len());
                        break;
                    }
                }
            }
        }
        out
    }

    /// `location` のファイルに `data` を `start_offset` から書き込む
    ///
    /// - `start_offset` が現在のサイズを超える場合はファイル末尾から書く（穴は作らない）
    /// - 必要な数までチェーンを伸ばす
    /// - 最後にエントリの先頭クラスタとサイズを更新する（サイズは縮まない）
    ///
    /// 先頭クラスタを新たに確保した場合は `handle.start_cluster` にも書き戻す。
    /// 書き込んだバイト数を返す。
    pub fn write_file_at(
        &mut self,
        location: EntryLocation,
        data: &[u8],
        start_offset: u32,
        handle: &mut OpenFileHandle,
    ) -> Result<u32> {
        if data.is_empty() {
            return Ok(0);
        }
        let entry = DirEntry::decode(&self.read_raw_entry(location)?);
        if entry.is_directory() {
            return Err(FsError::IsADirectory(entry.display_name()));
        }

        let write_offset = start_offset.min(entry.size);
        let len = data.len().min((u32::MAX - write_offset) as usize) as u32;
        let cluster_bytes = self.cluster_bytes();

        let fresh = entry.first_cluster < 2;
        let start = if fresh {
            self.allocate_cluster()?
        } else {
            entry.first_cluster
        };

        // 必要なクラスタ数までチェーンを伸ばす
        let needed = (write_offset as u64 + len as u64).div_ceil(cluster_bytes as u64) as usize;
        let mut chain = self.cluster_chain(start);
        let mut hint = 2;
        while chain.len() < needed {
            let grown = self.allocate_cluster_from(hint).and_then(|cluster| {
                let last = chain.last().copied().unwrap_or(start);
                self.write_fat_entry(last, FatLink::Next(cluster))?;
                Ok(cluster)
            });
            match grown {
                Ok(cluster) => {
                    chain.push(cluster);
                    hint = cluster + 1;
                }
                Err(e) => {
                    if fresh {
                        self.free_cluster_chain(start)?;
                    }
                    return Err(e);
                }
            }
        }
        if needed > 1 {
            log::debug!("'{}' spans {} cluster(s)", entry.display_name(), chain.len());
        }

        let mut index = (write_offset / cluster_bytes) as usize;
        let mut in_cluster = write_offset % cluster_bytes;
        let mut written = 0u32;
        while written < len {
            let Some(&cluster) = chain.get(index) else {
                break;
            };
            let n = (cluster_bytes - in_cluster).min(len - written);
            let pos = self.cluster_to_offset(cluster) + in_cluster as u64;
            let piece = &data[written as usize..(written + n) as usize];
            self.device()?.write_at(pos, piece)?;
            log::trace!("wrote {n} byte(s) to cluster {cluster}");
            written += n;
            index += 1;
            in_cluster = 0;
        }

        // エントリを読み直して先頭クラスタとサイズを更新
        let mut raw = self.read_raw_entry(location)?;
        let new_size = entry.size.max(write_offset + written);
        raw[20..22].copy_from_slice(&((start >> 16) as u16).to_le_bytes());
        raw[26..28].copy_from_slice(&((start & 0xFFFF) as u16).to_le_bytes());
        raw[28..32].copy_from_slice(&new_size.to_le_bytes());
        self.write_raw_entry(location, &raw)?;
        self.flush()?;

        handle.start_cluster = start;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dir::EntryKind;
    use crate::open_files::OpenMode;
    use crate::test_image::{self, ROOT_CLUSTER};
    use imgfs_blockdev::MemDevice;
    use imgfs_fat_core::build_short_name;

    fn handle_for(name: &str) -> OpenFileHandle {
        OpenFileHandle {
            short_name: build_short_name(name),
            path: "/".to_string(),
            start_cluster: 0,
            mode: OpenMode::all(),
            offset: 0,
        }
    }

    fn lookup(vol: &mut Volume<MemDevice>, name: &str) -> (EntryLocation, DirEntry) {
        let found = vol.find_entry(ROOT_CLUSTER, &build_short_name(name)).unwrap().unwrap();
        (found.location, found.entry)
    }

    fn pattern(n: usize) -> Vec<u8> {
        (0..n).map(|i| (i * 7 % 251) as u8).collect()
    }

    #[test]
    fn test_first_write_allocates() {
        let mut vol = test_image::volume(1, 100);
        vol.create_entry(ROOT_CLUSTER, "F", EntryKind::File).unwrap();
        let (loc, _) = lookup(&mut vol, "F");
        let mut handle = handle_for("F");

        assert_eq!(vol.write_file_at(loc, b"hello", 0, &mut handle).unwrap(), 5);
        let (_, entry) = lookup(&mut vol, "F");
        assert_eq!(entry.size, 5);
        assert!(entry.first_cluster >= 2);
        assert_eq!(handle.start_cluster, entry.first_cluster);
        assert_eq!(vol.read_file_at(&entry, 0, 5), b"hello");
    }

    #[test]
    fn test_multi_cluster_write_and_read() {
        let mut vol = test_image::volume(1, 100);
        vol.create_entry(ROOT_CLUSTER, "BIG", EntryKind::File).unwrap();
        let (loc, _) = lookup(&mut vol, "BIG");
        let data = pattern(1300);
        let mut handle = handle_for("BIG");

        assert_eq!(vol.write_file_at(loc, &data, 0, &mut handle).unwrap(), 1300);
        let (_, entry) = lookup(&mut vol, "BIG");
        assert_eq!(entry.size, 1300);
        // ceil(1300 / 512) = 3
        assert_eq!(vol.cluster_chain(entry.first_cluster).len(), 3);
        assert_eq!(vol.read_file_at(&entry, 0, 1300), data);
        // 2 番目のクラスタの途中から
        assert_eq!(vol.read_file_at(&entry, 600, 100), &data[600..700]);
    }

    #[test]
    fn test_read_is_clamped_to_size() {
        let mut vol = test_image::volume(1, 100);
        vol.create_entry(ROOT_CLUSTER, "F", EntryKind::File).unwrap();
        let (loc, _) = lookup(&mut vol, "F");
        vol.write_file_at(loc, b"abcdef", 0, &mut handle_for("F")).unwrap();
        let (_, entry) = lookup(&mut vol, "F");

        assert_eq!(vol.read_file_at(&entry, 4, 100), b"ef");
        assert!(vol.read_file_at(&entry, 6, 10).is_empty());
        assert!(vol.read_file_at(&entry, 100, 10).is_empty());
    }

    #[test]
    fn test_read_empty_file() {
        let mut vol = test_image::volume(1, 100);
        let entry = vol.create_entry(ROOT_CLUSTER, "E", EntryKind::File).unwrap();
        assert!(vol.read_file_at(&entry, 0, 10).is_empty());
    }

    #[test]
    fn test_write_past_end_is_pulled_back() {
        let mut vol = test_image::volume(1, 100);
        vol.create_entry(ROOT_CLUSTER, "F", EntryKind::File).unwrap();
        let (loc, _) = lookup(&mut vol, "F");
        let mut handle = handle_for("F");
        vol.write_file_at(loc, b"abc", 0, &mut handle).unwrap();
        vol.write_file_at(loc, b"XYZ", 1000, &mut handle).unwrap();

        let (_, entry) = lookup(&mut vol, "F");
        assert_eq!(entry.size, 6);
        assert_eq!(vol.read_file_at(&entry, 0, 6), b"abcXYZ");
    }

    #[test]
    fn test_overwrite_does_not_shrink() {
        let mut vol = test_image::volume(1, 100);
        vol.create_entry(ROOT_CLUSTER, "F", EntryKind::File).unwrap();
        let (loc, _) = lookup(&mut vol, "F");
        let mut handle = handle_for("F");
        vol.write_file_at(loc, b"0123456789", 0, &mut handle).unwrap();
        vol.write_file_at(loc, b"ab", 2, &mut handle).unwrap();

        let (_, entry) = lookup(&mut vol, "F");
        assert_eq!(entry.size, 10);
        assert_eq!(vol.read_file_at(&entry, 0, 10), b"01ab456789");
    }

    #[test]
    fn test_append_across_cluster_boundary() {
        let mut vol = test_image::volume(1, 100);
        vol.create_entry(ROOT_CLUSTER, "F", EntryKind::File).unwrap();
        let (loc, _) = lookup(&mut vol, "F");
        let mut handle = handle_for("F");
        let first = pattern(512);
        vol.write_file_at(loc, &first, 0, &mut handle).unwrap();
        let (_, entry) = lookup(&mut vol, "F");
        assert_eq!(vol.cluster_chain(entry.first_cluster).len(), 1);

        vol.write_file_at(loc, b"tail", 512, &mut handle).unwrap();
        let (_, entry) = lookup(&mut vol, "F");
        assert_eq!(entry.size, 516);
        assert_eq!(vol.cluster_chain(entry.first_cluster).len(), 2);
        assert_eq!(vol.read_file_at(&entry, 510, 10), [&first[510..], &b"tail"[..]].concat());
    }

    #[test]
    fn test_write_to_directory_is_rejected() {
        let mut vol = test_image::volume(1, 100);
        vol.create_entry(ROOT_CLUSTER, "D", EntryKind::Directory).unwrap();
        let (loc, _) = lookup(&mut vol, "D");
        assert!(matches!(
            vol.write_file_at(loc, b"x", 0, &mut handle_for("D")),
            Err(FsError::IsADirectory(_))
        ));
    }

    #[test]
    fn test_failed_first_write_releases_clusters() {
        // ルート以外に 2 クラスタしかない
        let mut vol = test_image::volume(1, 3);
        vol.create_entry(ROOT_CLUSTER, "F", EntryKind::File).unwrap();
        let (loc, _) = lookup(&mut vol, "F");
        let mut handle = handle_for("F");

        assert!(matches!(
            vol.write_file_at(loc, &pattern(2000), 0, &mut handle),
            Err(FsError::NoFreeClusters)
        ));
        assert_eq!(vol.read_fat_entry(3), FatLink::Free);
        assert_eq!(vol.read_fat_entry(4), FatLink::Free);
        let (_, entry) = lookup(&mut vol, "F");
        assert_eq!(entry.first_cluster, 0);
        assert_eq!(entry.size, 0);
        assert_eq!(handle.start_cluster, 0);
    }
}

// fat.rs - FAT テーブルの読み書き・クラスタ確保・チェーン解放

use imgfs_blockdev::{BlockDevice, BlockError};
use imgfs_fat_core::FatLink;

use crate::error::{FsError, Result};
use crate::volume::Volume;

impl<D: BlockDevice> Volume<D> {
    /// `fat_index` 番目の FAT 上で `cluster` のスロットがあるバイト位置
    fn fat_entry_offset(&self, fat_index: u32, cluster: u32) -> u64 {
        let fat_sector = self.fat_start_sector as u64 + fat_index as u64 * self.boot.fat_size as u64;
        fat_sector * self.boot.bytes_per_sector as u64 + cluster as u64 * 4
    }

    /// FAT エントリを読み取る（先頭の FAT のみ参照）
    ///
    /// 読めなかった場合はチェーン終端として扱い、走査を止めさせる。
    pub fn read_fat_entry(&mut self, cluster: u32) -> FatLink {
        let offset = self.fat_entry_offset(0, cluster);
        let mut buf = [0u8; 4];
        let read = self
            .device()
            .and_then(|dev| dev.read_at(offset, &mut buf).map_err(FsError::from));
        match read {
            Ok(()) => FatLink::from_raw(u32::from_le_bytes(buf)),
            Err(e) => {
                log::warn!("FAT read for cluster {cluster} failed ({e}), treating as end of chain");
                FatLink::EndOfChain
            }
        }
    }

    /// FAT エントリを書き込む（全 FAT に反映）
    ///
    /// FAT 1 個分の範囲に収まらないクラスタ番号は拒否する。
    pub fn write_fat_entry(&mut self, cluster: u32, link: FatLink) -> Result<()> {
        let fat_bytes = self.boot.fat_size as u64 * self.boot.bytes_per_sector as u64;
        if (cluster as u64 + 1) * 4 > fat_bytes {
            log::warn!("FAT write for cluster {cluster} is outside the FAT, refusing");
            return Err(FsError::Device(BlockError::OutOfRange));
        }
        let bytes = link.to_raw().to_le_bytes();
        for fat_idx in 0..self.boot.num_fats as u32 {
            let offset = self.fat_entry_offset(fat_idx, cluster);
            self.device()?.write_at(offset, &bytes)?;
        }
        log::trace!("FAT[{cluster}] = {link:?}");
        Ok(())
    }

    /// 次のクラスタを取得（終端・空き・データ領域外の番号なら None）
    pub fn next_cluster(&mut self, cluster: u32) -> Option<u32> {
        match self.read_fat_entry(cluster) {
            FatLink::Next(next) if self.is_data_cluster(next) => Some(next),
            FatLink::Next(next) => {
                log::warn!("FAT[{cluster}] points to invalid cluster {next}, treating as end of chain");
                None
            }
            _ => None,
        }
    }

    /// `start` から始まるチェーンのクラスタ番号を順に集める
    ///
    /// 壊れた FAT がループしていてもクラスタ総数で打ち切る。
    pub fn cluster_chain(&mut self, start: u32) -> Vec<u32> {
        let mut chain = Vec::new();
        if start < 2 {
            return chain;
        }
        let mut cluster = start;
        loop {
            chain.push(cluster);
            if chain.len() > self.total_clusters as usize {
                log::warn!("cluster chain from {start} does not terminate, stopping");
                break;
            }
            match self.next_cluster(cluster) {
                Some(next) => cluster = next,
                None => break,
            }
        }
        chain
    }

    /// 空きクラスタを 1 個確保して終端マークを付ける
    pub fn allocate_cluster(&mut self) -> Result<u32> {
        self.allocate_cluster_from(2)
    }

    /// `hint` 以降から空きクラスタを探す
    ///
    /// 連続して確保するときは前回の位置 + 1 を渡し、先頭からの再走査を避ける。
    pub fn allocate_cluster_from(&mut self, hint: u32) -> Result<u32> {
        let end = self.total_clusters.saturating_add(2);
        for cluster in hint.max(2)..end {
            if self.read_fat_entry(cluster) == FatLink::Free {
                self.write_fat_entry(cluster, FatLink::EndOfChain)?;
                log::debug!("allocated cluster {cluster}");
                return Ok(cluster);
            }
        }
        Err(FsError::NoFreeClusters)
    }

    /// チェーンをたどって全クラスタを空きに戻す。解放した数を返す
    pub fn free_cluster_chain(&mut self, start: u32) -> Result<u32> {
        let mut cluster = start;
        let mut freed = 0u32;
        // 予約クラスタとデータ領域外の番号には触らない
        while self.is_data_cluster(cluster) && freed <= self.total_clusters {
            let link = self.read_fat_entry(cluster);
            self.write_fat_entry(cluster, FatLink::Free)?;
            freed += 1;
            match link {
                FatLink::Next(next) if self.is_data_cluster(next) => cluster = next,
                FatLink::Next(next) => {
                    log::warn!("chain from {start} links to invalid cluster {next}, stopping");
                    break;
                }
                FatLink::Free | FatLink::EndOfChain => break,
            }
        }
        log::debug!("freed {freed} cluster(s) starting at {start}");
        Ok(freed)
    }
}

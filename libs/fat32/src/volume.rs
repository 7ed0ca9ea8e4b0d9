// volume.rs - マウント済み FAT32 ボリューム
//
// ブートセクタから導いたレイアウトと、カレントディレクトリのクラスタを持つ。
// FAT・ディレクトリ・ファイルデータの各操作は別モジュールの impl ブロックにある。

use core::fmt;
use std::path::Path;

use imgfs_blockdev::BlockDevice;
use imgfs_fat_core::{parse_boot_sector, BootSector, BOOT_SECTOR_SIZE};

use crate::error::{FsError, Result};
use crate::image::ImageFile;

/// FAT32 ボリューム（BlockDevice 抽象化）
pub struct Volume<D: BlockDevice> {
    pub(crate) boot: BootSector,
    pub(crate) fat_start_sector: u32,
    pub(crate) first_data_sector: u32,
    pub(crate) total_clusters: u32,
    /// カレントディレクトリ（作業ディレクトリ）の先頭クラスタ
    pub(crate) cwd_cluster: u32,
    /// アンマウント後は None
    dev: Option<D>,
}

impl Volume<ImageFile> {
    /// イメージファイルを読み書きモードで開いてマウントする
    pub fn mount(image_path: impl AsRef<Path>) -> Result<Self> {
        let path = image_path.as_ref();
        let dev = ImageFile::open(path).map_err(|source| FsError::ImageOpen {
            path: path.to_path_buf(),
            source,
        })?;
        let volume = Volume::from_device(dev)?;
        log::info!("mounted {}", path.display());
        Ok(volume)
    }
}

impl<D: BlockDevice> Volume<D> {
    /// 任意のデバイス上のボリュームを開く
    pub fn from_device(mut dev: D) -> Result<Self> {
        let mut buf = [0u8; BOOT_SECTOR_SIZE];
        dev.read_at(0, &mut buf)
            .map_err(|_| FsError::BootSector("fewer than 512 bytes could be read"))?;
        let boot = parse_boot_sector(&buf).map_err(FsError::BootSector)?;
        if !boot.has_signature {
            log::warn!("boot sector has no 0x55AA signature, mounting anyway");
        }

        let fat_start_sector = boot.reserved_sectors as u32;
        let first_data_sector = (boot.num_fats as u32)
            .checked_mul(boot.fat_size)
            .and_then(|fats| fats.checked_add(fat_start_sector))
            .ok_or(FsError::BootSector("FAT region size overflows"))?;
        let data_sectors = boot
            .total_sectors
            .checked_sub(first_data_sector)
            .ok_or(FsError::BootSector("data region starts past the end of the volume"))?;
        let total_clusters = data_sectors / boot.sectors_per_cluster as u32;

        log::debug!(
            "layout: {} B/sector, {} sectors/cluster, FAT at sector {}, data at sector {}, {} clusters, root {}",
            boot.bytes_per_sector,
            boot.sectors_per_cluster,
            fat_start_sector,
            first_data_sector,
            total_clusters,
            boot.root_cluster,
        );

        Ok(Self {
            boot,
            fat_start_sector,
            first_data_sector,
            total_clusters,
            cwd_cluster: boot.root_cluster,
            dev: Some(dev),
        })
    }

    /// 書き込みを反映してデバイスを閉じる。2 回目以降は何もしない
    pub fn unmount(&mut self) {
        if let Some(mut dev) = self.dev.take() {
            if let Err(e) = dev.flush() {
                log::warn!("flush on unmount failed: {e}");
            }
            log::info!("volume unmounted");
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.dev.is_some()
    }

    pub(crate) fn device(&mut self) -> Result<&mut D> {
        self.dev.as_mut().ok_or(FsError::NotMounted)
    }

    pub(crate) fn flush(&mut self) -> Result<()> {
        self.device()?.flush()?;
        Ok(())
    }

    pub fn boot_sector(&self) -> &BootSector {
        &self.boot
    }

    pub fn root_cluster(&self) -> u32 {
        self.boot.root_cluster
    }

    pub fn total_clusters(&self) -> u32 {
        self.total_clusters
    }

    pub fn fat_start_sector(&self) -> u32 {
        self.fat_start_sector
    }

    pub fn first_data_sector(&self) -> u32 {
        self.first_data_sector
    }

    /// カレントディレクトリの先頭クラスタ
    pub fn cwd_cluster(&self) -> u32 {
        self.cwd_cluster
    }

    /// info コマンド用のレイアウト情報
    pub fn info(&self) -> VolumeInfo {
        let b = &self.boot;
        VolumeInfo {
            root_cluster: b.root_cluster,
            bytes_per_sector: b.bytes_per_sector,
            sectors_per_cluster: b.sectors_per_cluster,
            reserved_sectors: b.reserved_sectors,
            num_fats: b.num_fats,
            fat_size: b.fat_size,
            total_clusters: self.total_clusters,
            entries_per_fat: (b.fat_size as u64 * b.bytes_per_sector as u64 / 4) as u32,
            image_bytes: b.total_sectors as u64 * b.bytes_per_sector as u64,
        }
    }
}

/// ボリュームのレイアウト（info 表示用）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeInfo {
    pub root_cluster: u32,
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub num_fats: u8,
    pub fat_size: u32,
    pub total_clusters: u32,
    pub entries_per_fat: u32,
    pub image_bytes: u64,
}

impl fmt::Display for VolumeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "position of root cluster (in cluster #): {}", self.root_cluster)?;
        writeln!(f, "bytes per sector: {}", self.bytes_per_sector)?;
        writeln!(f, "sectors per cluster: {}", self.sectors_per_cluster)?;
        writeln!(f, "reserved sectors: {}", self.reserved_sectors)?;
        writeln!(f, "number of FATs: {}", self.num_fats)?;
        writeln!(f, "sectors per FAT: {}", self.fat_size)?;
        writeln!(f, "total # of clusters in data region: {}", self.total_clusters)?;
        writeln!(f, "# of entries in one FAT: {}", self.entries_per_fat)?;
        write!(f, "size of image (in bytes): {}", self.image_bytes)
    }
}

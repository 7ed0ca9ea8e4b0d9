// test_image.rs - テスト用に小さな FAT32 イメージをメモリ上に作る

use imgfs_blockdev::MemDevice;
use imgfs_fat_core::{FAT32_EOC, FAT32_EOC_MIN};

use crate::session::Session;
use crate::volume::Volume;

const BYTES_PER_SECTOR: u32 = 512;
const RESERVED_SECTORS: u32 = 32;
const NUM_FATS: u32 = 2;
pub(crate) const ROOT_CLUSTER: u32 = 2;

/// `clusters` 個のデータクラスタを持つ FAT32 イメージを作る
pub(crate) fn format(sectors_per_cluster: u8, clusters: u32) -> MemDevice {
    let fat_size = ((clusters + 2) * 4).div_ceil(BYTES_PER_SECTOR);
    let first_data = RESERVED_SECTORS + NUM_FATS * fat_size;
    let total_sectors = first_data + clusters * sectors_per_cluster as u32;
    let mut img = vec![0u8; (total_sectors * BYTES_PER_SECTOR) as usize];

    img[0..3].copy_from_slice(&[0xEB, 0x58, 0x90]);
    img[3..11].copy_from_slice(b"MSWIN4.1");
    img[0x0B..0x0D].copy_from_slice(&(BYTES_PER_SECTOR as u16).to_le_bytes());
    img[0x0D] = sectors_per_cluster;
    img[0x0E..0x10].copy_from_slice(&(RESERVED_SECTORS as u16).to_le_bytes());
    img[0x10] = NUM_FATS as u8;
    img[0x20..0x24].copy_from_slice(&total_sectors.to_le_bytes());
    img[0x24..0x28].copy_from_slice(&fat_size.to_le_bytes());
    img[0x2C..0x30].copy_from_slice(&ROOT_CLUSTER.to_le_bytes());
    img[510] = 0x55;
    img[511] = 0xAA;

    for fat in 0..NUM_FATS {
        let base = ((RESERVED_SECTORS + fat * fat_size) * BYTES_PER_SECTOR) as usize;
        img[base..base + 4].copy_from_slice(&FAT32_EOC_MIN.to_le_bytes());
        img[base + 4..base + 8].copy_from_slice(&FAT32_EOC.to_le_bytes());
        // ルートディレクトリは 1 クラスタ
        let root = base + ROOT_CLUSTER as usize * 4;
        img[root..root + 4].copy_from_slice(&FAT32_EOC.to_le_bytes());
    }

    MemDevice::from_vec(img)
}

pub(crate) fn volume(sectors_per_cluster: u8, clusters: u32) -> Volume<MemDevice> {
    Volume::from_device(format(sectors_per_cluster, clusters)).unwrap()
}

pub(crate) fn session(sectors_per_cluster: u8, clusters: u32) -> Session<MemDevice> {
    Session::new(volume(sectors_per_cluster, clusters), "test.img")
}

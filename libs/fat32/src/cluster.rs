// cluster.rs - クラスタ番号とバイトオフセットの変換

use imgfs_blockdev::BlockDevice;

use crate::volume::Volume;

impl<D: BlockDevice> Volume<D> {
    /// 1 クラスタあたりのバイト数
    pub fn cluster_bytes(&self) -> u32 {
        self.boot.bytes_per_sector as u32 * self.boot.sectors_per_cluster as u32
    }

    /// クラスタ番号からイメージ先頭からのバイトオフセットへ
    ///
    /// 2 未満のクラスタは呼び出し側の誤り（結果は意味を持たない）。
    pub fn cluster_to_offset(&self, cluster: u32) -> u64 {
        let sector = self.first_data_sector as u64
            + cluster.saturating_sub(2) as u64 * self.boot.sectors_per_cluster as u64;
        sector * self.boot.bytes_per_sector as u64
    }

    /// データ領域に実在するクラスタ番号か
    pub fn is_data_cluster(&self, cluster: u32) -> bool {
        cluster >= 2 && cluster < self.total_clusters.saturating_add(2)
    }
}

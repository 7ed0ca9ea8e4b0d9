// path.rs - カレントディレクトリの絶対パス復元と cd

use imgfs_blockdev::BlockDevice;
use imgfs_fat_core::DOTDOT_NAME;

use crate::dir::validate_name;
use crate::error::{FsError, Result};
use crate::volume::Volume;

impl<D: BlockDevice> Volume<D> {
    /// `dir_cluster` の ".." が指す親クラスタ（0 はルート）
    fn parent_cluster(&mut self, dir_cluster: u32) -> Result<u32> {
        let dotdot = self
            .find_entry(dir_cluster, &DOTDOT_NAME)?
            .ok_or_else(|| FsError::NotFound("..".to_string()))?;
        Ok(self.resolve_dir_cluster(dotdot.entry.first_cluster))
    }

    fn try_current_path(&mut self) -> Result<String> {
        let root = self.root_cluster();
        let mut names = Vec::new();
        let mut cluster = self.cwd_cluster;
        while cluster != root {
            if names.len() > self.total_clusters as usize {
                return Err(FsError::NotFound("..".to_string()));
            }
            let parent = self.parent_cluster(cluster)?;
            let entry = self
                .find_entry_by_cluster(parent, cluster)?
                .ok_or_else(|| FsError::NotFound(format!("cluster {cluster}")))?;
            names.push(entry.entry.display_name());
            cluster = parent;
        }

        if names.is_empty() {
            return Ok("/".to_string());
        }
        let mut path = String::new();
        for name in names.iter().rev() {
            path.push('/');
            path.push_str(name);
        }
        Ok(path)
    }

    /// カレントディレクトリの絶対パス（ルートは "/"）
    ///
    /// ".." をたどれなかった場合は "/" を返す。
    pub fn current_path(&mut self) -> String {
        match self.try_current_path() {
            Ok(path) => path,
            Err(e) => {
                log::warn!("cannot resolve path of cluster {} ({e}), reporting /", self.cwd_cluster);
                "/".to_string()
            }
        }
    }

    /// カレントディレクトリ内のサブディレクトリへ移動する
    pub fn change_dir(&mut self, name: &str) -> Result<()> {
        if name == "." {
            return Ok(());
        }
        if name == ".." && self.cwd_cluster == self.root_cluster() {
            return Ok(());
        }
        let short_name = validate_name(name)?;
        let found = self
            .find_entry(self.cwd_cluster, &short_name)?
            .ok_or_else(|| FsError::NotFound(name.to_string()))?;
        if !found.entry.is_directory() {
            return Err(FsError::NotADirectory(name.to_string()));
        }
        self.cwd_cluster = self.resolve_dir_cluster(found.entry.first_cluster);
        log::debug!("cwd is now cluster {}", self.cwd_cluster);
        Ok(())
    }
}

// session.rs - シェルのコマンド 1 個に対応する操作をまとめたセッション
//
// マウント済みボリュームとオープンファイルテーブルを所有する。
// 名前はすべてカレントディレクトリからの相対名で、パス区切りは扱わない。

use std::path::Path;

use imgfs_blockdev::BlockDevice;
use imgfs_fat_core::{DirEntry, SHORT_NAME_LEN};

use crate::dir::{validate_name, EntryKind, FoundEntry, MoveOutcome};
use crate::error::{FsError, Result};
use crate::image::ImageFile;
use crate::open_files::{HandleId, OpenFileHandle, OpenFileTable, OpenMode};
use crate::volume::{Volume, VolumeInfo};

/// カレントディレクトリ内の通常ファイル
struct FileRef {
    found: FoundEntry,
    short_name: [u8; SHORT_NAME_LEN],
    /// 親ディレクトリの絶対パス
    path: String,
}

pub struct Session<D: BlockDevice> {
    volume: Volume<D>,
    open_files: OpenFileTable,
    image_name: String,
}

impl Session<ImageFile> {
    /// イメージファイルをマウントしてセッションを始める
    pub fn mount(image_path: impl AsRef<Path>) -> Result<Self> {
        let path = image_path.as_ref();
        let volume = Volume::mount(path)?;
        let image_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::new(volume, image_name))
    }
}

impl<D: BlockDevice> Session<D> {
    pub fn new(volume: Volume<D>, image_name: impl Into<String>) -> Self {
        Self {
            volume,
            open_files: OpenFileTable::new(),
            image_name: image_name.into(),
        }
    }

    pub fn image_name(&self) -> &str {
        &self.image_name
    }

    pub fn volume(&self) -> &Volume<D> {
        &self.volume
    }

    pub fn volume_mut(&mut self) -> &mut Volume<D> {
        &mut self.volume
    }

    pub fn open_files(&self) -> &OpenFileTable {
        &self.open_files
    }

    fn child_path(&mut self, name: &str) -> String {
        let cwd = self.volume.current_path();
        if cwd == "/" {
            format!("/{name}")
        } else {
            format!("{cwd}/{name}")
        }
    }

    /// カレントディレクトリ内の名前を引く（無ければ NotFound）
    fn find_in_cwd(&mut self, name: &str) -> Result<(FoundEntry, [u8; SHORT_NAME_LEN])> {
        let short_name = validate_name(name)?;
        let cwd = self.volume.cwd_cluster();
        let found = self
            .volume
            .find_entry(cwd, &short_name)?
            .ok_or_else(|| FsError::NotFound(name.to_string()))?;
        Ok((found, short_name))
    }

    /// カレントディレクトリ内の通常ファイルを引く
    fn find_file(&mut self, name: &str) -> Result<FileRef> {
        let (found, short_name) = self.find_in_cwd(name)?;
        if found.entry.is_directory() {
            return Err(FsError::IsADirectory(name.to_string()));
        }
        let path = self.volume.current_path();
        Ok(FileRef {
            found,
            short_name,
            path,
        })
    }

    fn handle_of(&self, file: &FileRef) -> Option<HandleId> {
        self.open_files
            .lookup(file.found.entry.first_cluster, &file.path, &file.short_name)
    }

    // =================================================================
    // 情報・移動
    // =================================================================

    pub fn info(&self) -> VolumeInfo {
        self.volume.info()
    }

    /// カレントディレクトリの絶対パス
    pub fn cwd(&mut self) -> String {
        self.volume.current_path()
    }

    /// カレントディレクトリのエントリ一覧（"." と ".." を含む）
    pub fn ls(&mut self) -> Result<Vec<DirEntry>> {
        let cwd = self.volume.cwd_cluster();
        let entries = self.volume.list_entries(cwd)?;
        Ok(entries.into_iter().map(|found| found.entry).collect())
    }

    pub fn cd(&mut self, name: &str) -> Result<()> {
        self.volume.change_dir(name)
    }

    // =================================================================
    // 作成・削除・移動
    // =================================================================

    pub fn mkdir(&mut self, name: &str) -> Result<()> {
        let cwd = self.volume.cwd_cluster();
        self.volume.create_entry(cwd, name, EntryKind::Directory)?;
        Ok(())
    }

    /// 空のファイルを作る（クラスタは最初の write で確保）
    pub fn creat(&mut self, name: &str) -> Result<()> {
        let cwd = self.volume.cwd_cluster();
        self.volume.create_entry(cwd, name, EntryKind::File)?;
        Ok(())
    }

    /// ファイルを削除してクラスタチェーンを解放する
    pub fn rm(&mut self, name: &str) -> Result<()> {
        let file = self.find_file(name)?;
        if self.handle_of(&file).is_some() {
            return Err(FsError::FileIsOpen(name.to_string()));
        }
        self.volume.delete_entry(file.found.location)?;
        let first = file.found.entry.first_cluster;
        if first >= 2 {
            self.volume.free_cluster_chain(first)?;
        }
        self.volume.flush()?;
        log::info!("removed '{name}'");
        Ok(())
    }

    /// 空のディレクトリを削除する
    pub fn rmdir(&mut self, name: &str) -> Result<()> {
        if name == "." || name == ".." {
            return Err(FsError::InvalidName(name.to_string()));
        }
        let (found, _) = self.find_in_cwd(name)?;
        if !found.entry.is_directory() {
            return Err(FsError::NotADirectory(name.to_string()));
        }
        let dir_cluster = self.volume.resolve_dir_cluster(found.entry.first_cluster);
        if !self.volume.is_dir_empty(dir_cluster)? {
            return Err(FsError::DirectoryNotEmpty(name.to_string()));
        }
        let dir_path = self.child_path(&found.entry.display_name());
        if self.open_files.any_under(&dir_path) {
            return Err(FsError::FileIsOpen(name.to_string()));
        }

        self.volume.delete_entry(found.location)?;
        if found.entry.first_cluster >= 2 {
            self.volume.free_cluster_chain(found.entry.first_cluster)?;
        }
        self.volume.flush()?;
        log::info!("removed directory '{name}'");
        Ok(())
    }

    /// ファイルのリネーム、またはディレクトリへの移動
    pub fn mv(&mut self, src: &str, dest: &str) -> Result<MoveOutcome> {
        let file = self.find_file(src)?;
        if self.handle_of(&file).is_some() {
            return Err(FsError::FileIsOpen(src.to_string()));
        }
        let cwd = self.volume.cwd_cluster();
        self.volume.rename_or_move(cwd, src, dest)
    }

    // =================================================================
    // オープン・クローズ
    // =================================================================

    /// `flag` は -r / -w / -rw / -wr
    pub fn open(&mut self, name: &str, flag: &str) -> Result<HandleId> {
        let mode = OpenMode::parse_flag(flag)?;
        let file = self.find_file(name)?;
        self.open_files
            .open(file.short_name, mode, file.found.entry.first_cluster, &file.path)
    }

    pub fn close(&mut self, name: &str) -> Result<()> {
        let file = self.find_file(name)?;
        self.open_files
            .close(file.found.entry.first_cluster, &file.path, &file.short_name)?;
        Ok(())
    }

    /// 開いているファイルの一覧（スロット番号順）
    pub fn lsof(&self) -> impl Iterator<Item = (HandleId, &OpenFileHandle)> {
        self.open_files.iter()
    }

    // =================================================================
    // 読み書き
    // =================================================================

    /// ファイルポインタを `offset` に移す（サイズを超える位置は不可）
    pub fn lseek(&mut self, name: &str, offset: u32) -> Result<()> {
        let file = self.find_file(name)?;
        let id = self
            .handle_of(&file)
            .ok_or_else(|| FsError::NotOpen(name.to_string()))?;
        let size = file.found.entry.size;
        if offset > size {
            return Err(FsError::OffsetExceedsSize {
                name: name.to_string(),
                offset,
                size,
            });
        }
        if let Some(handle) = self.open_files.get_mut(id) {
            handle.offset = offset;
        }
        Ok(())
    }

    /// ファイルポインタから最大 `size` バイト読み、その分ポインタを進める
    pub fn read(&mut self, name: &str, size: u32) -> Result<Vec<u8>> {
        let file = self.find_file(name)?;
        let handle = self
            .handle_of(&file)
            .and_then(|id| self.open_files.get_mut(id))
            .filter(|h| h.mode.contains(OpenMode::READ))
            .ok_or_else(|| FsError::NotOpenOrWrongMode(name.to_string()))?;
        let data = self.volume.read_file_at(&file.found.entry, handle.offset, size);
        handle.offset += data.len() as u32;
        Ok(data)
    }

    /// ファイルポインタの位置に書き込み、その分ポインタを進める
    ///
    /// ポインタがファイル末尾より後ろにあれば末尾から書く。
    pub fn write(&mut self, name: &str, data: &[u8]) -> Result<u32> {
        let file = self.find_file(name)?;
        let handle = self
            .handle_of(&file)
            .and_then(|id| self.open_files.get_mut(id))
            .filter(|h| h.mode.contains(OpenMode::WRITE))
            .ok_or_else(|| FsError::NotOpenOrWrongMode(name.to_string()))?;
        let start = handle.offset;
        let written = self
            .volume
            .write_file_at(file.found.location, data, start, handle)?;
        handle.offset = start.min(file.found.entry.size) + written;
        Ok(written)
    }

    /// 開いているファイルをすべて閉じてアンマウントする。2 回目以降は何もしない
    pub fn unmount(&mut self) {
        self.open_files.close_all();
        self.volume.unmount();
    }
}

impl<D: BlockDevice> Drop for Session<D> {
    fn drop(&mut self) {
        self.unmount();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_image;
    use imgfs_fat_core::{build_short_name, FatLink};

    fn names(session: &mut Session<imgfs_blockdev::MemDevice>) -> Vec<String> {
        session
            .ls()
            .unwrap()
            .iter()
            .map(DirEntry::display_name)
            .collect()
    }

    #[test]
    fn test_example_scenario() {
        let mut s = test_image::session(1, 2847);
        s.mkdir("ALPHA").unwrap();
        s.cd("ALPHA").unwrap();
        s.creat("FILE1").unwrap();
        s.open("FILE1", "-rw").unwrap();
        assert_eq!(s.write("FILE1", b"hello").unwrap(), 5);
        s.lseek("FILE1", 0).unwrap();
        assert_eq!(s.read("FILE1", 5).unwrap(), b"hello");
        s.close("FILE1").unwrap();
        s.cd("..").unwrap();

        assert!(matches!(s.rmdir("ALPHA"), Err(FsError::DirectoryNotEmpty(_))));
        s.cd("ALPHA").unwrap();
        s.rm("FILE1").unwrap();
        s.cd("..").unwrap();
        s.rmdir("ALPHA").unwrap();
        assert!(names(&mut s).is_empty());
    }

    #[test]
    fn test_cwd_follows_cd() {
        let mut s = test_image::session(1, 100);
        s.mkdir("D1").unwrap();
        s.cd("D1").unwrap();
        assert_eq!(s.cwd(), "/D1");
        assert_eq!(names(&mut s), vec![".", ".."]);
        s.cd("..").unwrap();
        assert_eq!(s.cwd(), "/");
    }

    #[test]
    fn test_rm_frees_every_cluster() {
        let mut s = test_image::session(1, 100);
        s.creat("BIG").unwrap();
        s.open("BIG", "-w").unwrap();
        s.write("BIG", &vec![0xAB; 1500]).unwrap();
        s.close("BIG").unwrap();

        let root = s.volume().root_cluster();
        let entry = s
            .volume_mut()
            .find_entry(root, &build_short_name("BIG"))
            .unwrap()
            .unwrap()
            .entry;
        let chain = s.volume_mut().cluster_chain(entry.first_cluster);
        assert_eq!(chain.len(), 3);

        s.rm("BIG").unwrap();
        assert!(matches!(s.rm("BIG"), Err(FsError::NotFound(_))));
        for cluster in chain {
            assert_eq!(s.volume_mut().read_fat_entry(cluster), FatLink::Free);
        }
    }

    #[test]
    fn test_open_files_block_rm_and_mv() {
        let mut s = test_image::session(1, 100);
        s.creat("F").unwrap();
        s.open("F", "-r").unwrap();
        assert!(matches!(s.rm("F"), Err(FsError::FileIsOpen(_))));
        assert!(matches!(s.mv("F", "G"), Err(FsError::FileIsOpen(_))));
        s.close("F").unwrap();
        assert_eq!(s.mv("F", "G").unwrap(), MoveOutcome::Renamed);
        s.rm("G").unwrap();
    }

    #[test]
    fn test_open_close_identity() {
        let mut s = test_image::session(1, 100);
        s.creat("F").unwrap();
        s.open("F", "-r").unwrap();
        assert!(matches!(s.open("F", "-w"), Err(FsError::AlreadyOpen(_))));
        s.close("F").unwrap();
        assert!(matches!(s.close("F"), Err(FsError::NotOpen(_))));
        s.open("F", "-w").unwrap();
        assert!(matches!(s.open("F", "-x"), Err(FsError::InvalidMode(_))));
    }

    #[test]
    fn test_open_rejects_directory_and_missing() {
        let mut s = test_image::session(1, 100);
        s.mkdir("D").unwrap();
        assert!(matches!(s.open("D", "-r"), Err(FsError::IsADirectory(_))));
        assert!(matches!(s.open("NONE", "-r"), Err(FsError::NotFound(_))));
    }

    #[test]
    fn test_same_name_in_two_directories() {
        let mut s = test_image::session(1, 100);
        s.creat("F").unwrap();
        s.mkdir("SUB").unwrap();
        s.open("F", "-r").unwrap();
        s.cd("SUB").unwrap();
        s.creat("F").unwrap();
        s.open("F", "-r").unwrap();
        let paths: Vec<String> = s.lsof().map(|(_, h)| h.path.clone()).collect();
        assert_eq!(paths, vec!["/", "/SUB"]);
    }

    #[test]
    fn test_mode_is_enforced() {
        let mut s = test_image::session(1, 100);
        s.creat("F").unwrap();
        assert!(matches!(s.read("F", 1), Err(FsError::NotOpenOrWrongMode(_))));
        s.open("F", "-r").unwrap();
        assert!(matches!(s.write("F", b"x"), Err(FsError::NotOpenOrWrongMode(_))));
        s.close("F").unwrap();
        s.open("F", "-w").unwrap();
        s.write("F", b"x").unwrap();
        assert!(matches!(s.read("F", 1), Err(FsError::NotOpenOrWrongMode(_))));
    }

    #[test]
    fn test_offset_advances() {
        let mut s = test_image::session(1, 100);
        s.creat("F").unwrap();
        let id = s.open("F", "-rw").unwrap();
        s.write("F", b"abc").unwrap();
        s.write("F", b"def").unwrap();
        assert_eq!(s.open_files().get(id).unwrap().offset, 6);
        assert!(s.read("F", 10).unwrap().is_empty());

        s.lseek("F", 1).unwrap();
        assert_eq!(s.read("F", 2).unwrap(), b"bc");
        assert_eq!(s.read("F", 10).unwrap(), b"def");
        assert_eq!(s.open_files().get(id).unwrap().offset, 6);
    }

    #[test]
    fn test_lseek_bounds() {
        let mut s = test_image::session(1, 100);
        s.creat("F").unwrap();
        assert!(matches!(s.lseek("F", 0), Err(FsError::NotOpen(_))));
        s.open("F", "-rw").unwrap();
        s.write("F", b"12345").unwrap();
        s.lseek("F", 5).unwrap();
        assert!(matches!(
            s.lseek("F", 6),
            Err(FsError::OffsetExceedsSize { offset: 6, size: 5, .. })
        ));
    }

    #[test]
    fn test_rmdir_non_empty_changes_nothing() {
        let mut s = test_image::session(1, 100);
        s.mkdir("D").unwrap();
        s.cd("D").unwrap();
        s.creat("F").unwrap();
        s.cd("..").unwrap();

        let root = s.volume().root_cluster();
        let before = s.volume_mut().list_entries(root).unwrap();
        assert!(matches!(s.rmdir("D"), Err(FsError::DirectoryNotEmpty(_))));
        assert_eq!(s.volume_mut().list_entries(root).unwrap(), before);
        let dir = before[0].entry.first_cluster;
        assert_eq!(s.volume_mut().read_fat_entry(dir), FatLink::EndOfChain);
    }

    #[test]
    fn test_rmdir_rejections() {
        let mut s = test_image::session(1, 100);
        s.creat("F").unwrap();
        assert!(matches!(s.rmdir("F"), Err(FsError::NotADirectory(_))));
        assert!(matches!(s.rmdir(".."), Err(FsError::InvalidName(_))));
        assert!(matches!(s.rmdir("NONE"), Err(FsError::NotFound(_))));
    }

    #[test]
    fn test_rmdir_with_stale_open_handle() {
        let mut s = test_image::session(1, 100);
        s.mkdir("D").unwrap();
        s.cd("D").unwrap();
        s.creat("F").unwrap();
        s.open("F", "-r").unwrap();
        // エントリだけ消して、ハンドルは残す
        let cwd = s.volume().cwd_cluster();
        let found = s
            .volume_mut()
            .find_entry(cwd, &build_short_name("F"))
            .unwrap()
            .unwrap();
        s.volume_mut().delete_entry(found.location).unwrap();
        s.cd("..").unwrap();
        assert!(matches!(s.rmdir("D"), Err(FsError::FileIsOpen(_))));
    }

    #[test]
    fn test_mv_into_directory() {
        let mut s = test_image::session(1, 100);
        s.mkdir("BOX").unwrap();
        s.creat("ITEM").unwrap();
        s.open("ITEM", "-w").unwrap();
        s.write("ITEM", b"payload").unwrap();
        s.close("ITEM").unwrap();

        assert!(matches!(s.mv("ITEM", "BOX").unwrap(), MoveOutcome::MovedInto { .. }));
        assert_eq!(names(&mut s), vec!["BOX"]);
        s.cd("BOX").unwrap();
        s.open("ITEM", "-r").unwrap();
        assert_eq!(s.read("ITEM", 100).unwrap(), b"payload");
    }

    #[test]
    fn test_mv_refuses_duplicate_in_target() {
        let mut s = test_image::session(1, 100);
        s.mkdir("BOX").unwrap();
        s.cd("BOX").unwrap();
        s.creat("ITEM").unwrap();
        s.cd("..").unwrap();
        s.creat("ITEM").unwrap();
        assert!(matches!(s.mv("ITEM", "BOX"), Err(FsError::AlreadyExists(_))));
        assert!(matches!(s.mv("BOX", "ITEM"), Err(FsError::IsADirectory(_))));
    }

    #[test]
    fn test_rm_with_corrupt_chain_leaves_neighbours_intact() {
        let mut s = test_image::session(1, 100);
        for i in 0..10 {
            s.creat(&format!("F{i}")).unwrap();
        }
        s.open("F0", "-w").unwrap();
        s.write("F0", b"data").unwrap();
        s.close("F0").unwrap();

        let root = s.volume().root_cluster();
        let first = s
            .volume_mut()
            .find_entry(root, &build_short_name("F0"))
            .unwrap()
            .unwrap()
            .entry
            .first_cluster;
        // データ領域の外を指すリンク
        s.volume_mut().write_fat_entry(first, FatLink::Next(200)).unwrap();

        s.rm("F0").unwrap();
        let expected: Vec<String> = (1..10).map(|i| format!("F{i}")).collect();
        assert_eq!(names(&mut s), expected);
        assert_eq!(s.volume_mut().read_fat_entry(first), FatLink::Free);
    }

    #[test]
    fn test_unmount_closes_everything() {
        let mut s = test_image::session(1, 100);
        s.creat("F").unwrap();
        s.open("F", "-r").unwrap();
        s.unmount();
        assert!(s.open_files().is_empty());
        assert!(!s.volume().is_mounted());
        assert!(matches!(s.mkdir("X"), Err(FsError::NotMounted)));
        s.unmount();
    }

    #[test]
    fn test_image_file_roundtrip() {
        let path = std::env::temp_dir().join(format!("imgfs-session-{}.img", std::process::id()));
        std::fs::write(&path, test_image::format(1, 200).into_inner()).unwrap();

        {
            let mut s = Session::mount(&path).unwrap();
            assert_eq!(s.image_name(), path.file_name().unwrap().to_string_lossy());
            s.mkdir("KEEP").unwrap();
            s.cd("KEEP").unwrap();
            s.creat("NOTE").unwrap();
            s.open("NOTE", "-w").unwrap();
            s.write("NOTE", b"persisted").unwrap();
            s.unmount();
        }

        let mut s = Session::mount(&path).unwrap();
        s.cd("KEEP").unwrap();
        s.open("NOTE", "-r").unwrap();
        assert_eq!(s.read("NOTE", 64).unwrap(), b"persisted");
        s.unmount();
        std::fs::remove_file(&path).unwrap();
    }
}

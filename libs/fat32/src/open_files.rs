// open_files.rs - 開いているファイルの管理
//
// 最大 MAX_OPEN_FILES 個の固定スロット。ファイルの同一性は
// (先頭クラスタ, 短い名前, 親ディレクトリの絶対パス) の 3 つ組で判定する。
// 書き込み前の空ファイルはどれも先頭クラスタ 0 なので、クラスタだけでは区別できない。
//
// rm / rmdir / mv はここを見て、開いているファイルへの破壊的操作を拒否する。

use core::fmt;

use imgfs_fat_core::{short_name_to_string, SHORT_NAME_LEN};

use crate::error::{FsError, Result};

/// 同時に開けるファイル数
pub const MAX_OPEN_FILES: usize = 10;

// =================================================================
// 権限ビット
// =================================================================

bitflags::bitflags! {
    /// ハンドルの読み書き権限
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OpenMode: u8 {
        const READ = 0b01;
        const WRITE = 0b10;
    }
}

impl OpenMode {
    /// open コマンドのフラグ（-r / -w / -rw / -wr）を解釈する
    pub fn parse_flag(flag: &str) -> Result<Self> {
        match flag {
            "-r" => Ok(OpenMode::READ),
            "-w" => Ok(OpenMode::WRITE),
            "-rw" | "-wr" => Ok(OpenMode::READ | OpenMode::WRITE),
            _ => Err(FsError::InvalidMode(flag.to_string())),
        }
    }

    pub fn label(self) -> &'static str {
        match (self.contains(OpenMode::READ), self.contains(OpenMode::WRITE)) {
            (true, true) => "rw",
            (true, false) => "r",
            (false, true) => "w",
            (false, false) => "-",
        }
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// =================================================================
// ハンドル
// =================================================================

/// テーブル内のスロット番号
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct HandleId(pub usize);

/// 開いているファイル 1 個分
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenFileHandle {
    pub short_name: [u8; SHORT_NAME_LEN],
    /// 親ディレクトリの絶対パス
    pub path: String,
    /// 最初の書き込みで 0 から確保済みクラスタに書き換わる
    pub start_cluster: u32,
    pub mode: OpenMode,
    /// ファイルポインタ
    pub offset: u32,
}

impl OpenFileHandle {
    pub fn name(&self) -> String {
        short_name_to_string(&self.short_name)
    }

    fn matches(&self, start_cluster: u32, path: &str, short_name: &[u8; SHORT_NAME_LEN]) -> bool {
        self.start_cluster == start_cluster && &self.short_name == short_name && self.path == path
    }
}

// =================================================================
// テーブル
// =================================================================

/// 固定長のオープンファイルテーブル
#[derive(Debug)]
pub struct OpenFileTable {
    slots: [Option<OpenFileHandle>; MAX_OPEN_FILES],
}

impl Default for OpenFileTable {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenFileTable {
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| None),
        }
    }

    /// ファイルを開いて空きスロットに登録する
    ///
    /// # 引数
    /// - `short_name`: 11 バイトの短い名前
    /// - `mode`: 読み書き権限
    /// - `start_cluster`: ファイルの先頭クラスタ（未確保なら 0）
    /// - `path`: 親ディレクトリの絶対パス
    ///
    /// # 戻り値
    /// 登録したスロット番号。同じファイルが開いていれば AlreadyOpen、満杯なら TooManyOpenFiles
    pub fn open(
        &mut self,
        short_name: [u8; SHORT_NAME_LEN],
        mode: OpenMode,
        start_cluster: u32,
        path: &str,
    ) -> Result<HandleId> {
        if self.lookup(start_cluster, path, &short_name).is_some() {
            return Err(FsError::AlreadyOpen(short_name_to_string(&short_name)));
        }
        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(FsError::TooManyOpenFiles(MAX_OPEN_FILES))?;
        self.slots[index] = Some(OpenFileHandle {
            short_name,
            path: path.to_string(),
            start_cluster,
            mode,
            offset: 0,
        });
        log::debug!("opened '{}' in {} as handle {index}", short_name_to_string(&short_name), path);
        Ok(HandleId(index))
    }

    /// 3 つ組が一致するハンドルを閉じる
    pub fn close(
        &mut self,
        start_cluster: u32,
        path: &str,
        short_name: &[u8; SHORT_NAME_LEN],
    ) -> Result<HandleId> {
        let id = self
            .lookup(start_cluster, path, short_name)
            .ok_or_else(|| FsError::NotOpen(short_name_to_string(short_name)))?;
        self.slots[id.0] = None;
        log::debug!("closed handle {}", id.0);
        Ok(id)
    }

    /// 3 つ組が一致するハンドルのスロット番号
    pub fn lookup(
        &self,
        start_cluster: u32,
        path: &str,
        short_name: &[u8; SHORT_NAME_LEN],
    ) -> Option<HandleId> {
        self.slots
            .iter()
            .position(|slot| {
                slot.as_ref()
                    .is_some_and(|h| h.matches(start_cluster, path, short_name))
            })
            .map(HandleId)
    }

    pub fn get(&self, id: HandleId) -> Option<&OpenFileHandle> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: HandleId) -> Option<&mut OpenFileHandle> {
        self.slots.get_mut(id.0).and_then(Option::as_mut)
    }

    /// `dir_path` 配下（そのディレクトリ自身を含む）で開いているファイルがあるか
    pub fn any_under(&self, dir_path: &str) -> bool {
        self.iter().any(|(_, h)| {
            h.path == dir_path
                || h.path
                    .strip_prefix(dir_path)
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }

    /// 使用中のスロットを番号順に返す
    pub fn iter(&self) -> impl Iterator<Item = (HandleId, &OpenFileHandle)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|h| (HandleId(i), h)))
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// すべて閉じる。閉じた数を返す
    pub fn close_all(&mut self) -> usize {
        let mut closed = 0;
        for slot in self.slots.iter_mut() {
            if slot.take().is_some() {
                closed += 1;
            }
        }
        if closed > 0 {
            log::debug!("closed {closed} remaining handle(s)");
        }
        closed
    }
}

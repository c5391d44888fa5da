//! キー付きJSON保存モジュール
//!
//! データディレクトリ直下に `<key>.json` として値を丸ごと保存する。
//! 書き込みは一時ファイル経由の置き換えで、途中状態のファイルは残らない。

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// 検査履歴のキー
pub const RECORDS_KEY: &str = "qc_records";
/// アプリ設定のキー
pub const SETTINGS_KEY: &str = "app_settings";

#[derive(Debug, Clone)]
pub struct JsonStore {
    dir: PathBuf,
}

impl JsonStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    pub fn exists(&self, key: &str) -> bool {
        self.path_for(key).exists()
    }

    /// 値を読み込む
    ///
    /// ファイルが無い・読めない・壊れている場合は None（エラーにしない）
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let path = self.path_for(key);
        if !path.exists() {
            return None;
        }

        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) => {
                log::warn!("{} を開けません: {}", path.display(), e);
                return None;
            }
        };

        match serde_json::from_reader(BufReader::new(file)) {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("{} が破損しています（無視します）: {}", path.display(), e);
                None
            }
        }
    }

    /// 値を丸ごと置き換えて保存
    pub fn save<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;

        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        serde_json::to_writer_pretty(&mut tmp, value)?;
        tmp.flush()?;
        tmp.persist(self.path_for(key)).map_err(|e| e.error)?;
        Ok(())
    }

    /// 値を削除
    ///
    /// # Returns
    /// 削除した場合 true、元々無かった場合 false
    pub fn remove(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key);
        if path.exists() {
            std::fs::remove_file(path)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

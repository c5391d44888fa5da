//! アプリ設定
//!
//! カタログ・バックエンド選択・撮影/スケジューラ設定をまとめて
//! データディレクトリの `app_settings.json` に保存する。

use crate::backend::{BackendConfig, BackendOptions, DEFAULT_TIMEOUT_SECS};
use crate::capture::{CameraConfig, CaptureProfile};
use crate::error::{QcError, Result};
use crate::history::DEFAULT_HISTORY_CAP;
use crate::storage::{JsonStore, SETTINGS_KEY};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use steel_qc_common::Catalog;

/// データディレクトリを上書きする環境変数
pub const HOME_ENV: &str = "STEEL_QC_HOME";
/// クラウドAPIキーの環境変数
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

/// 連続撮影の既定周期（秒）
pub const DEFAULT_INTERVAL_SECS: u64 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub catalog: Catalog,
    pub backend: BackendConfig,
    pub camera: CameraConfig,
    pub capture_profiles: Vec<CaptureProfile>,
    /// カメラが使えないとき疑似映像に切り替えるか
    pub allow_simulated: bool,
    pub interval_seconds: u64,
    pub history_cap: usize,
    /// 撮影画像を frames/ に保存するか
    pub keep_frames: bool,
    pub timeout_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub cloud_base_url: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            catalog: Catalog::default(),
            backend: BackendConfig::default(),
            camera: CameraConfig::default(),
            capture_profiles: CaptureProfile::default_chain(),
            allow_simulated: true,
            interval_seconds: DEFAULT_INTERVAL_SECS,
            history_cap: DEFAULT_HISTORY_CAP,
            keep_frames: true,
            timeout_seconds: DEFAULT_TIMEOUT_SECS,
            api_key: None,
            cloud_base_url: crate::backend::DEFAULT_CLOUD_BASE_URL.to_string(),
        }
    }
}

impl Settings {
    /// 保存済み設定を読み込む
    ///
    /// 無い・壊れている・検証に通らない場合は既定値
    pub fn load(store: &JsonStore) -> Self {
        let Some(settings) = store.load::<Settings>(SETTINGS_KEY) else {
            return Self::default();
        };

        match settings.validate() {
            Ok(()) => settings,
            Err(e) => {
                log::warn!("保存済み設定が不正なため既定値を使用します: {}", e);
                Self::default()
            }
        }
    }

    /// 検証してから保存
    pub fn save(&self, store: &JsonStore) -> Result<()> {
        self.validate()?;
        store.save(SETTINGS_KEY, self)
    }

    /// JSONファイルから設定を取り込む（保存はしない）
    pub fn import(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval_seconds == 0 {
            return Err(QcError::Config("撮影周期は1秒以上にしてください".into()));
        }
        if self.history_cap == 0 {
            return Err(QcError::Config("履歴上限は1件以上にしてください".into()));
        }
        if self.timeout_seconds == 0 {
            return Err(QcError::Config("タイムアウトは1秒以上にしてください".into()));
        }
        if self.backend.model().trim().is_empty() {
            return Err(QcError::Config("モデル名が空です".into()));
        }
        if let BackendConfig::LocalHttp {
            endpoint,
            pull_endpoint,
            ..
        } = &self.backend
        {
            check_url(endpoint, "推論エンドポイント")?;
            check_url(pull_endpoint, "取得エンドポイント")?;
        }
        if let CameraConfig::HttpSnapshot { url } = &self.camera {
            check_url(url, "カメラURL")?;
        }
        check_url(&self.cloud_base_url, "クラウドAPIのURL")?;
        Ok(())
    }

    /// APIキー（環境変数を優先）
    pub fn get_api_key(&self) -> Option<String> {
        pick_api_key(std::env::var(API_KEY_ENV).ok(), self.api_key.as_deref())
    }

    pub fn set_api_key(&mut self, key: String, store: &JsonStore) -> Result<()> {
        self.api_key = Some(key);
        self.save(store)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn backend_options(&self, data_dir: &Path) -> BackendOptions {
        BackendOptions {
            timeout: self.timeout(),
            api_key: self.get_api_key(),
            cloud_base_url: self.cloud_base_url.clone(),
            models_dir: models_dir(data_dir),
        }
    }
}

fn check_url(url: &str, label: &str) -> Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(QcError::Config(format!("{}が不正です: {}", label, url)))
    }
}

fn pick_api_key(env: Option<String>, stored: Option<&str>) -> Option<String> {
    env.filter(|k| !k.trim().is_empty())
        .or_else(|| stored.filter(|k| !k.trim().is_empty()).map(str::to_string))
}

/// データディレクトリを決める
///
/// 優先順位: `STEEL_QC_HOME` → `--data-dir` → OSのデータディレクトリ/steel-qc
pub fn resolve_data_dir(cli_override: Option<&Path>) -> Result<PathBuf> {
    pick_data_dir(std::env::var_os(HOME_ENV).map(PathBuf::from), cli_override, dirs::data_dir())
}

fn pick_data_dir(env: Option<PathBuf>, cli: Option<&Path>, platform: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = env.filter(|d| !d.as_os_str().is_empty()) {
        return Ok(dir);
    }
    if let Some(dir) = cli {
        return Ok(dir.to_path_buf());
    }
    platform
        .map(|d| d.join("steel-qc"))
        .ok_or_else(|| QcError::Config("データディレクトリが見つかりません".into()))
}

/// 撮影画像の保存先
pub fn frames_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("frames")
}

/// in-process エンジンのモデル置き場
pub fn models_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("models")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_is_valid() {
        let settings = Settings::default();
        settings.validate().expect("既定値の検証失敗");
        assert_eq!(settings.interval(), Duration::from_secs(5));
        assert_eq!(settings.history_cap, 100);
        assert_eq!(settings.capture_profiles.len(), 3);
    }

    #[test]
    fn test_load_missing_returns_default() {
        let dir = tempdir().expect("Failed to create temp dir");
        let settings = Settings::load(&JsonStore::new(dir.path()));
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().expect("Failed to create temp dir");
        let store = JsonStore::new(dir.path());

        let mut settings = Settings::default();
        settings.backend = BackendConfig::cloud();
        settings.interval_seconds = 12;
        settings.camera = CameraConfig::HttpSnapshot {
            url: "http://192.168.0.10/snapshot.jpg".to_string(),
        };
        settings.save(&store).expect("保存失敗");

        assert_eq!(Settings::load(&store), settings);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings: Settings = serde_json::from_str(r#"{"intervalSeconds": 30}"#).unwrap();
        assert_eq!(settings.interval_seconds, 30);
        assert_eq!(settings.catalog, Catalog::default());
        assert!(settings.allow_simulated);
    }

    #[test]
    fn test_save_rejects_invalid() {
        let dir = tempdir().expect("Failed to create temp dir");
        let store = JsonStore::new(dir.path());

        let settings = Settings {
            interval_seconds: 0,
            ..Settings::default()
        };
        assert!(matches!(settings.save(&store), Err(QcError::Config(_))));
        assert!(!store.exists(SETTINGS_KEY));
    }

    #[test]
    fn test_invalid_saved_settings_fall_back_to_default() {
        let dir = tempdir().expect("Failed to create temp dir");
        let store = JsonStore::new(dir.path());
        store
            .save(SETTINGS_KEY, &serde_json::json!({"historyCap": 0}))
            .expect("保存失敗");

        assert_eq!(Settings::load(&store), Settings::default());
    }

    #[test]
    fn test_import_rejects_empty_catalog() {
        let dir = tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"catalog": {"grades": [], "defectTypes": []}}"#).unwrap();

        assert!(Settings::import(&path).is_err());
    }

    #[test]
    fn test_import_custom_catalog() {
        let dir = tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"catalog": {"grades": [{"id": "a", "name": "A"}, {"id": "b", "name": "B"}], "defectTypes": []}}"#,
        )
        .unwrap();

        let settings = Settings::import(&path).expect("取り込み失敗");
        assert_eq!(settings.catalog.grade_names(), vec!["A", "B"]);
    }

    #[test]
    fn test_bad_endpoint_rejected() {
        let settings = Settings {
            backend: BackendConfig::LocalHttp {
                endpoint: "localhost:11434".to_string(),
                pull_endpoint: "http://localhost:11434/api/pull".to_string(),
                model_name: "llava".to_string(),
            },
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    // ============================================
    // 環境変数の優先順位
    // ============================================

    #[test]
    fn test_pick_api_key_prefers_env() {
        assert_eq!(pick_api_key(Some("env".into()), Some("stored")), Some("env".to_string()));
        assert_eq!(pick_api_key(None, Some("stored")), Some("stored".to_string()));
        assert_eq!(pick_api_key(Some("".into()), Some("stored")), Some("stored".to_string()));
        assert_eq!(pick_api_key(None, Some(" ")), None);
    }

    #[test]
    fn test_pick_data_dir_order() {
        let env = Some(PathBuf::from("/env"));
        let cli = Path::new("/cli");
        let platform = Some(PathBuf::from("/data"));

        assert_eq!(pick_data_dir(env, Some(cli), platform.clone()).unwrap(), PathBuf::from("/env"));
        assert_eq!(pick_data_dir(None, Some(cli), platform.clone()).unwrap(), PathBuf::from("/cli"));
        assert_eq!(pick_data_dir(None, None, platform).unwrap(), PathBuf::from("/data/steel-qc"));
        assert!(pick_data_dir(None, None, None).is_err());
    }
}

//! カメラデバイス
//!
//! 撮影プロファイルを受け取ってストリームを開く。開けなければエラーを返し、
//! 呼び出し側（CaptureSource）が次のプロファイルを試す。

use super::CaptureProfile;
use crate::error::{QcError, Result};
use async_trait::async_trait;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// カメラ設定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum CameraConfig {
    /// IPカメラのスナップショットURL
    HttpSnapshot { url: String },
    /// 静止画ファイル（撮影のたびに読み直す）
    File { path: PathBuf },
    /// カメラなし
    #[default]
    None,
}

impl CameraConfig {
    pub fn describe(&self) -> String {
        match self {
            CameraConfig::HttpSnapshot { url } => format!("IPカメラ ({})", url),
            CameraConfig::File { path } => format!("画像ファイル ({})", path.display()),
            CameraConfig::None => "なし".to_string(),
        }
    }
}

/// 開いている映像ストリーム
#[async_trait]
pub trait FrameStream: Send + Sync {
    /// 現在の映像を1枚取得
    async fn snapshot(&mut self) -> Result<RgbImage>;

    /// ハードウェアを解放する（何度呼んでもよい）
    fn close(&mut self);
}

#[async_trait]
pub trait CameraDevice: Send + Sync {
    fn name(&self) -> &str;

    async fn open(&self, profile: &CaptureProfile) -> Result<Box<dyn FrameStream>>;
}

pub fn build_camera(config: &CameraConfig, timeout: Duration) -> Result<Box<dyn CameraDevice>> {
    Ok(match config {
        CameraConfig::HttpSnapshot { url } => Box::new(HttpSnapshotCamera::new(url.clone(), timeout)?),
        CameraConfig::File { path } => Box::new(FileCamera::new(path.clone())),
        CameraConfig::None => Box::new(NoCamera),
    })
}

// ============================================
// IPカメラ
// ============================================

pub struct HttpSnapshotCamera {
    client: reqwest::Client,
    url: String,
}

impl HttpSnapshotCamera {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| QcError::Config(format!("HTTPクライアントを作成できません: {}", e)))?;
        Ok(Self { client, url: url.into() })
    }
}

fn profile_query(profile: &CaptureProfile) -> Vec<(&'static str, String)> {
    let mut query = Vec::new();
    if let Some(width) = profile.ideal_width {
        query.push(("width", width.to_string()));
    }
    if let Some(height) = profile.ideal_height {
        query.push(("height", height.to_string()));
    }
    if let Some(facing) = profile.facing {
        query.push(("facing", facing.as_str().to_string()));
    }
    query
}

async fn fetch_snapshot(client: &reqwest::Client, url: &str, query: &[(&'static str, String)]) -> Result<RgbImage> {
    let response = client
        .get(url)
        .query(query)
        .send()
        .await
        .map_err(|e| QcError::DeviceUnavailable(format!("{}: {}", url, e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(QcError::DeviceUnavailable(format!("{}: HTTP {}", url, status)));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| QcError::DeviceUnavailable(format!("{}: {}", url, e)))?;
    let image = image::load_from_memory(&bytes)
        .map_err(|e| QcError::DeviceUnavailable(format!("{}: 画像として読めません: {}", url, e)))?;
    Ok(image.to_rgb8())
}

#[async_trait]
impl CameraDevice for HttpSnapshotCamera {
    fn name(&self) -> &str {
        "http-snapshot"
    }

    async fn open(&self, profile: &CaptureProfile) -> Result<Box<dyn FrameStream>> {
        let query = profile_query(profile);
        // 1枚取得できれば開けたとみなす
        fetch_snapshot(&self.client, &self.url, &query).await?;

        Ok(Box::new(HttpSnapshotStream {
            client: self.client.clone(),
            url: self.url.clone(),
            query,
            closed: false,
        }))
    }
}

struct HttpSnapshotStream {
    client: reqwest::Client,
    url: String,
    query: Vec<(&'static str, String)>,
    closed: bool,
}

#[async_trait]
impl FrameStream for HttpSnapshotStream {
    async fn snapshot(&mut self) -> Result<RgbImage> {
        if self.closed {
            return Err(QcError::DeviceUnavailable("ストリームは解放済みです".to_string()));
        }
        fetch_snapshot(&self.client, &self.url, &self.query).await
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

// ============================================
// 画像ファイル
// ============================================

pub struct FileCamera {
    path: PathBuf,
}

impl FileCamera {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

async fn read_image(path: &Path) -> Result<RgbImage> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| QcError::DeviceUnavailable(format!("{}: {}", path.display(), e)))?;
    let image = image::load_from_memory(&bytes)
        .map_err(|e| QcError::DeviceUnavailable(format!("{}: 画像として読めません: {}", path.display(), e)))?;
    Ok(image.to_rgb8())
}

#[async_trait]
impl CameraDevice for FileCamera {
    fn name(&self) -> &str {
        "file"
    }

    async fn open(&self, _profile: &CaptureProfile) -> Result<Box<dyn FrameStream>> {
        read_image(&self.path).await?;
        Ok(Box::new(FileStream {
            path: self.path.clone(),
            closed: false,
        }))
    }
}

struct FileStream {
    path: PathBuf,
    closed: bool,
}

#[async_trait]
impl FrameStream for FileStream {
    async fn snapshot(&mut self) -> Result<RgbImage> {
        if self.closed {
            return Err(QcError::DeviceUnavailable("ストリームは解放済みです".to_string()));
        }
        read_image(&self.path).await
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

// ============================================
// カメラなし
// ============================================

pub struct NoCamera;

#[async_trait]
impl CameraDevice for NoCamera {
    fn name(&self) -> &str {
        "none"
    }

    async fn open(&self, _profile: &CaptureProfile) -> Result<Box<dyn FrameStream>> {
        Err(QcError::DeviceUnavailable("カメラが設定されていません".to_string()))
    }
}

//! 映像取得モジュール（CaptureSource）
//!
//! 撮影プロファイルを順に試してカメラを開き、どれも開けなければ
//! 疑似映像に切り替える。静止画は `capture()` でいつでも取り出せる。

mod device;
mod frame;
mod simulated;

pub use device::{build_camera, CameraConfig, CameraDevice, FileCamera, FrameStream, HttpSnapshotCamera, NoCamera};
pub use frame::{Frame, JPEG_QUALITY};
pub use simulated::{SimulatedFeed, SIMULATED_HEIGHT, SIMULATED_WIDTH};

use crate::error::{QcError, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

/// カメラの向き
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    Environment,
    User,
}

impl FacingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FacingMode::Environment => "environment",
            FacingMode::User => "user",
        }
    }
}

/// 撮影プロファイル（カメラを開くときの希望条件）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureProfile {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facing: Option<FacingMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ideal_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ideal_height: Option<u32>,
}

impl CaptureProfile {
    pub fn unconstrained(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            facing: None,
            ideal_width: None,
            ideal_height: None,
        }
    }

    /// 既定の試行順: 背面FullHD → 背面 → 制約なし
    pub fn default_chain() -> Vec<Self> {
        vec![
            Self {
                label: "rear-fullhd".to_string(),
                facing: Some(FacingMode::Environment),
                ideal_width: Some(1920),
                ideal_height: Some(1080),
            },
            Self {
                label: "rear".to_string(),
                facing: Some(FacingMode::Environment),
                ideal_width: None,
                ideal_height: None,
            },
            Self::unconstrained("any"),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Idle,
    Requesting,
    Streaming,
    Simulated,
    Error,
}

impl SourceState {
    /// 静止画を取り出せる状態か
    pub fn is_capturable(&self) -> bool {
        matches!(self, SourceState::Streaming | SourceState::Simulated)
    }
}

impl fmt::Display for SourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SourceState::Idle => "idle",
            SourceState::Requesting => "requesting",
            SourceState::Streaming => "streaming",
            SourceState::Simulated => "simulated",
            SourceState::Error => "error",
        };
        write!(f, "{}", s)
    }
}

pub struct CaptureSource {
    device: Box<dyn CameraDevice>,
    profiles: Vec<CaptureProfile>,
    allow_simulated: bool,
    feed: SimulatedFeed,
    state: SourceState,
    stream: Option<Box<dyn FrameStream>>,
    active_profile: Option<String>,
    last_error: Option<String>,
}

impl CaptureSource {
    /// プロファイルが空なら既定の試行順を使う
    pub fn new(device: Box<dyn CameraDevice>, profiles: Vec<CaptureProfile>, allow_simulated: bool) -> Self {
        let profiles = if profiles.is_empty() {
            CaptureProfile::default_chain()
        } else {
            profiles
        };

        Self {
            device,
            profiles,
            allow_simulated,
            feed: SimulatedFeed::default(),
            state: SourceState::Idle,
            stream: None,
            active_profile: None,
            last_error: None,
        }
    }

    pub fn with_feed(mut self, feed: SimulatedFeed) -> Self {
        self.feed = feed;
        self
    }

    pub fn state(&self) -> SourceState {
        self.state
    }

    /// 開けたプロファイル名（Streaming のときのみ）
    pub fn active_profile(&self) -> Option<&str> {
        self.active_profile.as_deref()
    }

    /// 直近のプロファイル失敗理由
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn device_name(&self) -> &str {
        self.device.name()
    }

    /// プロファイルを順に試してカメラを開く
    ///
    /// Error・Simulated・Streaming からの再実行も可能（保持中のハンドルは先に解放）
    pub async fn activate(&mut self) -> SourceState {
        self.release_handle();
        self.state = SourceState::Requesting;
        self.last_error = None;

        for profile in &self.profiles {
            match self.device.open(profile).await {
                Ok(stream) => {
                    log::info!("📷 カメラを開きました: {} ({})", self.device.name(), profile.label);
                    self.stream = Some(stream);
                    self.active_profile = Some(profile.label.clone());
                    self.state = SourceState::Streaming;
                    return self.state;
                }
                Err(e) => {
                    log::warn!("プロファイル {} で開けません: {}", profile.label, e);
                    self.last_error = Some(e.to_string());
                }
            }
        }

        self.state = if self.allow_simulated {
            log::warn!("⚠️ カメラを利用できないため疑似映像に切り替えます");
            SourceState::Simulated
        } else {
            log::error!("カメラを利用できません（疑似映像は無効）");
            SourceState::Error
        };
        self.state
    }

    /// 現在の映像を静止画として取り出す（状態は変えない）
    ///
    /// Streaming 中の取得失敗は、疑似映像が有効なら疑似フレームで代替する
    pub async fn capture(&mut self) -> Result<Frame> {
        match self.state {
            SourceState::Streaming => {
                let stream = self
                    .stream
                    .as_mut()
                    .ok_or_else(|| QcError::DeviceUnavailable("ストリームがありません".to_string()))?;
                match stream.snapshot().await {
                    Ok(image) => Frame::from_image(&image, Utc::now(), false),
                    Err(e) if self.allow_simulated => {
                        // 1枚だけ疑似映像で代替し、ストリームは保持する
                        log::warn!("⚠️ 撮影に失敗したため疑似映像で代替します: {}", e);
                        self.last_error = Some(e.to_string());
                        let now = Utc::now();
                        Frame::from_image(&self.feed.render(now), now, true)
                    }
                    Err(e) => Err(e),
                }
            }
            SourceState::Simulated => {
                let now = Utc::now();
                Frame::from_image(&self.feed.render(now), now, true)
            }
            state => Err(QcError::DeviceUnavailable(format!("映像を取得できない状態です: {}", state))),
        }
    }

    /// ハードウェアを解放して Idle に戻す
    pub fn release(&mut self) {
        self.release_handle();
        self.state = SourceState::Idle;
    }

    fn release_handle(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.close();
            log::debug!("カメラを解放しました");
        }
        self.active_profile = None;
    }
}

impl Drop for CaptureSource {
    fn drop(&mut self) {
        self.release_handle();
    }
}

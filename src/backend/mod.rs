//! 推論バックエンド（BackendAdapter）
//!
//! 1枚の静止画とカタログから判定依頼を組み立て、設定で選ばれた
//! バックエンドに送って生の応答テキストを返す。応答の検証は normalizer 側。

mod cloud;
mod http;
mod inprocess;
pub mod labels;

pub use cloud::{CloudBackend, DEFAULT_CLOUD_BASE_URL};
pub use http::{pull_events, HttpBackend, PullDecoder, PullEvent, PullStream};
pub use inprocess::{default_loader, EngineContext, EngineLoader, InProcessBackend, LoadProgress, LocalEngine};

use crate::capture::Frame;
use crate::error::BackendError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use steel_qc_common::Catalog;

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// 既定のリクエストタイムアウト（秒）
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

pub const DEFAULT_INPROCESS_MODEL: &str = "steel-grade-v1";
pub const DEFAULT_HTTP_ENDPOINT: &str = "http://localhost:11434/api/generate";
pub const DEFAULT_PULL_ENDPOINT: &str = "http://localhost:11434/api/pull";
pub const DEFAULT_HTTP_MODEL: &str = "llava";
pub const DEFAULT_CLOUD_MODEL: &str = "gemini-2.5-flash";

/// バックエンド選択（同時に有効なのは1つ）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum BackendConfig {
    LocalInprocess {
        model_id: String,
    },
    LocalHttp {
        endpoint: String,
        pull_endpoint: String,
        model_name: String,
    },
    Cloud {
        model_name: String,
    },
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::local_http()
    }
}

impl BackendConfig {
    pub fn local_inprocess() -> Self {
        BackendConfig::LocalInprocess {
            model_id: DEFAULT_INPROCESS_MODEL.to_string(),
        }
    }

    pub fn local_http() -> Self {
        BackendConfig::LocalHttp {
            endpoint: DEFAULT_HTTP_ENDPOINT.to_string(),
            pull_endpoint: DEFAULT_PULL_ENDPOINT.to_string(),
            model_name: DEFAULT_HTTP_MODEL.to_string(),
        }
    }

    pub fn cloud() -> Self {
        BackendConfig::Cloud {
            model_name: DEFAULT_CLOUD_MODEL.to_string(),
        }
    }

    /// 種別名から既定値で生成
    pub fn from_kind(kind: &str) -> Option<Self> {
        match kind {
            "local-inprocess" => Some(Self::local_inprocess()),
            "local-http" => Some(Self::local_http()),
            "cloud" => Some(Self::cloud()),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            BackendConfig::LocalInprocess { .. } => "local-inprocess",
            BackendConfig::LocalHttp { .. } => "local-http",
            BackendConfig::Cloud { .. } => "cloud",
        }
    }

    /// モデル名（in-process ではモデルID）
    pub fn model(&self) -> &str {
        match self {
            BackendConfig::LocalInprocess { model_id } => model_id,
            BackendConfig::LocalHttp { model_name, .. } => model_name,
            BackendConfig::Cloud { model_name } => model_name,
        }
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        let model = model.into();
        match self {
            BackendConfig::LocalInprocess { model_id } => *model_id = model,
            BackendConfig::LocalHttp { model_name, .. } => *model_name = model,
            BackendConfig::Cloud { model_name } => *model_name = model,
        }
    }
}

/// バックエンドが返した生の応答
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub backend: String,
    pub body: String,
}

#[async_trait]
pub trait InferenceBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn classify(&self, frame: &Frame, catalog: &Catalog) -> BackendResult<RawResponse>;
}

/// バックエンド生成に必要な周辺設定
#[derive(Debug, Clone)]
pub struct BackendOptions {
    pub timeout: Duration,
    pub api_key: Option<String>,
    pub cloud_base_url: String,
    /// in-process エンジンのモデル置き場
    pub models_dir: PathBuf,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            api_key: None,
            cloud_base_url: DEFAULT_CLOUD_BASE_URL.to_string(),
            models_dir: PathBuf::from("models"),
        }
    }
}

pub(crate) fn http_client(timeout: Duration) -> BackendResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| BackendError::Unreachable(format!("HTTPクライアントを作成できません: {}", e)))
}

/// エラー応答の本文（読めなければ空文字列）
pub(crate) async fn error_body(response: reqwest::Response) -> String {
    match response.text().await {
        Ok(body) => body,
        Err(e) => {
            log::warn!("エラー応答の本文を読めません: {}", e);
            String::new()
        }
    }
}

/// 設定から一度だけバックエンドを組み立てる
pub fn build_backend(config: &BackendConfig, options: &BackendOptions) -> BackendResult<Box<dyn InferenceBackend>> {
    let backend: Box<dyn InferenceBackend> = match config {
        BackendConfig::LocalInprocess { model_id } => {
            Box::new(InProcessBackend::new(engine_context(model_id, options)))
        }
        BackendConfig::LocalHttp {
            endpoint,
            pull_endpoint,
            model_name,
        } => Box::new(HttpBackend::new(
            endpoint.clone(),
            pull_endpoint.clone(),
            model_name.clone(),
            options.timeout,
        )?),
        BackendConfig::Cloud { model_name } => Box::new(CloudBackend::new(
            options.cloud_base_url.clone(),
            model_name.clone(),
            options.api_key.clone(),
            options.timeout,
        )?),
    };
    Ok(backend)
}

/// in-process エンジンのコンテキスト（未読み込み）
pub fn engine_context(model_id: &str, options: &BackendOptions) -> Arc<EngineContext> {
    Arc::new(EngineContext::new(model_id, default_loader(&options.models_dir)))
}

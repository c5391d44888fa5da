use thiserror::Error;

#[derive(Error, Debug)]
pub enum QcError {
    #[error("設定エラー: {0}")]
    Config(String),

    #[error("カメラを利用できません: {0}")]
    DeviceUnavailable(String),

    #[error("画像処理エラー: {0}")]
    Image(#[from] image::ImageError),

    #[error("推論バックエンドエラー: {0}")]
    Backend(#[from] BackendError),

    #[error("保存エラー: {0}")]
    Storage(String),

    #[error("JSON解析エラー: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IOエラー: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Common(#[from] steel_qc_common::Error),
}

pub type Result<T> = std::result::Result<T, QcError>;

/// 推論バックエンド呼び出しの失敗
///
/// パイプライン上ではどれも致命的ではなく、フォールバックレコードになる
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("バックエンドに接続できません: {0}")]
    Unreachable(String),

    #[error("バックエンドがエラーを返しました (HTTP {status}): {body}")]
    Status { status: u16, body: String },

    #[error("バックエンドの応答が不正です: {0}")]
    MalformedResponse(String),

    #[error("APIキーが設定されていません。`steel-qc config --set-api-key YOUR_KEY` または GEMINI_API_KEY で設定してください")]
    MissingApiKey,

    #[error("推論エンジンを初期化できません: {0}")]
    EngineUnavailable(String),

    #[error("モデルの取得に失敗: {0}")]
    PullFailed(String),
}

impl BackendError {
    /// 障害の分類名（フォールバック欠陥の種別名に使う）
    pub fn kind(&self) -> &'static str {
        match self {
            BackendError::MalformedResponse(_) => "MalformedResponse",
            BackendError::EngineUnavailable(_) => "EngineUnavailable",
            BackendError::MissingApiKey => "MissingApiKey",
            BackendError::Unreachable(_) | BackendError::Status { .. } | BackendError::PullFailed(_) => {
                "BackendUnreachable"
            }
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            BackendError::MalformedResponse(e.to_string())
        } else if let Some(status) = e.status() {
            BackendError::Status {
                status: status.as_u16(),
                body: e.to_string(),
            }
        } else {
            BackendError::Unreachable(e.to_string())
        }
    }
}

impl From<steel_qc_common::Error> for BackendError {
    fn from(e: steel_qc_common::Error) -> Self {
        BackendError::MalformedResponse(e.to_string())
    }
}

//! クラウドAPI（Gemini generateContent）
//!
//! 画像をインラインで添付し、カタログから作った responseSchema で
//! 応答の形を固定する。

use super::{error_body, http_client, BackendResult, InferenceBackend, RawResponse};
use crate::capture::Frame;
use crate::error::BackendError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use steel_qc_common::{build_classification_prompt, build_response_schema, Catalog};

pub const DEFAULT_CLOUD_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini APIリクエスト
#[derive(Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part {
    Text { text: String },
    InlineData { inline_data: InlineData },
}

#[derive(Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "responseMimeType")]
    response_mime_type: String,
    #[serde(rename = "responseSchema")]
    response_schema: Value,
}

/// Gemini APIレスポンス
#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: ResponseContent,
}

#[derive(Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

pub struct CloudBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl CloudBackend {
    pub fn new(base_url: String, model: String, api_key: Option<String>, timeout: Duration) -> BackendResult<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url,
            model,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        })
    }

    fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url.trim_end_matches('/'), self.model)
    }
}

fn build_request(frame: &Frame, catalog: &Catalog) -> GeminiRequest {
    GeminiRequest {
        contents: vec![Content {
            parts: vec![
                Part::InlineData {
                    inline_data: InlineData {
                        mime_type: "image/jpeg".to_string(),
                        data: frame.to_base64(),
                    },
                },
                Part::Text {
                    text: build_classification_prompt(catalog),
                },
            ],
        }],
        generation_config: GenerationConfig {
            temperature: 0.1,
            response_mime_type: "application/json".to_string(),
            response_schema: build_response_schema(catalog),
        },
    }
}

fn first_text(response: GeminiResponse) -> Option<String> {
    response
        .candidates
        .into_iter()
        .next()?
        .content
        .parts
        .into_iter()
        .find_map(|p| p.text)
        .filter(|t| !t.trim().is_empty())
}

#[async_trait]
impl InferenceBackend for CloudBackend {
    fn name(&self) -> &str {
        "cloud"
    }

    async fn classify(&self, frame: &Frame, catalog: &Catalog) -> BackendResult<RawResponse> {
        let api_key = self.api_key.as_deref().ok_or(BackendError::MissingApiKey)?;
        let request = build_request(frame, catalog);

        log::debug!("Gemini API呼び出し: model={}", self.model);
        let response = self
            .client
            .post(self.url())
            .query(&[("key", api_key)])
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = error_body(response).await;
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GeminiResponse = response.json().await?;
        let body = first_text(parsed).ok_or_else(|| BackendError::MalformedResponse("応答が空です".to_string()))?;

        Ok(RawResponse {
            backend: self.name().to_string(),
            body,
        })
    }
}

//! ローカル推論サーバー（HTTP）
//!
//! `POST {endpoint}` に画像とプロンプトを送り、`{"response": ...}` を受け取る。
//! モデル取得（pull）は改行区切りJSONの進捗ストリームとして読む。

use super::{error_body, http_client, BackendResult, InferenceBackend, RawResponse};
use crate::capture::Frame;
use crate::error::BackendError;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::time::Duration;
use steel_qc_common::{build_classification_prompt, Catalog};

/// モデル取得の進捗ストリーム（1回限り・有限）
pub type PullStream = BoxStream<'static, BackendResult<PullEvent>>;

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    images: Vec<String>,
    stream: bool,
    format: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Serialize)]
struct PullRequest<'a> {
    name: &'a str,
    stream: bool,
}

pub struct HttpBackend {
    client: reqwest::Client,
    endpoint: String,
    pull_endpoint: String,
    model: String,
}

impl HttpBackend {
    pub fn new(endpoint: String, pull_endpoint: String, model: String, timeout: Duration) -> BackendResult<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            endpoint,
            pull_endpoint,
            model,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// モデルを取得し、進捗を順に返すストリームを得る
    ///
    /// `{"status":"success"}` または `{"error":...}` で終わる
    pub async fn pull(&self, model: Option<&str>) -> BackendResult<PullStream> {
        let name = model.unwrap_or(&self.model);
        log::info!("モデル取得を開始: {} ({})", name, self.pull_endpoint);

        // 取得は長時間かかるため全体タイムアウトは掛けない
        let response = reqwest::Client::new()
            .post(&self.pull_endpoint)
            .json(&PullRequest { name, stream: true })
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

        Ok(pull_events(response.bytes_stream()))
    }
}

fn extract_response(value: Value) -> BackendResult<String> {
    match value {
        Value::String(s) => Ok(s),
        Value::Null => Err(BackendError::MalformedResponse("response が空です".to_string())),
        // format: "json" のサーバーはオブジェクトを直接返すことがある
        other => Ok(other.to_string()),
    }
}

#[async_trait]
impl InferenceBackend for HttpBackend {
    fn name(&self) -> &str {
        "local-http"
    }

    async fn classify(&self, frame: &Frame, catalog: &Catalog) -> BackendResult<RawResponse> {
        let request = GenerateRequest {
            model: &self.model,
            prompt: build_classification_prompt(catalog),
            images: vec![frame.to_base64()],
            stream: false,
            format: "json",
        };

        log::debug!("推論リクエスト: {} (model={})", self.endpoint, self.model);
        let response = self.client.post(&self.endpoint).json(&request).send().await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: GenerateResponse =
            serde_json::from_str(&text).map_err(|e| BackendError::MalformedResponse(e.to_string()))?;
        let body = match (parsed.response, parsed.error) {
            (Some(value), _) => extract_response(value)?,
            (None, Some(error)) => return Err(BackendError::MalformedResponse(error)),
            (None, None) => return Err(BackendError::MalformedResponse("response がありません".to_string())),
        };

        Ok(RawResponse {
            backend: self.name().to_string(),
            body,
        })
    }
}

// ============================================
// モデル取得の進捗
// ============================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PullEvent {
    pub status: String,
    #[serde(default)]
    pub completed: Option<u64>,
    #[serde(default)]
    pub total: Option<u64>,
}

impl PullEvent {
    /// 進捗率（%）。total が無い・0 の場合は None
    pub fn percent(&self) -> Option<f64> {
        match (self.completed, self.total) {
            (Some(completed), Some(total)) if total > 0 => Some(completed as f64 / total as f64 * 100.0),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

#[derive(Deserialize)]
struct PullLine {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    completed: Option<u64>,
    #[serde(default)]
    total: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

/// 改行区切りJSONの逐次デコーダー
///
/// チャンク境界で行が分断されても次のチャンクで続きを読む
#[derive(Debug, Default)]
pub struct PullDecoder {
    buffer: Vec<u8>,
}

impl PullDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// チャンクを追加し、完成した行の分だけイベントを返す
    pub fn push(&mut self, chunk: &[u8]) -> Vec<BackendResult<PullEvent>> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(event) = decode_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// 末尾の改行なし行を処理する
    pub fn finish(&mut self) -> Option<BackendResult<PullEvent>> {
        let line = std::mem::take(&mut self.buffer);
        decode_line(&line)
    }
}

fn decode_line(line: &[u8]) -> Option<BackendResult<PullEvent>> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    let parsed: PullLine = match serde_json::from_str(text) {
        Ok(parsed) => parsed,
        Err(e) => return Some(Err(BackendError::MalformedResponse(format!("進捗行を読めません: {}", e)))),
    };

    if let Some(error) = parsed.error {
        return Some(Err(BackendError::PullFailed(error)));
    }

    Some(Ok(PullEvent {
        status: parsed.status.unwrap_or_default(),
        completed: parsed.completed,
        total: parsed.total,
    }))
}

struct PullState<B> {
    body: BoxStream<'static, B>,
    decoder: PullDecoder,
    pending: VecDeque<BackendResult<PullEvent>>,
    finished: bool,
}

/// バイト列ストリームを進捗イベントのストリームに変換
///
/// success・エラーのいずれかを返した時点で終了する。
/// 完了前に入力が尽きた場合は PullFailed を1つ返して終了する。
pub fn pull_events<S, C, E>(body: S) -> PullStream
where
    S: Stream<Item = Result<C, E>> + Send + 'static,
    C: AsRef<[u8]> + Send + 'static,
    E: Into<BackendError> + Send + 'static,
{
    let state = PullState {
        body: body.fuse().boxed(),
        decoder: PullDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if st.finished {
                return None;
            }

            if let Some(item) = st.pending.pop_front() {
                let terminal = match &item {
                    Ok(event) => event.is_success(),
                    Err(_) => true,
                };
                st.finished = terminal;
                return Some((item, st));
            }

            match st.body.next().await {
                Some(Ok(chunk)) => {
                    let events = st.decoder.push(chunk.as_ref());
                    st.pending.extend(events);
                }
                Some(Err(e)) => st.pending.push_back(Err(e.into())),
                None => match st.decoder.finish() {
                    Some(item) => st.pending.push_back(item),
                    None => st
                        .pending
                        .push_back(Err(BackendError::PullFailed("完了前に接続が終了しました".to_string()))),
                },
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(parts: &[&str]) -> impl Stream<Item = Result<Vec<u8>, BackendError>> + Send + 'static {
        let owned: Vec<Result<Vec<u8>, BackendError>> = parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect();
        stream::iter(owned)
    }

    // ============================================
    // PullDecoder
    // ============================================

    #[test]
    fn test_decoder_splits_lines() {
        let mut decoder = PullDecoder::new();
        let events = decoder.push(b"{\"status\":\"pulling manifest\"}\n{\"status\":\"verifying\"}\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].as_ref().unwrap().status, "pulling manifest");
        assert_eq!(events[1].as_ref().unwrap().status, "verifying");
    }

    #[test]
    fn test_decoder_handles_split_line() {
        let mut decoder = PullDecoder::new();
        assert!(decoder.push(b"{\"status\":\"down").is_empty());
        let events = decoder.push(b"loading\",\"completed\":50,\"total\":200}\n");

        let event = events[0].as_ref().unwrap();
        assert_eq!(event.status, "downloading");
        assert_eq!(event.percent(), Some(25.0));
    }

    #[test]
    fn test_decoder_error_line() {
        let mut decoder = PullDecoder::new();
        let events = decoder.push(b"{\"error\":\"model not found\"}\n");
        assert!(matches!(&events[0], Err(BackendError::PullFailed(msg)) if msg == "model not found"));
    }

    #[test]
    fn test_decoder_skips_blank_lines_and_finishes_tail() {
        let mut decoder = PullDecoder::new();
        assert!(decoder.push(b"\n\r\n{\"status\":\"success\"}").is_empty());
        let tail = decoder.finish().unwrap().unwrap();
        assert!(tail.is_success());
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn test_percent_without_total() {
        let event = PullEvent {
            status: "pulling".to_string(),
            completed: Some(10),
            total: None,
        };
        assert_eq!(event.percent(), None);

        let zero = PullEvent {
            total: Some(0),
            ..event
        };
        assert_eq!(zero.percent(), None);
    }

    // ============================================
    // pull_events
    // ============================================

    #[tokio::test]
    async fn test_pull_events_ends_at_success() {
        let events: Vec<_> = pull_events(chunks(&[
            "{\"status\":\"pulling\",\"completed\":1,\"total\":4}\n",
            "{\"status\":\"success\"}\n",
            "{\"status\":\"ignored\"}\n",
        ]))
        .collect()
        .await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].as_ref().unwrap().percent(), Some(25.0));
        assert!(events[1].as_ref().unwrap().is_success());
    }

    #[tokio::test]
    async fn test_pull_events_ends_at_error() {
        let events: Vec<_> = pull_events(chunks(&[
            "{\"status\":\"pulling\"}\n{\"error\":\"disk full\"}\n",
            "{\"status\":\"success\"}\n",
        ]))
        .collect()
        .await;

        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], Err(BackendError::PullFailed(_))));
    }

    #[tokio::test]
    async fn test_pull_events_truncated_stream_fails() {
        let events: Vec<_> = pull_events(chunks(&["{\"status\":\"pulling\"}\n"])).collect().await;

        assert_eq!(events.len(), 2);
        assert!(events[0].is_ok());
        assert!(matches!(events[1], Err(BackendError::PullFailed(_))));
    }

    // ============================================
    // 応答の取り出し
    // ============================================

    #[test]
    fn test_extract_response_string_or_object() {
        assert_eq!(extract_response(Value::String("{\"grade\":\"A\"}".into())).unwrap(), "{\"grade\":\"A\"}");

        let object = serde_json::json!({"grade": "A"});
        assert_eq!(extract_response(object).unwrap(), "{\"grade\":\"A\"}");
        assert!(extract_response(Value::Null).is_err());
    }

    #[test]
    fn test_generate_request_serialize() {
        let request = GenerateRequest {
            model: "llava",
            prompt: "inspect".to_string(),
            images: vec!["abc".to_string()],
            stream: false,
            format: "json",
        };
        let json = serde_json::to_value(&request).expect("シリアライズ失敗");
        assert_eq!(
            json,
            serde_json::json!({
                "model": "llava",
                "prompt": "inspect",
                "images": ["abc"],
                "stream": false,
                "format": "json"
            })
        );
    }
}

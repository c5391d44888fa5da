//! 判定パイプライン（Inspector）
//!
//! 撮影 → 推論 → 正規化 → レコード作成 → 履歴追加 → 通知 を1サイクルとして実行する。
//! 推論側の失敗はフォールバックレコードになり、サイクル自体は失敗しない。

use crate::backend::{build_backend, engine_context, BackendConfig, EngineContext, InProcessBackend, InferenceBackend, LoadProgress};
use crate::capture::{build_camera, CaptureSource, Frame, SourceState};
use crate::config::{frames_dir, Settings};
use crate::error::Result;
use crate::history::RecordStore;
use crate::normalizer;
use crate::scheduler::CycleRunner;
use crate::storage::JsonStore;
use async_trait::async_trait;
use chrono::{Local, Timelike};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use steel_qc_common::{Catalog, InspectionRecord};
use tokio::sync::broadcast;

/// 通知チャネルの容量（遅い購読者はこれを超えると取りこぼす）
const EVENT_BUFFER: usize = 64;

/// 時刻由来の一意ID（単調増加）
#[derive(Debug, Default)]
pub struct IdGenerator {
    last: i64,
}

impl IdGenerator {
    /// 直前に発行したIDから再開する
    pub fn starting_after(last: i64) -> Self {
        Self { last }
    }

    /// 現在時刻（ミリ秒）が直前のID以下なら直前のID+1
    pub fn next(&mut self, now_millis: i64) -> i64 {
        let id = if now_millis > self.last { now_millis } else { self.last + 1 };
        self.last = id;
        id
    }
}

pub fn batch_id(hour: u32) -> String {
    format!("B-{}", hour)
}

pub struct Inspector {
    source: CaptureSource,
    backend: Box<dyn InferenceBackend>,
    /// プロセス内推論のときのみ
    engine: Option<Arc<EngineContext>>,
    catalog: Catalog,
    history: RecordStore,
    frames_dir: Option<PathBuf>,
    ids: IdGenerator,
    events: broadcast::Sender<InspectionRecord>,
}

impl Inspector {
    pub fn new(source: CaptureSource, backend: Box<dyn InferenceBackend>, catalog: Catalog, history: RecordStore) -> Self {
        let last_id = history
            .latest()
            .and_then(|r| r.id.parse::<i64>().ok())
            .unwrap_or(0);
        let (events, _) = broadcast::channel(EVENT_BUFFER);

        Self {
            source,
            backend,
            engine: None,
            catalog,
            history,
            frames_dir: None,
            ids: IdGenerator::starting_after(last_id),
            events,
        }
    }

    /// 撮影画像を `dir/<id>.jpg` に保存する
    pub fn with_frames_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.frames_dir = Some(dir.into());
        self
    }

    /// `reload_engine` で読み込み直すエンジン（backend と同じものを渡す）
    pub fn with_engine(mut self, engine: Arc<EngineContext>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// 設定からカメラ・バックエンド・履歴を組み立てる
    pub fn from_settings(settings: &Settings, data_dir: &Path) -> Result<Self> {
        let camera = build_camera(&settings.camera, settings.timeout())?;
        let source = CaptureSource::new(camera, settings.capture_profiles.clone(), settings.allow_simulated);
        let options = settings.backend_options(data_dir);
        let history = RecordStore::open(JsonStore::new(data_dir), settings.history_cap);

        let mut inspector = match &settings.backend {
            BackendConfig::LocalInprocess { model_id } => {
                let engine = engine_context(model_id, &options);
                let backend = Box::new(InProcessBackend::new(engine.clone()));
                Self::new(source, backend, settings.catalog.clone(), history).with_engine(engine)
            }
            config => Self::new(source, build_backend(config, &options)?, settings.catalog.clone(), history),
        };
        if settings.keep_frames {
            inspector = inspector.with_frames_dir(frames_dir(data_dir));
        }
        Ok(inspector)
    }

    /// 新しいレコードの通知を購読
    pub fn subscribe(&self) -> broadcast::Receiver<InspectionRecord> {
        self.events.subscribe()
    }

    pub async fn activate(&mut self) -> SourceState {
        self.source.activate().await
    }

    pub fn source(&self) -> &CaptureSource {
        &self.source
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn history(&self) -> &RecordStore {
        &self.history
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// 次のサイクルから新しいカタログを使う
    pub fn set_catalog(&mut self, catalog: Catalog) {
        self.catalog = catalog;
    }

    /// 1サイクル実行
    ///
    /// 撮影できない場合のみエラー（推論の失敗はフォールバックレコードになる）
    pub async fn inspect(&mut self) -> Result<InspectionRecord> {
        let frame = self.source.capture().await?;
        // サイクル中はこの時点のカタログで判定する
        let catalog = self.catalog.clone();

        let result = self.backend.classify(&frame, &catalog).await;
        let classification = normalizer::resolve(result, &catalog);

        let now = Local::now();
        let id = self.ids.next(now.timestamp_millis()).to_string();
        let image_ref = self.image_ref(&id, &frame).await;

        let record = InspectionRecord {
            id,
            timestamp: now.timestamp_millis(),
            image_ref,
            grade: classification.grade,
            defects: classification.defects,
            confidence: classification.confidence,
            batch_id: batch_id(now.hour()),
        };

        let evicted = self.history.append(record.clone());
        self.remove_frames(&evicted);

        // 購読者がいなくてもよい
        let _ = self.events.send(record.clone());
        Ok(record)
    }

    /// 画像の参照（保存に失敗した場合はダイジェスト）
    async fn image_ref(&self, id: &str, frame: &Frame) -> String {
        let digest_ref = format!("sha256:{}", frame.digest());
        let Some(dir) = &self.frames_dir else {
            return digest_ref;
        };

        let path = dir.join(format!("{}.jpg", id));
        let saved = async {
            tokio::fs::create_dir_all(dir).await?;
            tokio::fs::write(&path, &frame.jpeg).await
        }
        .await;

        match saved {
            Ok(()) => path.to_string_lossy().into_owned(),
            Err(e) => {
                log::warn!("画像を保存できません（ダイジェストで記録）: {}: {}", path.display(), e);
                digest_ref
            }
        }
    }

    /// 履歴から落ちたレコードの保存画像を削除
    fn remove_frames(&self, evicted: &[InspectionRecord]) {
        let Some(dir) = &self.frames_dir else {
            return;
        };

        for record in evicted {
            let path = Path::new(&record.image_ref);
            if !path.starts_with(dir) {
                continue;
            }
            match std::fs::remove_file(path) {
                Ok(()) => log::debug!("古い画像を削除: {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => log::warn!("画像を削除できません: {}: {}", path.display(), e),
            }
        }
    }

    /// プロセス内推論エンジンを読み込み直す（同じモデルID）
    ///
    /// 失敗しても次の判定で再度読み込みを試みる
    pub async fn reload_model(&mut self) -> Result<bool> {
        let Some(engine) = &self.engine else {
            return Ok(false);
        };
        let report = |p: LoadProgress| log::info!("読み込み {:.0}%: {}", p.progress * 100.0, p.text);
        engine.reload(None, &report).await?;
        Ok(true)
    }

    /// カメラを解放
    pub fn release(&mut self) {
        self.source.release();
    }
}

#[async_trait]
impl CycleRunner for Inspector {
    fn is_capturable(&self) -> bool {
        self.source.state().is_capturable()
    }

    async fn run_cycle(&mut self) {
        match self.inspect().await {
            Ok(record) => log::info!(
                "✔ {} grade={} defects={} confidence={:.0}",
                record.id,
                record.grade,
                record.defects.len(),
                record.confidence
            ),
            Err(e) => log::warn!("撮影に失敗: {}", e),
        }
    }

    async fn reactivate(&mut self) {
        let state = self.source.activate().await;
        log::info!("映像ソースを再取得: {}", state);
    }

    async fn reload_engine(&mut self) {
        match self.reload_model().await {
            Ok(true) => {}
            Ok(false) => log::warn!("{} は再読み込みできません（local-inprocess のみ）", self.backend.name()),
            Err(e) => log::error!("推論エンジンの再読み込みに失敗: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_generator_uses_clock() {
        let mut ids = IdGenerator::default();
        assert_eq!(ids.next(1_000), 1_000);
        assert_eq!(ids.next(2_000), 2_000);
    }

    #[test]
    fn test_id_generator_is_strictly_increasing() {
        let mut ids = IdGenerator::default();
        assert_eq!(ids.next(5_000), 5_000);
        assert_eq!(ids.next(5_000), 5_001);
        // 時計が戻っても増え続ける
        assert_eq!(ids.next(4_000), 5_002);
        assert_eq!(ids.next(6_000), 6_000);
    }

    #[test]
    fn test_id_generator_resumes_after_last() {
        let mut ids = IdGenerator::starting_after(9_999);
        assert_eq!(ids.next(9_000), 10_000);
    }

    #[test]
    fn test_batch_id() {
        assert_eq!(batch_id(0), "B-0");
        assert_eq!(batch_id(14), "B-14");
    }
}

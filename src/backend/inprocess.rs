//! プロセス内推論
//!
//! エンジンは `EngineContext` が1つだけ保持する。初回利用時に読み込み、
//! 同時に来た呼び出しは同じ初期化を待つ。差し替えは `reload` のみ。

use super::{BackendResult, InferenceBackend, RawResponse};
use crate::capture::Frame;
use crate::error::BackendError;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use steel_qc_common::{build_classification_prompt, Catalog};
use tokio::sync::{OnceCell, RwLock};

/// 読み込み進捗（0.0〜1.0）
#[derive(Debug, Clone, PartialEq)]
pub struct LoadProgress {
    pub progress: f64,
    pub text: String,
}

impl LoadProgress {
    pub fn new(progress: f64, text: impl Into<String>) -> Self {
        Self {
            progress: progress.clamp(0.0, 1.0),
            text: text.into(),
        }
    }
}

/// 読み込み済みエンジン
#[async_trait]
pub trait LocalEngine: Send + Sync {
    fn model_id(&self) -> &str;

    /// 判定結果のJSONテキストを返す
    ///
    /// 画像分類モデルはプロンプトを使わず、カタログだけを参照する
    async fn generate(&self, frame: &Frame, prompt: &str, catalog: &Catalog) -> BackendResult<String>;

    async fn unload(&self);
}

#[async_trait]
pub trait EngineLoader: Send + Sync {
    async fn load(
        &self,
        model_id: &str,
        progress: &(dyn Fn(LoadProgress) + Send + Sync),
    ) -> BackendResult<Arc<dyn LocalEngine>>;
}

type EngineCell = Arc<OnceCell<Arc<dyn LocalEngine>>>;

struct Slot {
    model_id: String,
    cell: EngineCell,
}

pub struct EngineContext {
    loader: Arc<dyn EngineLoader>,
    slot: RwLock<Slot>,
}

impl EngineContext {
    pub fn new(model_id: impl Into<String>, loader: Arc<dyn EngineLoader>) -> Self {
        Self {
            loader,
            slot: RwLock::new(Slot {
                model_id: model_id.into(),
                cell: Arc::new(OnceCell::new()),
            }),
        }
    }

    pub async fn model_id(&self) -> String {
        self.slot.read().await.model_id.clone()
    }

    pub async fn is_loaded(&self) -> bool {
        self.slot.read().await.cell.initialized()
    }

    /// エンジンを取得（未初期化なら読み込む）
    ///
    /// 初期化に失敗した場合は次の呼び出しで再試行する
    pub async fn engine(&self) -> BackendResult<Arc<dyn LocalEngine>> {
        // 初期化中は読み取りロックを保持し、reload と競合させない
        let slot = self.slot.read().await;
        let model_id = slot.model_id.clone();
        let engine = slot
            .cell
            .get_or_try_init(|| async {
                log::info!("推論エンジンを読み込み中: {}", model_id);
                let report = |p: LoadProgress| log::debug!("読み込み {:.0}%: {}", p.progress * 100.0, p.text);
                self.loader.load(&model_id, &report).await
            })
            .await?;
        Ok(engine.clone())
    }

    /// 現在のエンジンを破棄して読み込み直す
    ///
    /// `model_id` を指定した場合はそのモデルに切り替える
    pub async fn reload(
        &self,
        model_id: Option<&str>,
        progress: &(dyn Fn(LoadProgress) + Send + Sync),
    ) -> BackendResult<()> {
        let mut slot = self.slot.write().await;
        if let Some(engine) = slot.cell.get() {
            log::info!("推論エンジンを解放: {}", engine.model_id());
            engine.unload().await;
        }
        if let Some(id) = model_id {
            slot.model_id = id.to_string();
        }
        slot.cell = Arc::new(OnceCell::new());

        let engine = self.loader.load(&slot.model_id, progress).await?;
        // 書き込みロック中なので他の初期化とは競合しない
        let _ = slot.cell.set(engine);
        log::info!("推論エンジンを読み込みました: {}", slot.model_id);
        Ok(())
    }
}

pub struct InProcessBackend {
    context: Arc<EngineContext>,
}

impl InProcessBackend {
    pub fn new(context: Arc<EngineContext>) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.context
    }
}

#[async_trait]
impl InferenceBackend for InProcessBackend {
    fn name(&self) -> &str {
        "local-inprocess"
    }

    async fn classify(&self, frame: &Frame, catalog: &Catalog) -> BackendResult<RawResponse> {
        let engine = self.context.engine().await?;
        let prompt = build_classification_prompt(catalog);
        let body = engine.generate(frame, &prompt, catalog).await?;

        Ok(RawResponse {
            backend: self.name().to_string(),
            body,
        })
    }
}

/// ビルド構成に応じた既定のローダー
pub fn default_loader(models_dir: &Path) -> Arc<dyn EngineLoader> {
    #[cfg(feature = "engine-tract")]
    {
        Arc::new(tract::TractLoader::new(models_dir))
    }
    #[cfg(not(feature = "engine-tract"))]
    {
        let _ = models_dir;
        Arc::new(UnavailableLoader)
    }
}

/// エンジンなしビルド用
#[cfg(not(feature = "engine-tract"))]
struct UnavailableLoader;

#[cfg(not(feature = "engine-tract"))]
#[async_trait]
impl EngineLoader for UnavailableLoader {
    async fn load(
        &self,
        model_id: &str,
        _progress: &(dyn Fn(LoadProgress) + Send + Sync),
    ) -> BackendResult<Arc<dyn LocalEngine>> {
        Err(BackendError::EngineUnavailable(format!(
            "{}: engine-tract 機能を有効にしてビルドしてください",
            model_id
        )))
    }
}

#[cfg(feature = "engine-tract")]
mod tract {
    //! ONNX画像分類モデル
    //!
    //! 出力スコアの解釈は labels モジュール（クラス番号の対応表）に任せる。

    use super::{BackendResult, LoadProgress, LocalEngine};
    use crate::backend::labels::{interpret, ClassLabels};
    use crate::capture::Frame;
    use crate::error::BackendError;
    use async_trait::async_trait;
    use image::imageops::FilterType;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use steel_qc_common::Catalog;
    use tract_onnx::prelude::*;

    const INPUT_SIZE: u32 = 224;

    type Plan = TypedRunnableModel<TypedModel>;

    pub struct TractLoader {
        models_dir: PathBuf,
    }

    impl TractLoader {
        pub fn new(models_dir: &Path) -> Self {
            Self {
                models_dir: models_dir.to_path_buf(),
            }
        }
    }

    fn unavailable(e: impl std::fmt::Display) -> BackendError {
        BackendError::EngineUnavailable(e.to_string())
    }

    fn build_plan(path: &Path) -> TractResult<Plan> {
        let size = INPUT_SIZE as usize;
        tract_onnx::onnx()
            .model_for_path(path)?
            .with_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)))?
            .into_optimized()?
            .into_runnable()
    }

    #[async_trait]
    impl super::EngineLoader for TractLoader {
        async fn load(
            &self,
            model_id: &str,
            progress: &(dyn Fn(LoadProgress) + Send + Sync),
        ) -> BackendResult<Arc<dyn LocalEngine>> {
            let path = self.models_dir.join(format!("{}.onnx", model_id));
            if !path.exists() {
                return Err(unavailable(format!("モデルがありません: {}", path.display())));
            }

            let labels_path = ClassLabels::path_for(&self.models_dir, model_id);
            let labels = ClassLabels::load(&labels_path)?;
            if labels.is_none() {
                log::warn!(
                    "ラベル対応表がありません（{}）。等級は出力順で割り当て、欠陥は検出しません",
                    labels_path.display()
                );
            }

            progress(LoadProgress::new(0.1, "モデルを読み込み中"));
            let plan_path = path.clone();
            let plan = tokio::task::spawn_blocking(move || build_plan(&plan_path))
                .await
                .map_err(unavailable)?
                .map_err(unavailable)?;
            progress(LoadProgress::new(1.0, "準備完了"));

            Ok(Arc::new(TractEngine {
                model_id: model_id.to_string(),
                plan: Arc::new(plan),
                labels,
            }))
        }
    }

    struct TractEngine {
        model_id: String,
        plan: Arc<Plan>,
        labels: Option<ClassLabels>,
    }

    fn run(plan: &Plan, frame: &Frame) -> TractResult<Vec<f32>> {
        let image = frame.decode().map_err(|e| anyhow::anyhow!(e.to_string()))?;
        let resized = image::imageops::resize(&image, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);
        let size = INPUT_SIZE as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
            resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });

        let outputs = plan.run(tvec!(input.into_tensor().into()))?;
        let scores = outputs[0].to_array_view::<f32>()?;
        Ok(scores.iter().copied().collect())
    }

    #[async_trait]
    impl LocalEngine for TractEngine {
        fn model_id(&self) -> &str {
            &self.model_id
        }

        async fn generate(&self, frame: &Frame, _prompt: &str, catalog: &Catalog) -> BackendResult<String> {
            let plan = self.plan.clone();
            let frame = frame.clone();
            let scores = tokio::task::spawn_blocking(move || run(&plan, &frame))
                .await
                .map_err(unavailable)?
                .map_err(|e| BackendError::MalformedResponse(e.to_string()))?;

            interpret(&scores, self.labels.as_ref(), catalog)
        }

        async fn unload(&self) {
            log::debug!("tract エンジンを解放: {}", self.model_id);
        }
    }
}

//! 応答の正規化（ResponseNormalizer）
//!
//! バックエンドの生応答を検証し、カタログに沿った判定結果にする。
//!
//! ## 処理フロー
//! 1. JSON抽出・パース（grade / defects / confidence）
//! 2. グレード照合（完全一致 → 規則表）
//! 3. 信頼度の補正（範囲外・欠落は既定値）
//!
//! バックエンドが失敗した場合はフォールバック結果を作る。

use crate::backend::{BackendResult, RawResponse};
use crate::error::BackendError;
use steel_qc_common::{parse_classification, reconcile_grade, Catalog, Defect, GradeMatch, Severity};

/// 信頼度が欠落・範囲外のときの既定値
pub const DEFAULT_CONFIDENCE: f64 = 90.0;

/// フォールバック時の信頼度
pub const FALLBACK_CONFIDENCE: f64 = 0.0;

/// 規則表によるグレードの修正内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GradeCorrection {
    /// バックエンドが返したグレード
    pub original: String,
    /// 対応付けたカタログのグレード
    pub corrected: String,
    /// 適用した規則名
    pub rule: &'static str,
}

/// 正規化済みの判定結果
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    /// 必ずカタログのグレード名
    pub grade: String,
    pub defects: Vec<Defect>,
    /// 0-100
    pub confidence: f64,
    /// バックエンド障害から作った結果なら true
    pub fallback: bool,
    pub correction: Option<GradeCorrection>,
}

/// 生応答をカタログに照らして正規化
pub fn normalize(raw: &RawResponse, catalog: &Catalog) -> Result<Classification, BackendError> {
    let parsed = parse_classification(&raw.body)?;

    let matched = reconcile_grade(&parsed.grade, catalog);
    let grade = matched.grade().name.clone();
    let correction = match matched {
        GradeMatch::Exact(_) => None,
        GradeMatch::Heuristic { rule, .. } => {
            log::warn!(
                "グレード \"{}\" はカタログにありません。規則 {} で \"{}\" に対応付けました",
                parsed.grade,
                rule,
                grade
            );
            Some(GradeCorrection {
                original: parsed.grade.clone(),
                corrected: grade.clone(),
                rule,
            })
        }
    };

    Ok(Classification {
        grade,
        defects: parsed.defects,
        confidence: normalize_confidence(parsed.confidence),
        fallback: false,
        correction,
    })
}

fn normalize_confidence(confidence: Option<f64>) -> f64 {
    match confidence {
        Some(c) if (0.0..=100.0).contains(&c) => c,
        _ => DEFAULT_CONFIDENCE,
    }
}

/// バックエンド障害からフォールバック結果を作る
///
/// グレードは2番目（1件なら先頭）、High の合成欠陥1件、信頼度0
pub fn fallback(error: &BackendError, catalog: &Catalog) -> Classification {
    Classification {
        grade: catalog.middle().name.clone(),
        defects: vec![Defect {
            defect_type: error.kind().to_string(),
            severity: Severity::High,
            description: error.to_string(),
        }],
        confidence: FALLBACK_CONFIDENCE,
        fallback: true,
        correction: None,
    }
}

/// バックエンド呼び出しの結果を必ず判定結果にする
pub fn resolve(result: BackendResult<RawResponse>, catalog: &Catalog) -> Classification {
    match result.and_then(|raw| normalize(&raw, catalog)) {
        Ok(classification) => classification,
        Err(e) => {
            log::warn!("⚠️ 判定に失敗したためフォールバック結果を使用: {}", e);
            fallback(&e, catalog)
        }
    }
}

//! 画像分類モデルの出力を判定JSONに直す
//!
//! クラス番号と等級・欠陥種別の対応は `<model_id>.labels.json`（文字列の配列）で与える。
//! カタログに無いラベルや配列の範囲外のクラスは不明として扱い、判定に使わない。
//! 対応表が無いモデルは出力順で等級に割り当て、欠陥は検出しない。

use super::BackendResult;
use crate::error::BackendError;
use serde_json::json;
use std::path::{Path, PathBuf};
use steel_qc_common::{Catalog, Severity};

/// 欠陥として報告する最小確率
pub const DEFECT_THRESHOLD: f32 = 0.2;

/// クラスの意味
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassLabel {
    Grade(String),
    Defect(String),
    Unknown,
}

/// クラス番号 → ラベル名
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassLabels {
    labels: Vec<String>,
}

impl ClassLabels {
    pub fn new(labels: Vec<String>) -> Self {
        Self { labels }
    }

    pub fn path_for(models_dir: &Path, model_id: &str) -> PathBuf {
        models_dir.join(format!("{}.labels.json", model_id))
    }

    /// 対応表を読む（ファイルが無ければ None、壊れていればエラー）
    pub fn load(path: &Path) -> BackendResult<Option<Self>> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(BackendError::EngineUnavailable(format!("{}: {}", path.display(), e)));
            }
        };
        let labels: Vec<String> = serde_json::from_str(&text)
            .map_err(|e| BackendError::EngineUnavailable(format!("ラベル対応表が不正です: {}: {}", path.display(), e)))?;
        Ok(Some(Self::new(labels)))
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// ラベルをカタログの等級・欠陥種別（ID または名前）に照合する
    pub fn resolve(&self, class: usize, catalog: &Catalog) -> ClassLabel {
        let Some(label) = self.labels.get(class) else {
            return ClassLabel::Unknown;
        };
        let label = label.trim();
        let same = |id: &str, name: &str| id.eq_ignore_ascii_case(label) || name.eq_ignore_ascii_case(label);

        if let Some(grade) = catalog.grades().iter().find(|g| same(&g.id, &g.name)) {
            return ClassLabel::Grade(grade.name.clone());
        }
        if let Some(defect) = catalog.defect_types().iter().find(|d| same(&d.id, &d.name)) {
            return ClassLabel::Defect(defect.name.clone());
        }
        ClassLabel::Unknown
    }
}

/// スコアを確率に直す
///
/// 有限でないスコアは確率0。有限なスコアが1つも無ければ None
pub fn softmax(scores: &[f32]) -> Option<Vec<f32>> {
    let max = scores
        .iter()
        .copied()
        .filter(|s| s.is_finite())
        .fold(None, |acc: Option<f32>, s| Some(acc.map_or(s, |m| m.max(s))))?;

    let exp: Vec<f32> = scores
        .iter()
        .map(|s| if s.is_finite() { (s - max).exp() } else { 0.0 })
        .collect();
    let sum: f32 = exp.iter().sum();
    Some(exp.into_iter().map(|e| e / sum).collect())
}

/// 最大確率のクラス
pub fn best_class(probabilities: &[f32]) -> Option<(usize, f32)> {
    probabilities
        .iter()
        .copied()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(&b.1))
}

/// 対応表なしの場合の割り当て（クラス数と等級数の比）
pub fn proportional_grade_index(class: usize, classes: usize, grades: usize) -> usize {
    if classes == 0 || grades == 0 {
        return 0;
    }
    (class * grades / classes).min(grades - 1)
}

pub fn severity_for(probability: f32) -> Severity {
    if probability >= 0.6 {
        Severity::High
    } else if probability >= 0.4 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// モデル出力を `{"grade", "defects", "confidence"}` のJSONテキストにする
pub fn interpret(scores: &[f32], labels: Option<&ClassLabels>, catalog: &Catalog) -> BackendResult<String> {
    let probabilities =
        softmax(scores).ok_or_else(|| BackendError::MalformedResponse("スコアが不正です".to_string()))?;

    let Some(labels) = labels else {
        let (class, probability) = best_class(&probabilities)
            .ok_or_else(|| BackendError::MalformedResponse("スコアが空です".to_string()))?;
        let grades = catalog.grades();
        let index = proportional_grade_index(class, probabilities.len(), grades.len());
        let grade = grades
            .get(index)
            .ok_or_else(|| BackendError::MalformedResponse("等級がありません".to_string()))?;
        return Ok(body(&grade.name, Vec::new(), probability));
    };

    let mut grade: Option<(String, f32)> = None;
    let mut defects: Vec<(String, f32)> = Vec::new();
    for (class, &probability) in probabilities.iter().enumerate() {
        match labels.resolve(class, catalog) {
            ClassLabel::Grade(name) => {
                if grade.as_ref().map_or(true, |(_, best)| probability > *best) {
                    grade = Some((name, probability));
                }
            }
            ClassLabel::Defect(name) if probability >= DEFECT_THRESHOLD => defects.push((name, probability)),
            _ => {}
        }
    }

    let (grade, probability) = grade
        .ok_or_else(|| BackendError::MalformedResponse("等級に対応するクラスがありません".to_string()))?;
    defects.sort_by(|a, b| b.1.total_cmp(&a.1));
    Ok(body(&grade, defects, probability))
}

fn body(grade: &str, defects: Vec<(String, f32)>, probability: f32) -> String {
    let defects: Vec<_> = defects
        .into_iter()
        .map(|(name, p)| {
            json!({
                "type": name,
                "severity": severity_for(p).as_str(),
                "description": format!("モデル出力 {:.0}%", p * 100.0),
            })
        })
        .collect();

    json!({
        "grade": grade,
        "defects": defects,
        "confidence": (probability * 100.0).round(),
    })
    .to_string()
}

//! 履歴集計
//!
//! 検査履歴からグレード分布・合格率・欠陥パレートを計算する。
//! 表示や出力形式は扱わない。

use crate::catalog::Catalog;
use crate::types::{InspectionRecord, Severity};
use serde::Serialize;
use std::collections::HashMap;

/// パレート図に載せる欠陥種別の上限
pub const PARETO_LIMIT: usize = 5;

/// 集計結果
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySummary {
    pub total: usize,
    /// カタログ順、その後にカタログから消えたグレード（出現順）
    pub grade_counts: Vec<(String, usize)>,
    /// 先頭グレードの割合（0-100）
    pub pass_rate: f64,
    /// 件数の多い順、最大 PARETO_LIMIT 件
    pub defect_pareto: Vec<(String, usize)>,
}

/// 履歴を集計する
///
/// # Arguments
/// * `records` - 検査履歴（新しい順）
/// * `catalog` - 現在のカタログ（グレードの並び順と合格グレードに使う）
pub fn summarize(records: &[InspectionRecord], catalog: &Catalog) -> HistorySummary {
    let mut grade_counts: Vec<(String, usize)> = catalog
        .grades()
        .iter()
        .map(|g| (g.name.clone(), 0))
        .collect();

    for record in records {
        match grade_counts.iter_mut().find(|(name, _)| *name == record.grade) {
            Some((_, count)) => *count += 1,
            None => grade_counts.push((record.grade.clone(), 1)),
        }
    }

    let best = &catalog.best().name;
    let passed = grade_counts
        .iter()
        .find(|(name, _)| name == best)
        .map(|(_, count)| *count)
        .unwrap_or(0);

    let pass_rate = if records.is_empty() {
        0.0
    } else {
        passed as f64 * 100.0 / records.len() as f64
    };

    HistorySummary {
        total: records.len(),
        grade_counts,
        pass_rate,
        defect_pareto: defect_pareto(records, PARETO_LIMIT),
    }
}

/// 欠陥種別ごとの件数（多い順、同数は名前順）
pub fn defect_pareto(records: &[InspectionRecord], limit: usize) -> Vec<(String, usize)> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for defect in records.iter().flat_map(|r| r.defects.iter()) {
        *counts.entry(defect.defect_type.as_str()).or_insert(0) += 1;
    }

    let mut pareto: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(name, count)| (name.to_string(), count))
        .collect();
    pareto.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    pareto.truncate(limit);
    pareto
}

/// 指定した重大度の欠陥を1件以上含むレコードだけを返す
pub fn filter_by_severity(records: &[InspectionRecord], severity: Severity) -> Vec<&InspectionRecord> {
    records
        .iter()
        .filter(|r| r.defects.iter().any(|d| d.severity == severity))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Defect;

    fn record(id: &str, grade: &str, defects: &[(&str, Severity)]) -> InspectionRecord {
        InspectionRecord {
            id: id.to_string(),
            timestamp: 0,
            image_ref: String::new(),
            grade: grade.to_string(),
            defects: defects
                .iter()
                .map(|(t, s)| Defect {
                    defect_type: t.to_string(),
                    severity: *s,
                    description: String::new(),
                })
                .collect(),
            confidence: 90.0,
            batch_id: "B-8".to_string(),
        }
    }

    #[test]
    fn test_summarize_empty() {
        let summary = summarize(&[], &Catalog::steel_default());
        assert_eq!(summary.total, 0);
        assert_eq!(summary.pass_rate, 0.0);
        assert_eq!(summary.grade_counts.len(), 3);
        assert!(summary.grade_counts.iter().all(|(_, c)| *c == 0));
    }

    #[test]
    fn test_summarize_counts_and_pass_rate() {
        let catalog = Catalog::steel_default();
        let records = vec![
            record("1", "Grade 1 (Prime)", &[]),
            record("2", "Grade 2 (Standard)", &[("Stains", Severity::Low)]),
            record("3", "Grade 1 (Prime)", &[]),
            record("4", "Grade 3 (Scrap)", &[("Peeling", Severity::High), ("Stains", Severity::Medium)]),
        ];

        let summary = summarize(&records, &catalog);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.grade_counts[0], ("Grade 1 (Prime)".to_string(), 2));
        assert_eq!(summary.grade_counts[2], ("Grade 3 (Scrap)".to_string(), 1));
        assert!((summary.pass_rate - 50.0).abs() < 1e-9);
        assert_eq!(summary.defect_pareto[0], ("Stains".to_string(), 2));
    }

    #[test]
    fn test_summarize_keeps_retired_grades() {
        // カタログ変更前のレコードも集計から消えない
        let catalog = Catalog::steel_default();
        let records = vec![record("1", "Legacy B", &[])];
        let summary = summarize(&records, &catalog);
        assert_eq!(summary.grade_counts.len(), 4);
        assert_eq!(summary.grade_counts[3], ("Legacy B".to_string(), 1));
    }

    #[test]
    fn test_defect_pareto_limit_and_order() {
        let records = vec![
            record("1", "G", &[("A", Severity::Low), ("B", Severity::Low), ("C", Severity::Low)]),
            record("2", "G", &[("B", Severity::Low), ("D", Severity::Low), ("E", Severity::Low)]),
            record("3", "G", &[("F", Severity::Low), ("B", Severity::Low)]),
        ];
        let pareto = defect_pareto(&records, 3);
        assert_eq!(pareto.len(), 3);
        assert_eq!(pareto[0], ("B".to_string(), 3));
        assert_eq!(pareto[1], ("A".to_string(), 1));
        assert_eq!(pareto[2], ("C".to_string(), 1));
    }

    #[test]
    fn test_filter_by_severity() {
        let records = vec![
            record("1", "G", &[("A", Severity::Low)]),
            record("2", "G", &[("B", Severity::High)]),
            record("3", "G", &[]),
        ];
        let high = filter_by_severity(&records, Severity::High);
        assert_eq!(high.len(), 1);
        assert_eq!(high[0].id, "2");
    }
}

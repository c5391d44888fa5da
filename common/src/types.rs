//! 検査結果の型定義
//!
//! CLIとバックエンドで共有される型:
//! - Severity / Defect: 欠陥1件
//! - RawClassification: バックエンド応答をパースした直後の値
//! - InspectionRecord: 最終出力（履歴に保存される1レコード）

use serde::{Deserialize, Serialize};

/// 欠陥の重大度
///
/// JSON上は `"Low"` / `"Medium"` / `"High"` のみ許可する。
/// それ以外の値はパースエラーになる。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub const ALL: [Severity; 3] = [Severity::Low, Severity::Medium, Severity::High];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "Low",
            Severity::Medium => "Medium",
            Severity::High => "High",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" | "l" => Ok(Severity::Low),
            "medium" | "med" | "m" => Ok(Severity::Medium),
            "high" | "h" => Ok(Severity::High),
            _ => Err(format!("Unknown severity: {}. Use low, medium, or high", s)),
        }
    }
}

/// 検出された欠陥
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Defect {
    #[serde(rename = "type")]
    pub defect_type: String,

    pub severity: Severity,

    #[serde(default)]
    pub description: String,
}

/// バックエンド応答のパース結果（グレード照合前）
#[derive(Debug, Clone, PartialEq)]
pub struct RawClassification {
    /// バックエンドが返したグレード文字列（カタログに存在するとは限らない）
    pub grade: String,
    pub defects: Vec<Defect>,
    /// 数値でなかった場合は None
    pub confidence: Option<f64>,
}

/// 検査レコード（履歴の1件）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectionRecord {
    /// 時刻由来の一意ID
    pub id: String,

    /// 作成時刻（UNIXミリ秒）
    pub timestamp: i64,

    /// 保存フレームのパス、または画像ダイジェスト
    pub image_ref: String,

    /// 分類時点のカタログに存在したグレード名
    pub grade: String,

    #[serde(default)]
    pub defects: Vec<Defect>,

    /// 0-100
    pub confidence: f64,

    pub batch_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> InspectionRecord {
        InspectionRecord {
            id: "1735000000000".to_string(),
            timestamp: 1_735_000_000_000,
            image_ref: "frames/1735000000000.jpg".to_string(),
            grade: "Grade 1 (Prime)".to_string(),
            defects: vec![Defect {
                defect_type: "Scratches".to_string(),
                severity: Severity::Low,
                description: "細い線状傷".to_string(),
            }],
            confidence: 87.5,
            batch_id: "B-14".to_string(),
        }
    }

    // =============================================
    // Severity テスト
    // =============================================

    #[test]
    fn test_severity_serialize_exact_names() {
        let json = serde_json::to_string(&Severity::ALL).expect("シリアライズ失敗");
        assert_eq!(json, r#"["Low","Medium","High"]"#);
    }

    #[test]
    fn test_severity_rejects_unknown_value() {
        let result = serde_json::from_str::<Severity>(r#""Critical""#);
        assert!(result.is_err());
    }

    #[test]
    fn test_severity_rejects_lowercase_in_json() {
        let result = serde_json::from_str::<Severity>(r#""high""#);
        assert!(result.is_err());
    }

    #[test]
    fn test_severity_from_str_for_cli() {
        assert_eq!("HIGH".parse::<Severity>().unwrap(), Severity::High);
        assert_eq!("med".parse::<Severity>().unwrap(), Severity::Medium);
        assert!("severe".parse::<Severity>().is_err());
    }

    // =============================================
    // Defect テスト
    // =============================================

    #[test]
    fn test_defect_uses_type_key() {
        let json = r#"{"type": "White Rust", "severity": "Medium", "description": "白錆の斑点"}"#;
        let defect: Defect = serde_json::from_str(json).expect("デシリアライズ失敗");
        assert_eq!(defect.defect_type, "White Rust");
        assert_eq!(defect.severity, Severity::Medium);
    }

    #[test]
    fn test_defect_description_defaults_to_empty() {
        let json = r#"{"type": "Peeling", "severity": "High"}"#;
        let defect: Defect = serde_json::from_str(json).expect("デシリアライズ失敗");
        assert_eq!(defect.description, "");
    }

    // =============================================
    // InspectionRecord テスト
    // =============================================

    #[test]
    fn test_record_serialize_camel_case() {
        let json = serde_json::to_string(&sample_record()).expect("シリアライズ失敗");
        assert!(json.contains("\"imageRef\":\"frames/1735000000000.jpg\""));
        assert!(json.contains("\"batchId\":\"B-14\""));
        assert!(json.contains("\"type\":\"Scratches\""));
    }

    #[test]
    fn test_record_roundtrip() {
        let original = sample_record();
        let json = serde_json::to_string(&original).expect("シリアライズ失敗");
        let restored: InspectionRecord = serde_json::from_str(&json).expect("デシリアライズ失敗");
        assert_eq!(original, restored);
    }
}

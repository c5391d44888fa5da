//! APIレスポンスパーサー
//!
//! バックエンドの応答テキストからJSONオブジェクトを抽出し、
//! グレード・欠陥・信頼度の3項目にパースする

use crate::error::{Error, Result};
use crate::types::{Defect, RawClassification};
use serde::Deserialize;
use serde_json::Value;

/// APIレスポンスからJSON部分を抽出
///
/// 抽出優先順位:
/// 1. ```json ... ``` ブロック
/// 2. 生の {...} オブジェクト
/// 3. エラー
///
/// # Examples
/// ```
/// use steel_qc_common::extract_json;
///
/// let response = "result: {\"grade\": \"G1\"}";
/// let json = extract_json(response).unwrap();
/// assert_eq!(json, "{\"grade\": \"G1\"}");
/// ```
pub fn extract_json(response: &str) -> Result<&str> {
    // ```json ... ``` ブロックを探す
    if let Some(start_marker) = response.find("```json") {
        let start = start_marker + 7; // "```json" の長さ
        if let Some(end_offset) = response[start..].find("```") {
            let end = start + end_offset;
            return Ok(response[start..end].trim());
        }
    }

    // 生の {...} を探す
    if let Some(start) = response.find('{') {
        if let Some(end) = response.rfind('}') {
            if end >= start {
                return Ok(&response[start..=end]);
            }
        }
    }

    Err(Error::Parse("JSONが見つかりません".into()))
}

/// 応答の受け口（型の揺れを吸収してから検証する）
#[derive(Debug, Deserialize)]
struct ClassificationWire {
    #[serde(default)]
    grade: Option<Value>,
    #[serde(default)]
    defects: Option<Vec<Defect>>,
    #[serde(default)]
    confidence: Option<Value>,
}

/// 分類レスポンスをパース
///
/// - grade が無い・空の場合はエラー（数値は文字列として扱う）
/// - defects が無い場合は空配列
/// - severity が Low/Medium/High 以外ならエラー
/// - confidence が数値でなければ None
pub fn parse_classification(response: &str) -> Result<RawClassification> {
    let json_str = extract_json(response)?;
    let wire: ClassificationWire = serde_json::from_str(json_str.trim())
        .map_err(|e| Error::Parse(format!("分類結果 JSONパースエラー: {}", e)))?;

    let grade = match wire.grade {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(other) if !other.is_null() => {
            return Err(Error::Parse(format!("gradeの型が不正です: {}", other)));
        }
        _ => return Err(Error::Parse("gradeがありません".into())),
    };

    let confidence = wire.confidence.and_then(|v| v.as_f64());

    Ok(RawClassification {
        grade,
        defects: wire.defects.unwrap_or_default(),
        confidence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Severity;

    // =============================================
    // extract_json テスト
    // =============================================

    #[test]
    fn test_extract_json_with_block() {
        let response = r#"Here is the analysis:
```json
{"grade": "Grade 1", "defects": []}
```
Some additional text."#;

        let json = extract_json(response).unwrap();
        assert_eq!(json, r#"{"grade": "Grade 1", "defects": []}"#);
    }

    #[test]
    fn test_extract_json_raw() {
        let response = r#"{"grade": "G2", "confidence": 80}"#;
        assert_eq!(extract_json(response).unwrap(), response);
    }

    #[test]
    fn test_extract_json_nested_braces() {
        let response = r#"Result: {"grade": "G2", "defects": [{"type": "Stains", "severity": "Low"}]} done"#;
        let json = extract_json(response).unwrap();
        assert!(json.starts_with('{'));
        assert!(json.ends_with("]}"));
    }

    #[test]
    fn test_extract_json_error() {
        let result = extract_json("No JSON here, just plain text.");
        if let Err(Error::Parse(msg)) = result {
            assert!(msg.contains("JSONが見つかりません"));
        } else {
            panic!("Expected Parse error");
        }
    }

    // =============================================
    // parse_classification テスト
    // =============================================

    #[test]
    fn test_parse_full_response() {
        let response = r#"```json
{
  "grade": "Grade 2 (Standard)",
  "defects": [
    {"type": "White Rust", "severity": "Medium", "description": "edge spots"},
    {"type": "Scratches", "severity": "Low", "description": "light marks"}
  ],
  "confidence": 82.5
}
```"#;

        let result = parse_classification(response).unwrap();
        assert_eq!(result.grade, "Grade 2 (Standard)");
        assert_eq!(result.defects.len(), 2);
        assert_eq!(result.defects[0].defect_type, "White Rust");
        assert_eq!(result.defects[1].severity, Severity::Low);
        assert_eq!(result.confidence, Some(82.5));
    }

    #[test]
    fn test_parse_missing_defects_and_confidence() {
        let result = parse_classification(r#"{"grade": "G1"}"#).unwrap();
        assert!(result.defects.is_empty());
        assert_eq!(result.confidence, None);
    }

    #[test]
    fn test_parse_numeric_grade() {
        let result = parse_classification(r#"{"grade": 3, "defects": []}"#).unwrap();
        assert_eq!(result.grade, "3");
    }

    #[test]
    fn test_parse_non_numeric_confidence() {
        let result = parse_classification(r#"{"grade": "G1", "confidence": "high"}"#).unwrap();
        assert_eq!(result.confidence, None);
    }

    #[test]
    fn test_parse_unknown_severity_is_error() {
        let response = r#"{"grade": "G1", "defects": [{"type": "Stains", "severity": "Critical"}]}"#;
        assert!(matches!(parse_classification(response), Err(Error::Parse(_))));
    }

    #[test]
    fn test_parse_missing_grade_is_error() {
        assert!(parse_classification(r#"{"defects": []}"#).is_err());
        assert!(parse_classification(r#"{"grade": "   "}"#).is_err());
        assert!(parse_classification(r#"{"grade": null}"#).is_err());
    }

    #[test]
    fn test_parse_invalid_json_is_error() {
        assert!(parse_classification(r#"{"grade": "G1", }"#).is_err());
        assert!(parse_classification("").is_err());
    }
}

//! プロンプト生成モジュール
//!
//! 全バックエンドで共有されるプロンプト生成ロジック:
//! - build_classification_prompt: カタログから分類指示を生成
//! - build_response_schema: 構造化出力用のJSONスキーマ
//!
//! どちらも副作用のない純粋関数で、呼び出し時点のカタログだけを参照する。

use crate::catalog::Catalog;
use crate::types::Severity;
use serde_json::{json, Value};

/// 分類プロンプト生成
///
/// # Arguments
/// * `catalog` - 現在有効なカタログ
///
/// # Returns
/// グレード一覧・欠陥一覧を埋め込んだ指示文
pub fn build_classification_prompt(catalog: &Catalog) -> String {
    let defect_list = if catalog.defect_types().is_empty() {
        "- (no predefined defect types; describe any visible surface defect)".to_string()
    } else {
        catalog
            .defect_types()
            .iter()
            .map(|d| format_entry(&d.name, &d.description))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let grade_list = catalog
        .grades()
        .iter()
        .map(|g| format_entry(&g.name, &g.description))
        .collect::<Vec<_>>()
        .join("\n");

    let severities = Severity::ALL
        .iter()
        .map(|s| format!("\"{}\"", s))
        .collect::<Vec<_>>()
        .join("|");

    format!(
        r#"You are a strict QA inspector for galvanized steel sheet on a production line.
Analyze the input surface image for the following SPECIFIC defects:
{defect_list}

Classify the result into exactly one of the following grades based on the defects found
(listed from best to worst):
{grade_list}

Output ONLY valid JSON:
{{
  "grade": "Exact name of one of the defined grades",
  "defects": [{{"type": "Name from the defect list", "severity": {severities}, "description": "Short reasoning"}}],
  "confidence": number (0-100)
}}

Rules:
- "grade" must be copied verbatim from the grade list
- Report an empty "defects" array when the surface is clean
- Do not output any text outside the JSON object"#
    )
}

fn format_entry(name: &str, description: &str) -> String {
    if description.is_empty() {
        format!("- {}", name)
    } else {
        format!("- {}: {}", name, description)
    }
}

/// 構造化出力用のレスポンススキーマ
///
/// クラウドAPIの `responseSchema` にそのまま渡す。
/// グレードはカタログ名の enum に制限する。
pub fn build_response_schema(catalog: &Catalog) -> Value {
    let severities: Vec<&str> = Severity::ALL.iter().map(|s| s.as_str()).collect();

    json!({
        "type": "OBJECT",
        "properties": {
            "grade": {
                "type": "STRING",
                "description": "The quality grade of the steel sheet",
                "enum": catalog.grade_names(),
            },
            "defects": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "type": { "type": "STRING", "description": "Defect type from the defect list" },
                        "severity": { "type": "STRING", "enum": severities },
                        "description": { "type": "STRING", "description": "Short description" }
                    },
                    "required": ["type", "severity", "description"]
                }
            },
            "confidence": {
                "type": "NUMBER",
                "description": "Confidence level between 0 and 100"
            }
        },
        "required": ["grade", "defects", "confidence"]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{DefectTypeConfig, GradeConfig};

    fn custom_catalog() -> Catalog {
        Catalog::new(
            vec![
                GradeConfig { id: "a".into(), name: "A-Class".into(), description: "flawless".into() },
                GradeConfig { id: "b".into(), name: "B-Class".into(), description: String::new() },
            ],
            vec![DefectTypeConfig { id: "x".into(), name: "Dross".into(), description: "zinc dross".into() }],
        )
        .unwrap()
    }

    // =============================================
    // build_classification_prompt テスト
    // =============================================

    #[test]
    fn test_prompt_contains_current_catalog() {
        let prompt = build_classification_prompt(&custom_catalog());

        assert!(prompt.contains("- A-Class: flawless"));
        assert!(prompt.contains("- B-Class\n"));
        assert!(prompt.contains("- Dross: zinc dross"));
        // 既定カタログの内容は混ざらない
        assert!(!prompt.contains("White Rust"));
    }

    #[test]
    fn test_prompt_lists_grades_in_order() {
        let prompt = build_classification_prompt(&Catalog::steel_default());
        let g1 = prompt.find("Grade 1 (Prime)").unwrap();
        let g2 = prompt.find("Grade 2 (Standard)").unwrap();
        let g3 = prompt.find("Grade 3 (Scrap)").unwrap();
        assert!(g1 < g2 && g2 < g3);
    }

    #[test]
    fn test_prompt_contains_json_format() {
        let prompt = build_classification_prompt(&Catalog::steel_default());
        assert!(prompt.contains("\"grade\""));
        assert!(prompt.contains("\"defects\""));
        assert!(prompt.contains("\"confidence\""));
        assert!(prompt.contains("\"Low\"|\"Medium\"|\"High\""));
    }

    #[test]
    fn test_prompt_without_defect_types() {
        let catalog = Catalog::new(custom_catalog().grades().to_vec(), vec![]).unwrap();
        let prompt = build_classification_prompt(&catalog);
        assert!(prompt.contains("no predefined defect types"));
    }

    #[test]
    fn test_prompt_is_deterministic() {
        let catalog = Catalog::steel_default();
        assert_eq!(build_classification_prompt(&catalog), build_classification_prompt(&catalog));
    }

    // =============================================
    // build_response_schema テスト
    // =============================================

    #[test]
    fn test_schema_restricts_grade_to_catalog() {
        let schema = build_response_schema(&custom_catalog());
        let grades = schema["properties"]["grade"]["enum"].as_array().unwrap();
        assert_eq!(grades.len(), 2);
        assert_eq!(grades[0], "A-Class");
        assert_eq!(grades[1], "B-Class");
    }

    #[test]
    fn test_schema_requires_all_fields() {
        let schema = build_response_schema(&Catalog::steel_default());
        assert_eq!(schema["required"], json!(["grade", "defects", "confidence"]));
        assert_eq!(
            schema["properties"]["defects"]["items"]["properties"]["severity"]["enum"],
            json!(["Low", "Medium", "High"])
        );
    }
}

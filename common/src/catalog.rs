//! グレード・欠陥カタログモジュール
//!
//! 利用者が編集できる分類体系を管理する。
//! グレードは並び順に意味がある（先頭が最良、末尾が最悪）。

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// グレード定義
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradeConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// 欠陥種別定義
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefectTypeConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// シリアライズ用の素の形（検証前）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSpec {
    grades: Vec<GradeConfig>,
    #[serde(default)]
    defect_types: Vec<DefectTypeConfig>,
}

/// 検証済みカタログ
///
/// 不変条件:
/// - グレードが1件以上ある
/// - グレード名・欠陥種別名はそれぞれ一意で空白のみではない
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CatalogSpec", into = "CatalogSpec")]
pub struct Catalog {
    grades: Vec<GradeConfig>,
    defect_types: Vec<DefectTypeConfig>,
}

impl TryFrom<CatalogSpec> for Catalog {
    type Error = Error;

    fn try_from(spec: CatalogSpec) -> Result<Self> {
        Catalog::new(spec.grades, spec.defect_types)
    }
}

impl From<Catalog> for CatalogSpec {
    fn from(catalog: Catalog) -> Self {
        CatalogSpec {
            grades: catalog.grades,
            defect_types: catalog.defect_types,
        }
    }
}

impl Catalog {
    pub fn new(grades: Vec<GradeConfig>, defect_types: Vec<DefectTypeConfig>) -> Result<Self> {
        if grades.is_empty() {
            return Err(Error::Config("グレードが1件も定義されていません".into()));
        }
        check_unique_names(grades.iter().map(|g| g.name.as_str()), "グレード")?;
        check_unique_names(defect_types.iter().map(|d| d.name.as_str()), "欠陥種別")?;

        Ok(Self { grades, defect_types })
    }

    pub fn grades(&self) -> &[GradeConfig] {
        &self.grades
    }

    pub fn defect_types(&self) -> &[DefectTypeConfig] {
        &self.defect_types
    }

    pub fn grade_names(&self) -> Vec<&str> {
        self.grades.iter().map(|g| g.name.as_str()).collect()
    }

    pub fn contains_grade(&self, name: &str) -> bool {
        self.grades.iter().any(|g| g.name == name)
    }

    pub fn find_grade(&self, name: &str) -> Option<&GradeConfig> {
        self.grades.iter().find(|g| g.name == name)
    }

    /// 最良グレード（先頭）
    pub fn best(&self) -> &GradeConfig {
        &self.grades[0]
    }

    /// 最悪グレード（末尾）
    pub fn worst(&self) -> &GradeConfig {
        &self.grades[self.grades.len() - 1]
    }

    /// 中間グレード（2番目、1件しかなければ先頭）
    ///
    /// 判定不能時とバックエンド障害時の既定値に使う
    pub fn middle(&self) -> &GradeConfig {
        self.grades.get(1).unwrap_or(&self.grades[0])
    }

    /// スチール（溶融亜鉛めっき鋼板）向けの初期カタログ
    pub fn steel_default() -> Self {
        let grades = vec![
            grade("g1", "Grade 1 (Prime)", "欠陥なし、またはごく軽微な外観差のみ"),
            grade("g2", "Grade 2 (Standard)", "外観欠陥はあるが使用可能"),
            grade("g3", "Grade 3 (Scrap)", "重大な欠陥があり出荷不可"),
        ];
        let defect_types = vec![
            defect("d1", "White Rust", "白錆（白色の腐食生成物）"),
            defect("d2", "Scratches", "線状の傷・擦れ"),
            defect("d3", "Peeling", "めっき層の剥離・密着不良"),
            defect("d4", "Pimples/Blisters", "ブツ・ふくれ"),
            defect("d5", "Spangle Irregularity", "スパングル（結晶模様）の不均一"),
            defect("d6", "Stains", "変色・しみ"),
        ];

        Self { grades, defect_types }
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::steel_default()
    }
}

fn grade(id: &str, name: &str, description: &str) -> GradeConfig {
    GradeConfig {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
    }
}

fn defect(id: &str, name: &str, description: &str) -> DefectTypeConfig {
    DefectTypeConfig {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
    }
}

fn check_unique_names<'a>(names: impl Iterator<Item = &'a str>, label: &str) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        if name.trim().is_empty() {
            return Err(Error::Config(format!("{}名が空です", label)));
        }
        if !seen.insert(name) {
            return Err(Error::Config(format!("{}名が重複しています: {}", label, name)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grades(names: &[&str]) -> Vec<GradeConfig> {
        names
            .iter()
            .enumerate()
            .map(|(i, n)| grade(&format!("g{}", i + 1), n, ""))
            .collect()
    }

    #[test]
    fn test_steel_default_order() {
        let catalog = Catalog::steel_default();
        assert_eq!(catalog.best().name, "Grade 1 (Prime)");
        assert_eq!(catalog.middle().name, "Grade 2 (Standard)");
        assert_eq!(catalog.worst().name, "Grade 3 (Scrap)");
        assert_eq!(catalog.defect_types().len(), 6);
    }

    #[test]
    fn test_new_rejects_empty_grades() {
        let result = Catalog::new(vec![], vec![]);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_new_rejects_duplicate_grade_names() {
        let result = Catalog::new(grades(&["A", "B", "A"]), vec![]);
        match result {
            Err(Error::Config(msg)) => assert!(msg.contains("重複")),
            other => panic!("Expected Config error, got {:?}", other),
        }
    }

    #[test]
    fn test_new_rejects_blank_defect_name() {
        let defects = vec![defect("d1", "  ", "")];
        assert!(Catalog::new(grades(&["A"]), defects).is_err());
    }

    #[test]
    fn test_single_grade_catalog_positions() {
        let catalog = Catalog::new(grades(&["Only"]), vec![]).unwrap();
        assert_eq!(catalog.best().name, "Only");
        assert_eq!(catalog.middle().name, "Only");
        assert_eq!(catalog.worst().name, "Only");
    }

    #[test]
    fn test_deserialize_validates() {
        let json = r#"{"grades": [], "defectTypes": []}"#;
        assert!(serde_json::from_str::<Catalog>(json).is_err());

        let json = r#"{"grades": [{"id": "g1", "name": "G1"}]}"#;
        let catalog: Catalog = serde_json::from_str(json).expect("デシリアライズ失敗");
        assert!(catalog.contains_grade("G1"));
        assert!(catalog.defect_types().is_empty());
    }

    #[test]
    fn test_serialize_camel_case() {
        let json = serde_json::to_string(&Catalog::steel_default()).expect("シリアライズ失敗");
        assert!(json.contains("\"defectTypes\""));
        assert!(json.contains("\"White Rust\""));
    }
}

//! Steel QC Common Library
//!
//! 取得・推論パイプラインとCLIで共有される型とユーティリティ（I/Oなし）

pub mod types;
pub mod catalog;
pub mod error;
pub mod parser;
pub mod prompts;
pub mod reconcile;
pub mod summary;

pub use types::{Defect, InspectionRecord, RawClassification, Severity};
pub use catalog::{Catalog, DefectTypeConfig, GradeConfig};
pub use error::{Error, Result};
pub use parser::{extract_json, parse_classification};
pub use prompts::{build_classification_prompt, build_response_schema};
pub use reconcile::{reconcile_grade, GradeMatch, GradePosition, GRADE_RULES};
pub use summary::{summarize, filter_by_severity, HistorySummary};

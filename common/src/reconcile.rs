//! グレード照合ロジック
//!
//! バックエンドが返したグレード文字列をカタログのグレードに対応付ける。
//! 完全一致しない場合は上から順に規則表を評価する。
//!
//! 規則表は「先頭が最良・末尾が最悪」というカタログの並び順を前提にしている。
//! 利用者がグレードを並べ替えると対応先の意味も変わる点に注意。

use crate::catalog::{Catalog, GradeConfig};
use regex::Regex;

lazy_static::lazy_static! {
    /// 英字の連続・数字の連続を1語とする（"G1" → "g", "1"）
    static ref WORD_RE: Regex = Regex::new(r"[a-z]+|[0-9]+").unwrap();
}

/// 規則が指すカタログ上の位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradePosition {
    /// 先頭
    Best,
    /// 末尾
    Worst,
    /// 2番目（1件なら先頭）
    Middle,
}

impl GradePosition {
    pub fn resolve<'a>(&self, catalog: &'a Catalog) -> &'a GradeConfig {
        match self {
            GradePosition::Best => catalog.best(),
            GradePosition::Worst => catalog.worst(),
            GradePosition::Middle => catalog.middle(),
        }
    }
}

/// 照合規則（語単位のトークン → 位置）
#[derive(Debug)]
pub struct GradeRule {
    pub name: &'static str,
    /// 小文字で比較する。英字は語の先頭一致（"reject" は "rejected" にも当たる）、
    /// 数字は語全体の一致（"1" は "13" に当たらない）
    pub tokens: &'static [&'static str],
    pub position: GradePosition,
}

impl GradeRule {
    pub fn matches(&self, lowered: &str) -> bool {
        WORD_RE
            .find_iter(lowered)
            .any(|word| self.tokens.iter().any(|t| token_matches(word.as_str(), t)))
    }
}

fn token_matches(word: &str, token: &str) -> bool {
    if token.bytes().all(|b| b.is_ascii_digit()) {
        word == token
    } else {
        word.starts_with(token)
    }
}

/// 照合規則表（上から順に評価）
pub const GRADE_RULES: &[GradeRule] = &[
    GradeRule {
        name: "best",
        tokens: &["1", "one", "good", "prime"],
        position: GradePosition::Best,
    },
    GradeRule {
        name: "worst",
        tokens: &["3", "three", "scrap", "reject"],
        position: GradePosition::Worst,
    },
];

/// どの規則にも当たらない場合の位置
pub const DEFAULT_POSITION: GradePosition = GradePosition::Middle;

/// 照合結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GradeMatch<'a> {
    /// カタログ名と完全一致
    Exact(&'a GradeConfig),
    /// 規則表による対応付け（rule は規則名、既定位置なら "default"）
    Heuristic {
        grade: &'a GradeConfig,
        rule: &'static str,
    },
}

impl<'a> GradeMatch<'a> {
    pub fn grade(&self) -> &'a GradeConfig {
        match self {
            GradeMatch::Exact(grade) => grade,
            GradeMatch::Heuristic { grade, .. } => grade,
        }
    }

    pub fn is_exact(&self) -> bool {
        matches!(self, GradeMatch::Exact(_))
    }
}

/// グレード文字列をカタログに照合
///
/// 戻り値のグレードは必ずカタログのメンバー
pub fn reconcile_grade<'a>(raw: &str, catalog: &'a Catalog) -> GradeMatch<'a> {
    if let Some(grade) = catalog.find_grade(raw) {
        return GradeMatch::Exact(grade);
    }

    let lowered = raw.to_lowercase();
    for rule in GRADE_RULES {
        if rule.matches(&lowered) {
            return GradeMatch::Heuristic {
                grade: rule.position.resolve(catalog),
                rule: rule.name,
            };
        }
    }

    GradeMatch::Heuristic {
        grade: DEFAULT_POSITION.resolve(catalog),
        rule: "default",
    }
}

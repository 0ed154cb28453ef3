//! Deterministic quality checks over a processed table.

use crate::glossary::Glossary;
use crate::protocol::is_sentinel;
use crate::types::Row;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;

/// Decimal numbers, e.g. `12` or `3.5`.
///
/// SAFETY: Pattern is a compile-time constant that is known to be valid.
#[allow(clippy::unwrap_used)]
static NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)?").unwrap());

/// Whitespace between two CJK ideographs.
///
/// SAFETY: Pattern is a compile-time constant that is known to be valid.
#[allow(clippy::unwrap_used)]
static CJK_SPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\x{4e00}-\x{9fff}]\s+[\x{4e00}-\x{9fff}]").unwrap());

/// Category of an audit finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// A glossary term has no accepted rendering in the target.
    Glossary,
    /// Numbers from the source are absent in the target.
    Numbers,
    /// ASCII comma in mostly-CJK text.
    Punctuation,
    /// Space between CJK characters.
    Spacing,
    /// Target is mostly ASCII letters.
    Untranslated,
}

impl fmt::Display for AuditKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Glossary => "Glossary",
            Self::Numbers => "Numbers",
            Self::Punctuation => "Punctuation",
            Self::Spacing => "Spacing",
            Self::Untranslated => "Untranslated",
        };
        f.write_str(label)
    }
}

/// One finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditIssue {
    /// 0-based row position.
    pub row: usize,
    /// Row identifier.
    pub id: String,
    /// Category.
    pub kind: AuditKind,
    /// Human-readable detail.
    pub message: String,
}

fn is_cjk(c: char) -> bool {
    ('\u{4e00}'..='\u{9fff}').contains(&c)
}

/// Check every row; sentinel and empty rows are skipped.
pub fn audit_rows(rows: &[Row], glossary: &Glossary) -> Vec<AuditIssue> {
    let mut issues = Vec::new();
    for (index, row) in rows.iter().enumerate() {
        let source = row.source.trim();
        let target = row.target.trim();
        if source.is_empty() || target.is_empty() || is_sentinel(target) {
            continue;
        }
        let mut push = |kind, message: String| {
            issues.push(AuditIssue {
                row: index,
                id: row.id.clone(),
                kind,
                message,
            });
        };

        for violation in glossary.violations(source, target) {
            push(
                AuditKind::Glossary,
                format!(
                    "Missing term '{}' for source '{}'",
                    violation.renderings, violation.term
                ),
            );
        }

        let target_numbers: HashSet<&str> =
            NUMBER_RE.find_iter(target).map(|m| m.as_str()).collect();
        let mut missing: Vec<&str> = Vec::new();
        for m in NUMBER_RE.find_iter(source) {
            if !target_numbers.contains(m.as_str()) && !missing.contains(&m.as_str()) {
                missing.push(m.as_str());
            }
        }
        if !missing.is_empty() {
            push(
                AuditKind::Numbers,
                format!("Potential missing numbers: {}", missing.join(", ")),
            );
        }

        let total = target.chars().count();
        if target.contains(',') && target.chars().filter(|c| is_cjk(*c)).count() * 2 > total {
            push(
                AuditKind::Punctuation,
                "English comma (,) in Chinese text; expected '，' or '、'".to_string(),
            );
        }

        if CJK_SPACE_RE.is_match(target) {
            push(
                AuditKind::Spacing,
                "Unexpected space between Chinese characters".to_string(),
            );
        }

        let ascii_letters = target.chars().filter(char::is_ascii_alphabetic).count();
        if total > 5 && ascii_letters * 10 > total * 8 {
            push(
                AuditKind::Untranslated,
                "Target appears to be mostly untranslated".to_string(),
            );
        }
    }
    issues
}

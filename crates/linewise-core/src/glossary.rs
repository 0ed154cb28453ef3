//! Terminology list and the deterministic compliance check applied to model output.
//!
//! A glossary maps a source term to one or more accepted renderings
//! (`/`-delimited in the file). After a row is rewritten, every term whose
//! source form occurs in the row's source (case-insensitive, whole word)
//! must appear in the output through one of its renderings. When none do,
//! and the untranslated term is not in the output either, a violation note
//! is appended to the text. Rows are never rejected for this.
//!
//! ```rust
//! use linewise_core::Glossary;
//!
//! let glossary = Glossary::from_tsv_str("English\tChinese\nParty\t方\n")?;
//! let checked = glossary.enforce("The Party shall indemnify", "当事人应赔偿");
//! assert_eq!(checked, "当事人应赔偿 [[GLOSSARY_VIOLATION: Party should be 方]]");
//! assert_eq!(glossary.enforce("The Party shall indemnify", "该方应赔偿"), "该方应赔偿");
//! # Ok::<(), linewise_core::Error>(())
//! ```

use crate::{Error, Result};
use regex::Regex;
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Header cells recognised on the first line of a glossary file.
const HEADER_CELLS: &[&str] = &["english", "term", "source", "en", "en_term"];

/// One source term with its accepted renderings.
#[derive(Debug, Clone)]
pub struct GlossaryEntry {
    term: String,
    renderings: Vec<String>,
    pattern: Regex,
}

impl GlossaryEntry {
    /// Build an entry; empty renderings are discarded.
    pub fn new(term: &str, renderings: impl IntoIterator<Item = impl AsRef<str>>) -> Result<Self> {
        let term = term.trim().to_string();
        let renderings: Vec<String> = renderings
            .into_iter()
            .map(|r| r.as_ref().trim().to_string())
            .filter(|r| !r.is_empty())
            .collect();
        let pattern = Regex::new(&word_pattern(&term))
            .map_err(|e| Error::Parse(format!("glossary term '{term}': {e}")))?;
        Ok(Self {
            term,
            renderings,
            pattern,
        })
    }

    /// Source form.
    pub fn term(&self) -> &str {
        &self.term
    }

    /// Accepted renderings.
    pub fn renderings(&self) -> &[String] {
        &self.renderings
    }

    /// Renderings as written in the file (`a/b`).
    pub fn renderings_display(&self) -> String {
        self.renderings.join("/")
    }

    /// Whether the term occurs in `text` as a whole word, ignoring case.
    pub fn occurs_in(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }
}

/// `(?i)` pattern matching `term` on word boundaries.
///
/// Boundaries are only asserted next to word characters, so terms such as
/// `(a)` or `C++` still match.
fn word_pattern(term: &str) -> String {
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    let lead = if term.chars().next().is_some_and(is_word) { r"\b" } else { "" };
    let trail = if term.chars().last().is_some_and(is_word) { r"\b" } else { "" };
    format!("(?i){lead}{}{trail}", regex::escape(term))
}

/// A glossary term the rewritten text failed to honour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Source term.
    pub term: String,
    /// Accepted renderings, `/`-joined.
    pub renderings: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} should be {}", self.term, self.renderings)
    }
}

/// Ordered terminology list.
#[derive(Debug, Clone, Default)]
pub struct Glossary {
    entries: Vec<GlossaryEntry>,
}

impl Glossary {
    /// Empty glossary; enforcing it is a no-op.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a tab-separated glossary file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let glossary = Self::from_tsv_str(&content)?;
        info!("Loaded {} terms from glossary.", glossary.len());
        Ok(glossary)
    }

    /// Parse `term<TAB>renderings` lines.
    pub fn from_tsv_str(content: &str) -> Result<Self> {
        let mut entries = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            let cells: Vec<&str> = line.trim_end_matches('\r').split('\t').collect();
            if line_no == 0 && is_header(cells[0]) {
                continue;
            }
            if cells.len() < 2 {
                continue;
            }
            let term = cells[0].trim();
            if term.is_empty() {
                continue;
            }
            let entry = GlossaryEntry::new(term, cells[1].split('/'))?;
            if entry.renderings.is_empty() {
                warn!("Glossary term '{term}' has no renderings, skipping.");
                continue;
            }
            entries.push(entry);
        }
        Ok(Self { entries })
    }

    /// Build from `(term, renderings)` pairs, renderings `/`-delimited.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Result<Self> {
        let entries = pairs
            .into_iter()
            .filter(|(term, _)| !term.trim().is_empty())
            .map(|(term, renderings)| GlossaryEntry::new(term, renderings.split('/')))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            entries: entries
                .into_iter()
                .filter(|e| !e.renderings.is_empty())
                .collect(),
        })
    }

    /// Number of terms.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no terms.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Terms in file order.
    pub fn entries(&self) -> &[GlossaryEntry] {
        &self.entries
    }

    /// Violations of `target` against the terms found in `source`.
    ///
    /// A target that keeps the source term as a literal substring is accepted.
    pub fn violations(&self, source: &str, target: &str) -> Vec<Violation> {
        self.entries
            .iter()
            .filter(|entry| entry.occurs_in(source))
            .filter(|entry| {
                !entry.renderings.iter().any(|r| target.contains(r.as_str()))
                    && !target.contains(entry.term.as_str())
            })
            .map(|entry| Violation {
                term: entry.term.clone(),
                renderings: entry.renderings_display(),
            })
            .collect()
    }

    /// `target` with a violation annotation appended when needed.
    pub fn enforce(&self, source: &str, target: &str) -> String {
        let violations = self.violations(source, target);
        if violations.is_empty() {
            return target.to_string();
        }
        let notes: Vec<String> = violations.iter().map(ToString::to_string).collect();
        format!("{target} [[GLOSSARY_VIOLATION: {}]]", notes.join("; "))
    }

    /// `- term -> renderings` lines for prompts.
    pub fn prompt_lines(&self) -> String {
        if self.entries.is_empty() {
            return "(No glossary provided)".to_string();
        }
        self.entries
            .iter()
            .map(|e| format!("- {} -> {}", e.term, e.renderings_display()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn is_header(cell: &str) -> bool {
    let cell = cell.trim().to_lowercase();
    HEADER_CELLS.contains(&cell.as_str())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn party() -> Glossary {
        Glossary::from_pairs([("Party", "方")]).unwrap()
    }

    #[test]
    fn test_violation_when_rendering_and_term_absent() {
        let out = party().enforce("The Party shall indemnify", "当事人应赔偿");
        assert_eq!(out, "当事人应赔偿 [[GLOSSARY_VIOLATION: Party should be 方]]");
    }

    #[test]
    fn test_no_violation_when_rendering_present() {
        let out = party().enforce("The Party shall indemnify", "该方应赔偿");
        assert_eq!(out, "该方应赔偿");
    }

    #[test]
    fn test_untranslated_term_is_tolerated() {
        let out = party().enforce("The Party shall indemnify", "Party 应赔偿");
        assert_eq!(out, "Party 应赔偿");
        assert!(party().violations("The Party", "当事人Party同意").is_empty());
        // Kept terms are matched literally, case included.
        assert_eq!(party().violations("The Party", "当事人PARTY").len(), 1);
    }

    #[test]
    fn test_matching_is_whole_word_and_case_insensitive() {
        let glossary = party();
        assert!(glossary.violations("the party agrees", "同意").len() == 1);
        assert!(glossary.violations("a partygoer", "派对").is_empty());
        assert!(glossary.violations("Counterparty", "对方").is_empty());
    }

    #[test]
    fn test_alternative_renderings() {
        let glossary = Glossary::from_pairs([("Agreement", "协议/合同")]).unwrap();
        assert!(glossary.violations("This Agreement", "本合同").is_empty());
        let out = glossary.enforce("This Agreement", "本文件");
        assert_eq!(
            out,
            "本文件 [[GLOSSARY_VIOLATION: Agreement should be 协议/合同]]"
        );
    }

    #[test]
    fn test_multiple_violations_joined() {
        let glossary = Glossary::from_pairs([("Party", "方"), ("Agreement", "协议")]).unwrap();
        let out = glossary.enforce("Each Party to this Agreement", "各当事人");
        assert_eq!(
            out,
            "各当事人 [[GLOSSARY_VIOLATION: Party should be 方; Agreement should be 协议]]"
        );
    }

    #[test]
    fn test_non_word_edges_still_match() {
        let glossary = Glossary::from_pairs([("(a)", "（a）")]).unwrap();
        assert_eq!(glossary.violations("see (a) above", "见上文").len(), 1);
    }

    #[test]
    fn test_tsv_parsing_skips_header_and_short_lines() {
        let glossary = Glossary::from_tsv_str(
            "EN_Term\tCN\nParty\t方 / 一方\nbroken line\n\t空\nLicensor\t许可方\r\n",
        )
        .unwrap();
        assert_eq!(glossary.len(), 2);
        assert_eq!(glossary.entries()[0].renderings(), ["方", "一方"]);
        assert_eq!(glossary.entries()[1].term(), "Licensor");
    }

    #[test]
    fn test_first_line_kept_when_not_header() {
        let glossary = Glossary::from_tsv_str("Party\t方\n").unwrap();
        assert_eq!(glossary.len(), 1);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("glossary.tsv");
        fs::write(&path, "term\trendering\nParty\t方\n").unwrap();
        let glossary = Glossary::load(&path).unwrap();
        assert_eq!(glossary.prompt_lines(), "- Party -> 方");
        assert_eq!(Glossary::new().prompt_lines(), "(No glossary provided)");
    }
}

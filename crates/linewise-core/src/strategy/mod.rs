//! Rewrite strategies.
//!
//! A [`Strategy`] is the unit of behaviour the [`Processor`](crate::processor::Processor)
//! drives. Every strategy prepares itself once in [`Strategy::setup`], may
//! supply its own batch boundaries, and rewrites one batch at a time in
//! [`Strategy::process_batch`].
//!
//! Four variants ship with the crate:
//!
//! - [`ReviewStrategy`]: one call per row with a sliding context window.
//! - [`SegmentStrategy`]: one call per semantic segment, with the merge
//!   protocol and glossary enforcement.
//! - [`DualPassStrategy`]: translate, then edit, then an optional QA pass.
//! - [`SubtitleStrategy`]: subtitle proofreading with transcription flags
//!   written to the `Comments` column.

mod dual_pass;
mod review;
mod segment;
mod subtitle;

pub use dual_pass::DualPassStrategy;
pub use review::ReviewStrategy;
pub use segment::SegmentStrategy;
pub use subtitle::{SubtitleStrategy, TRANSCRIPTION_FLAG};

use crate::client::GenerationClient;
use crate::config::Config;
use crate::glossary::Glossary;
use crate::types::{Row, Segment};
use crate::window::ContextWindowBuilder;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

/// Auxiliary inputs loaded once before setup and immutable afterwards.
#[derive(Debug, Clone, Default)]
pub struct StrategyContext {
    /// Terminology list; empty when none was supplied.
    pub glossary: Glossary,
    /// Free-text style guidance.
    pub style_guide: Option<String>,
    /// Where the glossary came from, for summaries.
    pub glossary_path: Option<PathBuf>,
    /// Where the style guide came from, for summaries.
    pub style_path: Option<PathBuf>,
}

impl StrategyContext {
    /// Load the optional glossary and style guide files.
    pub fn load(glossary: Option<&Path>, style: Option<&Path>) -> Result<Self> {
        let mut context = Self::default();
        if let Some(path) = glossary {
            context.glossary = Glossary::load(path)?;
            context.glossary_path = Some(path.to_path_buf());
        }
        if let Some(path) = style {
            let text = fs::read_to_string(path)?;
            info!("Loaded style guide ({} chars).", text.chars().count());
            context.style_guide = Some(text);
            context.style_path = Some(path.to_path_buf());
        }
        Ok(context)
    }
}

/// Pluggable batch rewriting behaviour.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Display name.
    fn name(&self) -> &'static str;

    /// One-time preparation over the full row sequence.
    ///
    /// Errors are logged by the caller; the strategy must still be usable
    /// afterwards with its default state.
    async fn setup(
        &mut self,
        client: &GenerationClient,
        rows: &[Row],
        context: &StrategyContext,
    ) -> Result<()>;

    /// Custom batch boundaries for a run over `total` rows.
    ///
    /// `None` means fixed-size batches.
    fn batch_boundaries(&self, _total: usize) -> Option<Vec<Segment>> {
        None
    }

    /// Rewrite one batch.
    ///
    /// `history` is a bounded suffix of already-processed rows. The result
    /// must hold exactly one row per input row, in order, with locked rows
    /// unchanged.
    async fn process_batch(
        &self,
        client: &GenerationClient,
        batch: &[Row],
        history: &[Row],
        window: &ContextWindowBuilder<'_>,
    ) -> Result<Vec<Row>>;
}

/// Selectable strategy variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    /// Row-by-row review.
    Review,
    /// Whole-segment rewrite with the merge protocol.
    Segment,
    /// Translate + edit.
    DualPass,
    /// Subtitle proofreading with per-row comments.
    Subtitle,
}

impl StrategyKind {
    /// Every variant, in display order.
    pub const ALL: [Self; 4] = [Self::Review, Self::Segment, Self::DualPass, Self::Subtitle];

    /// Command-line spelling.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Review => "review",
            Self::Segment => "segment",
            Self::DualPass => "dual-pass",
            Self::Subtitle => "subtitle",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                Error::Config(format!(
                    "unknown mode '{s}' (expected one of: review, segment, dual-pass, subtitle)"
                ))
            })
    }
}

/// Build the strategy for `kind` from configuration.
pub fn build_strategy(kind: StrategyKind, config: &Config) -> Box<dyn Strategy> {
    match kind {
        StrategyKind::Review => Box::new(ReviewStrategy::from_config(config)),
        StrategyKind::Segment => Box::new(SegmentStrategy::from_config(config)),
        StrategyKind::DualPass => Box::new(DualPassStrategy::from_config(config)),
        StrategyKind::Subtitle => Box::new(SubtitleStrategy::from_config(config)),
    }
}

/// Pretty-printed JSON array for prompts; `None` when empty.
pub(crate) fn pretty(values: &[serde_json::Value]) -> String {
    if values.is_empty() {
        return "None".to_string();
    }
    serde_json::to_string_pretty(values).unwrap_or_else(|_| "[]".to_string())
}

/// String or number as text; models echo ids either way.
pub(crate) fn scalar(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Source text of the leading rows, joined and capped at `max_chars`.
pub(crate) fn source_snippet(rows: &[Row], max_rows: usize, sep: &str, max_chars: usize) -> String {
    let joined = rows
        .iter()
        .take(max_rows)
        .map(|r| r.source.as_str())
        .collect::<Vec<_>>()
        .join(sep);
    crate::window::preview(&joined, max_chars).to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_kind_parsing() {
        assert_eq!("review".parse::<StrategyKind>().unwrap(), StrategyKind::Review);
        assert_eq!("Dual-Pass".parse::<StrategyKind>().unwrap(), StrategyKind::DualPass);
        assert!("legal".parse::<StrategyKind>().is_err());
        assert_eq!(StrategyKind::Segment.to_string(), "segment");
        assert_eq!(" subtitle ".parse::<StrategyKind>().unwrap(), StrategyKind::Subtitle);
    }

    #[test]
    fn test_build_strategy_names() {
        let config = Config::default();
        let names: Vec<&str> = StrategyKind::ALL
            .into_iter()
            .map(|k| build_strategy(k, &config).name())
            .collect();
        assert_eq!(
            names,
            vec!["ReviewStrategy", "SegmentStrategy", "DualPassStrategy", "SubtitleStrategy"]
        );
    }

    #[test]
    fn test_context_loading() {
        let dir = tempdir().unwrap();
        let glossary = dir.path().join("g.tsv");
        let style = dir.path().join("style.md");
        fs::write(&glossary, "Party\t方\n").unwrap();
        fs::write(&style, "Formal register.").unwrap();

        let context = StrategyContext::load(Some(&glossary), Some(&style)).unwrap();
        assert_eq!(context.glossary.len(), 1);
        assert_eq!(context.style_guide.as_deref(), Some("Formal register."));

        assert!(StrategyContext::load(Some(&dir.path().join("absent.tsv")), None).is_err());
    }

    #[test]
    fn test_source_snippet_caps_rows_and_chars() {
        let rows: Vec<Row> = (0..5).map(|i| Row::new(i.to_string(), "abc", "")).collect();
        assert_eq!(source_snippet(&rows, 2, " ", 100), "abc abc");
        assert_eq!(source_snippet(&rows, 5, "\n", 5), "abc\na");
    }
}

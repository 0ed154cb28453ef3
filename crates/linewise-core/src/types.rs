//! Core data types: rows, segments and the processed-row history.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Range;

/// Auxiliary field name used for free-text reviewer comments.
pub const COMMENTS_FIELD: &str = "Comments";

/// One unit of source/target text plus metadata.
///
/// Position in the row sequence is the row's identity for windowing and
/// segmentation; `id` is a display and alignment key only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    /// Opaque stable identifier.
    pub id: String,
    /// Source text. Never modified during a run.
    pub source: String,
    /// Rewritten text, initially empty or a draft.
    pub target: String,
    /// Locked rows are echoed, never rewritten.
    #[serde(default)]
    pub locked: bool,
    /// Any other columns of the input, keyed by their original header.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl Row {
    /// Create an unlocked row with no auxiliary fields.
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            locked: false,
            extra: BTreeMap::new(),
        }
    }

    /// Set the locked flag using builder pattern.
    #[must_use]
    pub fn with_locked(mut self, locked: bool) -> Self {
        self.locked = locked;
        self
    }

    /// Set an auxiliary field using builder pattern.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Reviewer comment, if any.
    pub fn comment(&self) -> Option<&str> {
        self.extra
            .get(COMMENTS_FIELD)
            .map(String::as_str)
            .filter(|c| !c.is_empty())
    }

    /// Length of the source text in characters.
    pub fn source_chars(&self) -> usize {
        self.source.chars().count()
    }

    /// Whether the row carries any non-whitespace source text.
    pub fn has_source(&self) -> bool {
        !self.source.trim().is_empty()
    }

    /// Copy of this row with a different target.
    #[must_use]
    pub fn with_target(&self, target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..self.clone()
        }
    }
}

/// A contiguous span of row positions sent to the generation service as one unit.
///
/// `end` is inclusive, so a segment always holds at least one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Segment {
    /// First row position.
    pub start: usize,
    /// Last row position (inclusive).
    pub end: usize,
}

impl Segment {
    /// Create a segment from inclusive bounds.
    pub const fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    /// Number of rows in the segment.
    #[allow(clippy::len_without_is_empty)]
    pub const fn len(&self) -> usize {
        self.end - self.start + 1
    }

    /// Half-open range for slicing a row sequence.
    pub const fn range(&self) -> Range<usize> {
        self.start..self.end + 1
    }

    /// Shift both bounds by `offset`.
    #[must_use]
    pub const fn offset(self, offset: usize) -> Self {
        Self::new(self.start + offset, self.end + offset)
    }

    /// Fixed-size chunks tiling `[0, total)`.
    pub fn chunks(total: usize, size: usize) -> Vec<Self> {
        let size = size.max(1);
        (0..total)
            .step_by(size)
            .map(|start| Self::new(start, (start + size).min(total) - 1))
            .collect()
    }
}

/// Append-only record of processed rows.
///
/// Strategies never see the live collection; they receive a bounded
/// suffix through [`History::tail`].
#[derive(Debug, Clone, Default)]
pub struct History {
    rows: Vec<Row>,
}

impl History {
    /// Empty history with room for `capacity` rows.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            rows: Vec::with_capacity(capacity),
        }
    }

    /// Append a processed batch.
    pub fn extend(&mut self, batch: impl IntoIterator<Item = Row>) {
        self.rows.extend(batch);
    }

    /// The last `n` processed rows (fewer at the start of a run).
    pub fn tail(&self, n: usize) -> &[Row] {
        &self.rows[self.rows.len().saturating_sub(n)..]
    }

    /// Number of processed rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether nothing has been processed yet.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Consume the history, yielding the processed rows in order.
    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_len_and_range() {
        let seg = Segment::new(200, 399);
        assert_eq!(seg.len(), 200);
        assert_eq!(seg.range(), 200..400);
        assert_eq!(Segment::new(3, 3).len(), 1);
    }

    #[test]
    fn test_segment_chunks_cover_total() {
        let chunks = Segment::chunks(5, 3);
        assert_eq!(chunks, vec![Segment::new(0, 2), Segment::new(3, 4)]);
        assert!(Segment::chunks(0, 3).is_empty());
        assert_eq!(Segment::chunks(2, 0), vec![Segment::new(0, 0), Segment::new(1, 1)]);
    }

    #[test]
    fn test_history_tail_is_bounded() {
        let mut history = History::default();
        assert!(history.tail(3).is_empty());

        history.extend((0..5).map(|i| Row::new(i.to_string(), "s", "t")));
        let tail = history.tail(3);
        assert_eq!(tail.len(), 3);
        assert_eq!(tail[0].id, "2");
        assert_eq!(history.tail(50).len(), 5);
    }

    #[test]
    fn test_row_comment_ignores_empty() {
        let row = Row::new("1", "a", "b").with_extra(COMMENTS_FIELD, "");
        assert_eq!(row.comment(), None);
        let row = row.with_extra(COMMENTS_FIELD, "check name");
        assert_eq!(row.comment(), Some("check name"));
    }

    #[test]
    fn test_source_chars_counts_scalars() {
        assert_eq!(Row::new("1", "合同方", "").source_chars(), 3);
    }
}

//! Two-phase semantic segmentation of a row sequence.
//!
//! ## Phase 1: proposal
//!
//! Rows are walked in fixed analysis chunks. For each chunk the model gets a
//! numbered digest and answers with a JSON array of `{"start", "end"}` spans
//! relative to the chunk. The proposal is repaired ([`repair_spans`]) so the
//! chunk is tiled exactly once, then shifted to absolute positions. A chunk
//! whose call fails, or whose answer cannot be parsed, becomes a single
//! segment.
//!
//! ## Phase 2: merge
//!
//! [`merge_segments`] walks the raw segments left to right and folds each
//! one into the running segment while the line cap allows and either the
//! running segment is still under its character target or the next one is a
//! tiny straggler.
//!
//! ```rust
//! use linewise_core::segment::{MergeBudget, merge_segments, tiles};
//! use linewise_core::{Row, Segment};
//!
//! let rows: Vec<Row> = (0..6).map(|i| Row::new(i.to_string(), "word", "")).collect();
//! let raw: Vec<Segment> = (0..6).map(|i| Segment::new(i, i)).collect();
//! let budget = MergeBudget { max_lines: 4, ..MergeBudget::default() };
//!
//! let merged = merge_segments(&raw, &rows, &budget);
//! assert_eq!(merged, vec![Segment::new(0, 3), Segment::new(4, 5)]);
//! assert!(tiles(&merged, rows.len()));
//! ```

use crate::client::{GenerateOptions, GenerationClient};
use crate::config::Config;
use crate::protocol::parse_json;
use crate::types::{Row, Segment};
use crate::window::preview;
use crate::{Error, Result};
use serde::Deserialize;
use tracing::{debug, info, warn};

/// Size limits applied while merging raw segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeBudget {
    /// Character budget a segment grows towards.
    pub target_chars: usize,
    /// Hard cap on rows per merged segment.
    pub max_lines: usize,
    /// Segments below this are absorbed whenever the line cap allows.
    pub straggler_chars: usize,
}

impl Default for MergeBudget {
    fn default() -> Self {
        Self {
            target_chars: 1500,
            max_lines: 40,
            straggler_chars: 100,
        }
    }
}

/// A relative span as proposed by the model. Bounds may be garbage.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RawSpan {
    /// Proposed first row (relative).
    pub start: i64,
    /// Proposed last row (relative, inclusive).
    pub end: i64,
}

/// Turn a raw proposal into spans tiling `[0, len)` exactly once.
///
/// Bounds are clamped, inverted spans dropped, overlaps trimmed and gaps
/// filled (including before the first and after the last span).
pub fn repair_spans(spans: &[RawSpan], len: usize) -> Vec<Segment> {
    if len == 0 {
        return Vec::new();
    }
    let last = i64::try_from(len - 1).unwrap_or(i64::MAX);

    let mut clamped: Vec<(usize, usize)> = spans
        .iter()
        .map(|s| (s.start.clamp(0, last), s.end.clamp(0, last)))
        .filter(|(start, end)| start <= end)
        .filter_map(|(start, end)| Some((usize::try_from(start).ok()?, usize::try_from(end).ok()?)))
        .collect();
    clamped.sort_unstable();

    let mut repaired = Vec::with_capacity(clamped.len() + 1);
    let mut cursor = 0;
    for (start, end) in clamped {
        if end < cursor {
            continue;
        }
        if start > cursor {
            repaired.push(Segment::new(cursor, start - 1));
        }
        let start = start.max(cursor);
        repaired.push(Segment::new(start, end));
        cursor = end + 1;
    }
    if cursor < len {
        repaired.push(Segment::new(cursor, len - 1));
    }
    repaired
}

/// Fold undersized segments together within `budget`.
pub fn merge_segments(raw: &[Segment], rows: &[Row], budget: &MergeBudget) -> Vec<Segment> {
    let Some((&first, rest)) = raw.split_first() else {
        return Vec::new();
    };

    let chars = |seg: &Segment| -> usize {
        rows.get(seg.range())
            .map_or(0, |slice| slice.iter().map(Row::source_chars).sum())
    };

    let mut merged = Vec::new();
    let mut current = first;
    let mut current_chars = chars(&current);

    for next in rest {
        let next_chars = chars(next);
        let total_lines = current.len() + next.len();

        let fits = total_lines <= budget.max_lines;
        let wants = current_chars < budget.target_chars || next_chars < budget.straggler_chars;

        if fits && wants {
            current.end = next.end;
            current_chars += next_chars;
        } else {
            merged.push(current);
            current = *next;
            current_chars = next_chars;
        }
    }
    merged.push(current);
    merged
}

/// Whether `segments` are contiguous, non-overlapping and cover `[0, total)`.
pub fn tiles(segments: &[Segment], total: usize) -> bool {
    if total == 0 {
        return segments.is_empty();
    }
    let mut cursor = 0;
    for seg in segments {
        if seg.start != cursor || seg.end < seg.start {
            return false;
        }
        cursor = seg.end + 1;
    }
    cursor == total
}

/// Summary numbers for a segment list.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct SegmentStats {
    /// Number of segments.
    pub count: usize,
    /// Mean rows per segment.
    pub avg_lines: f64,
    /// Largest segment, in rows.
    pub max_lines: usize,
    /// Smallest segment, in rows.
    pub min_lines: usize,
    /// Mean source characters per segment.
    pub avg_chars: f64,
    /// Largest segment, in source characters.
    pub max_chars: usize,
}

impl SegmentStats {
    /// Compute statistics; `None` for an empty list.
    #[allow(clippy::cast_precision_loss)]
    pub fn compute(segments: &[Segment], rows: &[Row]) -> Option<Self> {
        if segments.is_empty() {
            return None;
        }
        let lines: Vec<usize> = segments.iter().map(Segment::len).collect();
        let chars: Vec<usize> = segments
            .iter()
            .map(|s| {
                rows.get(s.range())
                    .map_or(0, |slice| slice.iter().map(Row::source_chars).sum())
            })
            .collect();
        let count = segments.len();
        Some(Self {
            count,
            avg_lines: lines.iter().sum::<usize>() as f64 / count as f64,
            max_lines: lines.iter().copied().max().unwrap_or(0),
            min_lines: lines.iter().copied().min().unwrap_or(0),
            avg_chars: chars.iter().sum::<usize>() as f64 / count as f64,
            max_chars: chars.iter().copied().max().unwrap_or(0),
        })
    }
}

/// Model-assisted segmenter.
#[derive(Debug, Clone)]
pub struct Segmenter {
    chunk_rows: usize,
    budget: MergeBudget,
    model: String,
}

impl Segmenter {
    /// Segmenter with explicit settings.
    pub fn new(chunk_rows: usize, budget: MergeBudget, model: impl Into<String>) -> Self {
        Self {
            chunk_rows: chunk_rows.max(1),
            budget,
            model: model.into(),
        }
    }

    /// Segmenter configured from `[segmentation]`.
    pub fn from_config(config: &Config) -> Self {
        let seg = &config.segmentation;
        Self::new(
            seg.analysis_chunk_rows,
            MergeBudget {
                target_chars: seg.target_chars,
                max_lines: seg.max_lines,
                straggler_chars: seg.straggler_chars,
            },
            config.segmentation_model(),
        )
    }

    /// Merge limits in use.
    pub const fn budget(&self) -> &MergeBudget {
        &self.budget
    }

    /// Produce the final segment list for `rows`. Empty input yields no segments.
    pub async fn segment(&self, client: &GenerationClient, rows: &[Row]) -> Vec<Segment> {
        if rows.is_empty() {
            return Vec::new();
        }

        let chunks = Segment::chunks(rows.len(), self.chunk_rows);
        info!(
            "Analyzing {} rows for semantic segmentation ({} chunks)...",
            rows.len(),
            chunks.len()
        );

        let mut raw = Vec::new();
        for (n, chunk) in chunks.iter().enumerate() {
            let slice = &rows[chunk.range()];
            let spans = match self.propose(client, slice).await {
                Ok(spans) => repair_spans(&spans, slice.len()),
                Err(e) => {
                    warn!(
                        "Segmentation failed for chunk {}/{} (rows {}-{}): {e}. Using one segment.",
                        n + 1,
                        chunks.len(),
                        chunk.start,
                        chunk.end
                    );
                    vec![Segment::new(0, slice.len() - 1)]
                },
            };
            raw.extend(spans.into_iter().map(|s| s.offset(chunk.start)));
        }

        let merged = merge_segments(&raw, rows, &self.budget);
        info!(
            "Segmentation complete: {} raw spans merged into {} segments.",
            raw.len(),
            merged.len()
        );
        merged
    }

    async fn propose(&self, client: &GenerationClient, chunk: &[Row]) -> Result<Vec<RawSpan>> {
        let prompt = segmentation_prompt(chunk);
        let options = GenerateOptions::json()
            .with_model(self.model.clone())
            .with_temperature(0.1);
        let text = client.generate(&prompt, &options).await?;
        let value = parse_json(&text)?;
        let spans: Vec<RawSpan> = serde_json::from_value(value)
            .map_err(|e| Error::Parse(format!("segmentation spans: {e}")))?;
        debug!("Model proposed {} spans for {} rows", spans.len(), chunk.len());
        Ok(spans)
    }
}

fn segmentation_prompt(chunk: &[Row]) -> String {
    let digest = chunk
        .iter()
        .enumerate()
        .map(|(i, row)| format!("{i}: {}", preview(&row.source, 100)))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Split the numbered lines below into semantically coherent units \
         (a sentence, clause group or list item that reads as one piece).\n\
         Lines are numbered from 0. Every line must belong to exactly one unit.\n\n\
         Return ONLY a JSON array of objects with inclusive bounds: \
         [{{\"start\": 0, \"end\": 3}}, {{\"start\": 4, \"end\": 4}}]\n\n\
         LINES:\n{digest}"
    )
}

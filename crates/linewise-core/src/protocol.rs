//! Sentinel vocabulary and the reconciliation of structured model output
//! with the batch it was produced for.
//!
//! Sentinels are written into a row's target text and are read back by
//! downstream review tooling, so their spelling is fixed:
//!
//! | Sentinel                   | Meaning                                    |
//! |----------------------------|--------------------------------------------|
//! | `[[MERGED_UP]]`            | content folded into the previous row       |
//! | `[[MERGED_DOWN]]`          | content folded into the next row           |
//! | `[[LOCKED]]`               | locked row, left untouched                 |
//! | `[[MISSING_TRANSLATION]]`  | the model did not address this row         |

use crate::glossary::Glossary;
use crate::types::Row;
use crate::{Error, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Row content was merged into the previous row.
pub const MERGED_UP: &str = "[[MERGED_UP]]";
/// Row content was merged into the next row.
pub const MERGED_DOWN: &str = "[[MERGED_DOWN]]";
/// Row is locked and was not rewritten.
pub const LOCKED: &str = "[[LOCKED]]";
/// The model returned nothing for this row.
pub const MISSING_TRANSLATION: &str = "[[MISSING_TRANSLATION]]";

/// Every whole-value sentinel.
pub const SENTINELS: [&str; 4] = [MERGED_UP, MERGED_DOWN, LOCKED, MISSING_TRANSLATION];

/// Whether `text` is exactly one of the whole-value sentinels (ignoring surrounding whitespace).
pub fn is_sentinel(text: &str) -> bool {
    SENTINELS.contains(&text.trim())
}

/// Suffix flagging a QA concern on a row.
pub fn qa_flag(issue: &str) -> String {
    format!(" [[QA FLAG: {issue}]]")
}

/// Strip a surrounding Markdown code fence (```` ```json ... ``` ````), if any.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the language tag line.
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Parse model output as JSON, tolerating code fences.
pub fn parse_json(text: &str) -> Result<Value> {
    serde_json::from_str(strip_code_fences(text))
        .map_err(|e| Error::Parse(format!("model output is not valid JSON: {e}")))
}

/// Parse a `{ "<index>": "<text>" }` object keyed by batch-relative index.
///
/// Keys may be strings or numbers-as-strings; entries with keys outside
/// `0..len` or non-string values are ignored.
pub fn parse_index_map(text: &str, len: usize) -> Result<BTreeMap<usize, String>> {
    let value = parse_json(text)?;
    let Value::Object(object) = value else {
        return Err(Error::Parse("expected a JSON object keyed by row index".to_string()));
    };

    let mut map = BTreeMap::new();
    for (key, value) in object {
        let Ok(index) = key.trim().parse::<usize>() else {
            debug!("Ignoring non-numeric key '{key}' in model output");
            continue;
        };
        if index >= len {
            debug!("Ignoring out-of-range index {index} (batch has {len} rows)");
            continue;
        }
        match value {
            Value::String(s) => {
                map.insert(index, s);
            },
            Value::Number(n) => {
                map.insert(index, n.to_string());
            },
            other => debug!("Ignoring non-text value for index {index}: {other}"),
        }
    }
    Ok(map)
}

/// Per-row outcome of a segment response.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Resolution {
    Text(String),
    MergedUp,
    MergedDown,
    Missing,
    Locked,
}

/// Reconcile a segment response with its batch.
///
/// `response` is `None` when the model output could not be parsed at all;
/// every unlocked row is then marked missing. The result always has one
/// row per input row, in order.
pub fn reconcile_batch(
    batch: &[Row],
    response: Option<&BTreeMap<usize, String>>,
    glossary: &Glossary,
) -> Vec<Row> {
    let resolutions: Vec<Resolution> = batch
        .iter()
        .enumerate()
        .map(|(i, row)| resolve(i, row, response))
        .collect();

    if resolutions.first() == Some(&Resolution::MergedUp) {
        warn!(
            "Row {} merged up across a batch boundary; keeping the sentinel",
            batch[0].id
        );
    }
    if resolutions.last() == Some(&Resolution::MergedDown) {
        warn!(
            "Row {} merged down across a batch boundary; keeping the sentinel",
            batch[batch.len() - 1].id
        );
    }

    let missing = resolutions
        .iter()
        .filter(|r| **r == Resolution::Missing)
        .count();
    if missing > 0 {
        warn!("{missing} of {} rows missing from model output", batch.len());
    }

    batch
        .iter()
        .enumerate()
        .map(|(i, row)| match &resolutions[i] {
            Resolution::Text(text) => {
                let source = absorbed_source(batch, &resolutions, i);
                row.with_target(glossary.enforce(&source, text))
            },
            Resolution::MergedUp => row.with_target(MERGED_UP),
            Resolution::MergedDown => row.with_target(MERGED_DOWN),
            Resolution::Missing => row.with_target(MISSING_TRANSLATION),
            Resolution::Locked => row.clone(),
        })
        .collect()
}

fn resolve(index: usize, row: &Row, response: Option<&BTreeMap<usize, String>>) -> Resolution {
    if row.locked {
        return Resolution::Locked;
    }
    let Some(text) = response.and_then(|map| map.get(&index)) else {
        return Resolution::Missing;
    };
    match text.trim() {
        MERGED_UP => Resolution::MergedUp,
        MERGED_DOWN => Resolution::MergedDown,
        LOCKED | MISSING_TRANSLATION | "" => Resolution::Missing,
        trimmed => Resolution::Text(trimmed.to_string()),
    }
}

/// Source of row `index` plus every neighbour merged into it.
fn absorbed_source(batch: &[Row], resolutions: &[Resolution], index: usize) -> String {
    let mut start = index;
    while start > 0 && resolutions[start - 1] == Resolution::MergedDown {
        start -= 1;
    }
    let mut end = index;
    while end + 1 < resolutions.len() && resolutions[end + 1] == Resolution::MergedUp {
        end += 1;
    }
    batch[start..=end]
        .iter()
        .map(|r| r.source.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

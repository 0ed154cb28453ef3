//! Tab-separated row source and sink.
//!
//! The first line is the header. Column roles are resolved by
//! [`ColumnMapping::normalize`] from a fixed alias list; unknown columns are
//! carried through untouched in [`Row::extra`]. Values are not quoted, so a
//! tab or newline inside a value is replaced by a space on write.
//!
//! ```rust
//! use linewise_core::table::Table;
//!
//! let table = Table::parse("No.\tEnglish\tChinese\n1\tHello\t你好\n", false)?;
//! assert_eq!(table.rows[0].id, "1");
//! assert_eq!(table.rows[0].source, "Hello");
//! assert_eq!(table.to_tsv_string(), "ID\tSource\tTarget\n1\tHello\t你好\n");
//! # Ok::<(), linewise_core::Error>(())
//! ```

use crate::types::Row;
use crate::{Error, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

const ID_ALIASES: &[&str] = &["id", "#", "no.", "index", "key"];
const SOURCE_ALIASES: &[&str] = &["english", "source", "en", "src", "original"];
const TARGET_ALIASES: &[&str] = &["chinese", "target", "zh", "tgt", "translation", "cn"];
const LOCKED_ALIASES: &[&str] = &["locked"];

/// Column positions of the row fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnMapping {
    /// Identifier column.
    pub id: usize,
    /// Source text column.
    pub source: usize,
    /// Target text column, if any.
    pub target: Option<usize>,
    /// Lock flag column, if any.
    pub locked: Option<usize>,
    /// Whether id/source were assigned by position.
    pub positional: bool,
}

impl ColumnMapping {
    /// Resolve columns by name.
    ///
    /// Fails with [`Error::Table`] when no id or source column is recognised.
    pub fn normalize(headers: &[String]) -> Result<Self> {
        Self::normalize_with(headers, false)
    }

    /// Resolve columns by name, optionally falling back to position
    /// (`id, source[, target]`).
    pub fn normalize_with(headers: &[String], positional_fallback: bool) -> Result<Self> {
        let lower: Vec<String> = headers
            .iter()
            .map(|h| h.trim().trim_start_matches('\u{feff}').to_lowercase())
            .collect();
        let mut taken = Vec::new();

        let id = find_column(&lower, ID_ALIASES, &taken);
        taken.extend(id);
        let source = find_column(&lower, SOURCE_ALIASES, &taken);
        taken.extend(source);

        let (id, source, positional) = match (id, source) {
            (Some(id), Some(source)) => (id, source, false),
            _ if positional_fallback && headers.len() >= 2 => {
                warn!(
                    "Standard headers not found in {headers:?}; using positional mapping (1=ID, 2=Source, 3=Target)"
                );
                taken = vec![0, 1];
                (0, 1, true)
            },
            _ => {
                return Err(Error::Table(format!(
                    "could not identify required columns (ID, Source) in headers: {headers:?}"
                )));
            },
        };

        let target = if positional {
            (headers.len() >= 3).then_some(2)
        } else {
            find_column(&lower, TARGET_ALIASES, &taken)
        };
        taken.extend(target);
        let locked = find_column(&lower, LOCKED_ALIASES, &taken);

        Ok(Self {
            id,
            source,
            target,
            locked,
            positional,
        })
    }

    fn is_mapped(&self, index: usize) -> bool {
        index == self.id || index == self.source || Some(index) == self.target
    }
}

/// Aliases this short only match a whole header token.
const SHORT_ALIAS_CHARS: usize = 3;

/// First column equal to an alias, else the column with the longest
/// contained alias (earliest column on ties).
fn find_column(lower: &[String], aliases: &[&str], taken: &[usize]) -> Option<usize> {
    let free = |i: &usize| !taken.contains(i);
    (0..lower.len())
        .filter(free)
        .find(|&i| aliases.contains(&lower[i].as_str()))
        .or_else(|| {
            (0..lower.len())
                .filter(free)
                .filter_map(|i| longest_alias_in(&lower[i], aliases).map(|len| (i, len)))
                .min_by_key(|&(i, len)| (std::cmp::Reverse(len), i))
                .map(|(i, _)| i)
        })
}

/// Length of the longest alias found in `header`.
///
/// Short aliases (`en`, `id`, `zh`) must equal a token of the header split
/// on whitespace, `_` and `-`, so `Comments` or `Video` do not match them.
fn longest_alias_in(header: &str, aliases: &[&str]) -> Option<usize> {
    if header.is_empty() {
        return None;
    }
    let tokens: Vec<&str> = header
        .split(|c: char| c.is_whitespace() || c == '_' || c == '-')
        .filter(|t| !t.is_empty())
        .collect();
    aliases
        .iter()
        .filter(|alias| {
            if alias.chars().count() <= SHORT_ALIAS_CHARS {
                tokens.contains(alias)
            } else {
                header.contains(*alias)
            }
        })
        .map(|alias| alias.chars().count())
        .max()
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "y"
    )
}

fn clean(value: &str) -> String {
    value.replace(['\t', '\n', '\r'], " ")
}

/// A parsed table: its original header, the resolved mapping, and its rows.
#[derive(Debug, Clone)]
pub struct Table {
    /// Header cells as read.
    pub headers: Vec<String>,
    /// Resolved column roles.
    pub mapping: ColumnMapping,
    /// Data rows.
    pub rows: Vec<Row>,
}

impl Table {
    /// Read a table from disk.
    pub fn read(path: &Path, positional_fallback: bool) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let table = Self::parse(&content, positional_fallback)
            .map_err(|e| Error::Table(format!("{}: {e}", path.display())))?;
        info!("Loaded {} rows from {}", table.rows.len(), path.display());
        Ok(table)
    }

    /// Parse tab-separated text.
    pub fn parse(content: &str, positional_fallback: bool) -> Result<Self> {
        let mut lines = content.lines().map(|l| l.trim_end_matches('\r'));
        let Some(header_line) = lines.next() else {
            return Err(Error::Table("input is empty".to_string()));
        };
        let headers: Vec<String> = header_line
            .split('\t')
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
            .collect();
        let mapping = ColumnMapping::normalize_with(&headers, positional_fallback)?;
        debug!("Column mapping: {mapping:?}");

        let mut rows = Vec::new();
        let mut dropped = 0;
        for line in lines {
            let cells: Vec<&str> = line.split('\t').collect();
            let cell = |i: usize| cells.get(i).copied().unwrap_or("");

            let mut row = Row::new(
                cell(mapping.id).trim(),
                cell(mapping.source),
                mapping.target.map_or("", cell),
            );
            row.locked = mapping.locked.is_some_and(|i| is_truthy(cell(i)));
            for (i, header) in headers.iter().enumerate() {
                if !mapping.is_mapped(i) {
                    row.extra.insert(header.clone(), cell(i).to_string());
                }
            }

            if row.source.trim().is_empty() && row.target.trim().is_empty() && !row.locked {
                dropped += 1;
                continue;
            }
            rows.push(row);
        }
        if dropped > 0 {
            debug!("Dropped {dropped} empty rows");
        }

        Ok(Self {
            headers,
            mapping,
            rows,
        })
    }

    /// Same header and mapping with different rows.
    #[must_use]
    pub fn with_rows(&self, rows: Vec<Row>) -> Self {
        Self {
            headers: self.headers.clone(),
            mapping: self.mapping,
            rows,
        }
    }

    /// Output columns: `ID`, `Source`, `Target`, then every other column.
    pub fn output_headers(&self) -> Vec<String> {
        let mut out: Vec<String> = ["ID", "Source", "Target"].map(String::from).to_vec();
        for (i, header) in self.headers.iter().enumerate() {
            if !self.mapping.is_mapped(i) {
                out.push(header.clone());
            }
        }
        let known: BTreeSet<&str> = self.headers.iter().map(String::as_str).collect();
        let added: BTreeSet<&String> = self
            .rows
            .iter()
            .flat_map(|r| r.extra.keys())
            .filter(|k| !known.contains(k.as_str()))
            .collect();
        out.extend(added.into_iter().cloned());
        out
    }

    /// Serialize to tab-separated text.
    pub fn to_tsv_string(&self) -> String {
        let headers = self.output_headers();
        let mut out = headers.join("\t");
        out.push('\n');
        for row in &self.rows {
            let cells: Vec<String> = headers
                .iter()
                .enumerate()
                .map(|(i, h)| match i {
                    0 => clean(&row.id),
                    1 => clean(&row.source),
                    2 => clean(&row.target),
                    _ => row.extra.get(h).map_or_else(String::new, |v| clean(v)),
                })
                .collect();
            out.push_str(&cells.join("\t"));
            out.push('\n');
        }
        out
    }

    /// Write to disk.
    pub fn write(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_tsv_string())?;
        info!("Wrote {} rows to {}", self.rows.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn headers(cells: &[&str]) -> Vec<String> {
        cells.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_exact_match_beats_substring() {
        let mapping =
            ColumnMapping::normalize(&headers(&["Comments", "ID", "EN", "ZH", "LOCKED"])).unwrap();
        assert_eq!(mapping.id, 1);
        assert_eq!(mapping.source, 2);
        assert_eq!(mapping.target, Some(3));
        assert_eq!(mapping.locked, Some(4));
        assert!(!mapping.positional);
    }

    #[test]
    fn test_substring_match() {
        let mapping =
            ColumnMapping::normalize(&headers(&["Row Key", "Source Text", "Target Text"])).unwrap();
        assert_eq!((mapping.id, mapping.source, mapping.target), (0, 1, Some(2)));
    }

    #[test]
    fn test_short_aliases_need_a_whole_token() {
        let table =
            Table::parse("ID\tComments\tSource Text\tTarget Text\n1\tnote\tHello\t\n", false)
                .unwrap();
        assert_eq!(table.rows[0].source, "Hello");
        assert_eq!(table.mapping.source, 2);
        assert_eq!(table.mapping.target, Some(3));
        assert_eq!(table.rows[0].extra.get("Comments").map(String::as_str), Some("note"));

        let mapping = ColumnMapping::normalize(&headers(&[
            "Video",
            "Segment ID",
            "Content",
            "EN_text",
            "zh-Hans",
        ]))
        .unwrap();
        assert_eq!((mapping.id, mapping.source, mapping.target), (1, 3, Some(4)));
    }

    #[test]
    fn test_longer_alias_wins_over_earlier_column() {
        let mapping =
            ColumnMapping::normalize(&headers(&["Key", "Notes EN", "Original Source", "CN"])).unwrap();
        assert_eq!(mapping.source, 2);
        assert_eq!(mapping.target, Some(3));
    }

    #[test]
    fn test_missing_columns_fail_without_fallback() {
        let err = ColumnMapping::normalize(&headers(&["a", "b", "c"])).unwrap_err();
        assert_eq!(err.category(), "table");

        let mapping = ColumnMapping::normalize_with(&headers(&["a", "b", "c"]), true).unwrap();
        assert!(mapping.positional);
        assert_eq!(mapping.target, Some(2));

        let mapping = ColumnMapping::normalize_with(&headers(&["a", "b"]), true).unwrap();
        assert_eq!(mapping.target, None);
        assert!(ColumnMapping::normalize_with(&headers(&["a"]), true).is_err());
    }

    #[test]
    fn test_parse_drops_empty_rows_but_keeps_locked() {
        let table = Table::parse(
            "ID\tSource\tTarget\tLOCKED\n1\tHello\t\t0\n2\t\t\t0\n3\t\t\tyes\n4\t\t草稿\t\n",
            false,
        )
        .unwrap();
        let ids: Vec<&str> = table.rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3", "4"]);
        assert!(table.rows[1].locked);
        assert!(!table.rows[0].locked);
    }

    #[test]
    fn test_short_lines_and_crlf() {
        let table = Table::parse("\u{feff}ID\tEnglish\tChinese\r\n1\tHi\r\n", false).unwrap();
        assert_eq!(table.rows[0].source, "Hi");
        assert_eq!(table.rows[0].target, "");
    }

    #[test]
    fn test_write_orders_columns_and_sanitizes() {
        let table = Table::parse("Notes\tEN\tNo.\tZH\n\tA\t1\tB\n", false).unwrap();
        let mut rows = table.rows.clone();
        rows[0].target = "line\none\twith tab".to_string();
        rows[0].extra.insert("Comments".to_string(), "checked".to_string());

        let written = table.with_rows(rows).to_tsv_string();
        assert_eq!(
            written,
            "ID\tSource\tTarget\tNotes\tComments\n1\tA\tline one with tab\t\tchecked\n"
        );
    }

    #[test]
    fn test_read_write_file() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.tsv");
        let output = dir.path().join("out.tsv");
        fs::write(&input, "ID\tSource\tTarget\n1\ta\tb\n").unwrap();

        let table = Table::read(&input, false).unwrap();
        table.write(&output).unwrap();
        assert_eq!(fs::read_to_string(&output).unwrap(), "ID\tSource\tTarget\n1\ta\tb\n");
        assert!(Table::read(&dir.path().join("missing.tsv"), false).is_err());
    }
}

//! Sliding context window around a row under review.

use crate::types::Row;
use serde::Serialize;

/// Preview length for rows around the current one.
pub const PREVIEW_CHARS: usize = 100;

/// Diagnostics for one window position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WindowStats {
    /// Row being reviewed.
    pub current: usize,
    /// First row shown.
    pub window_start: usize,
    /// Last row shown (inclusive).
    pub window_end: usize,
    /// Rows shown before `current`.
    pub preceding_count: usize,
    /// Rows shown after `current`.
    pub following_count: usize,
}

/// Renders bounded neighbourhoods of a row sequence for prompting.
#[derive(Debug, Clone, Copy)]
pub struct ContextWindowBuilder<'a> {
    rows: &'a [Row],
    before: usize,
    after: usize,
}

impl<'a> ContextWindowBuilder<'a> {
    /// Window over `rows` showing `before` preceding and `after` following rows.
    pub const fn new(rows: &'a [Row], before: usize, after: usize) -> Self {
        Self {
            rows,
            before,
            after,
        }
    }

    /// Window with the default 3 preceding and 2 following rows.
    pub const fn with_defaults(rows: &'a [Row]) -> Self {
        Self::new(rows, 3, 2)
    }

    /// Rows shown before the current one.
    pub const fn before(&self) -> usize {
        self.before
    }

    /// Rows shown after the current one.
    pub const fn after(&self) -> usize {
        self.after
    }

    /// Render the window around `index`. Out-of-range indices yield `""`.
    pub fn build(&self, index: usize) -> String {
        let Some(stats) = self.stats(index) else {
            return String::new();
        };

        let mut lines = Vec::with_capacity(stats.preceding_count * 2 + stats.following_count + 3);

        for row in &self.rows[stats.window_start..index] {
            lines.push(format!(
                "[Segment {}]: {}...",
                row.id,
                preview(&row.source, PREVIEW_CHARS)
            ));
            lines.push(format!("    -> {}...", preview(&row.target, PREVIEW_CHARS)));
        }

        let current = &self.rows[index];
        lines.push(format!(">>> [Segment {} - TARGET]:", current.id));
        lines.push(format!("    Source: {}", current.source));
        lines.push(format!("    Target (Draft): {}", current.target));

        for row in &self.rows[index + 1..=stats.window_end] {
            lines.push(format!(
                "[Segment {}]: {}...",
                row.id,
                preview(&row.source, PREVIEW_CHARS)
            ));
        }

        lines.join("\n")
    }

    /// Window bounds for `index`, or `None` when out of range.
    pub fn stats(&self, index: usize) -> Option<WindowStats> {
        if index >= self.rows.len() {
            return None;
        }
        let window_start = index.saturating_sub(self.before);
        let window_end = (index + self.after).min(self.rows.len() - 1);
        Some(WindowStats {
            current: index,
            window_start,
            window_end,
            preceding_count: index - window_start,
            following_count: window_end - index,
        })
    }
}

/// First `max` characters of `text`, never splitting a character.
pub fn preview(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((byte, _)) => &text[..byte],
        None => text,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn rows(n: usize) -> Vec<Row> {
        (0..n)
            .map(|i| Row::new(format!("r{i}"), format!("source {i}"), format!("target {i}")))
            .collect()
    }

    #[test]
    fn test_window_in_the_middle() {
        let rows = rows(10);
        let window = ContextWindowBuilder::with_defaults(&rows);
        let text = window.build(5);

        let expected = [
            "[Segment r2]: source 2...",
            "    -> target 2...",
            "[Segment r3]: source 3...",
            "    -> target 3...",
            "[Segment r4]: source 4...",
            "    -> target 4...",
            ">>> [Segment r5 - TARGET]:",
            "    Source: source 5",
            "    Target (Draft): target 5",
            "[Segment r6]: source 6...",
            "[Segment r7]: source 7...",
        ]
        .join("\n");
        assert_eq!(text, expected);
    }

    #[test]
    fn test_window_clips_at_edges() {
        let rows = rows(3);
        let window = ContextWindowBuilder::with_defaults(&rows);

        let first = window.stats(0).unwrap();
        assert_eq!(first.window_start, 0);
        assert_eq!(first.preceding_count, 0);
        assert_eq!(first.following_count, 2);

        let last = window.stats(2).unwrap();
        assert_eq!(last.window_end, 2);
        assert_eq!(last.preceding_count, 2);
        assert_eq!(last.following_count, 0);
        assert!(window.build(2).ends_with("    Target (Draft): target 2"));
    }

    #[test]
    fn test_out_of_range_is_empty() {
        let rows = rows(2);
        let window = ContextWindowBuilder::with_defaults(&rows);
        assert_eq!(window.build(2), "");
        assert!(window.stats(7).is_none());
        assert_eq!(ContextWindowBuilder::with_defaults(&[]).build(0), "");
    }

    #[test]
    fn test_previews_truncate_but_current_is_full() {
        let long = "字".repeat(150);
        let rows = vec![
            Row::new("a", long.clone(), long.clone()),
            Row::new("b", long.clone(), long.clone()),
        ];
        let text = ContextWindowBuilder::with_defaults(&rows).build(1);
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], format!("[Segment a]: {}...", "字".repeat(100)));
        assert_eq!(lines[3], format!("    Source: {long}"));
    }

    #[test]
    fn test_preview_is_char_safe() {
        assert_eq!(preview("héllo", 2), "hé");
        assert_eq!(preview("abc", 10), "abc");
        assert_eq!(preview("", 3), "");
    }
}

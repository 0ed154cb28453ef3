//! Segment command implementation

use anyhow::{Context, Result};
use colored::Colorize;
use linewise_core::segment::{SegmentStats, Segmenter};
use linewise_core::table::Table;
use linewise_core::Config;
use serde_json::json;
use std::path::Path;

/// Run the segmenter over a table and report the resulting segments.
pub async fn execute(input: &Path, json: bool, config_path: Option<&Path>) -> Result<()> {
    let config = Config::load(config_path)?;
    let client = super::build_client(&config)?;
    let table = Table::read(input, config.table.positional_fallback)
        .with_context(|| format!("Failed to read {}", input.display()))?;

    let segmenter = Segmenter::from_config(&config);
    let segments = segmenter.segment(&client, &table.rows).await;
    let stats = SegmentStats::compute(&segments, &table.rows);

    if json {
        let payload = json!({
            "rows": table.rows.len(),
            "segments": segments,
            "stats": stats,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    let Some(stats) = stats else {
        println!("No rows to segment in {}", input.display());
        return Ok(());
    };

    println!(
        "{} rows in {} segments",
        table.rows.len().to_string().bold(),
        stats.count.to_string().bold()
    );
    println!(
        "  lines per segment: avg {:.1}, max {}, min {}",
        stats.avg_lines, stats.max_lines, stats.min_lines
    );
    println!(
        "  chars per segment: avg {:.0}, max {}",
        stats.avg_chars, stats.max_chars
    );
    for (n, segment) in segments.iter().enumerate() {
        println!(
            "  {:>4}. rows {}-{} ({} lines)",
            n + 1,
            segment.start + 1,
            segment.end + 1,
            segment.len()
        );
    }
    Ok(())
}

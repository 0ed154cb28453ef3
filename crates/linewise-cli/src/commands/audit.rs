//! Audit command implementation

use anyhow::{Context, Result};
use colored::Colorize;
use linewise_core::audit::{AuditIssue, audit_rows};
use linewise_core::table::Table;
use linewise_core::{Config, Glossary};
use std::collections::BTreeMap;
use std::path::Path;

/// Check a processed table and list what looks wrong.
pub fn execute(
    input: &Path,
    glossary: Option<&Path>,
    json: bool,
    limit: usize,
    config_path: Option<&Path>,
) -> Result<()> {
    let config = Config::load(config_path)?;
    let table = Table::read(input, config.table.positional_fallback)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let glossary = match glossary {
        Some(path) => Glossary::load(path)
            .with_context(|| format!("Failed to load glossary {}", path.display()))?,
        None => Glossary::new(),
    };

    let issues = audit_rows(&table.rows, &glossary);

    if json {
        println!("{}", serde_json::to_string_pretty(&issues)?);
        return Ok(());
    }

    if issues.is_empty() {
        println!(
            "{} No issues found in {} rows",
            "✓".green(),
            table.rows.len()
        );
        return Ok(());
    }

    println!(
        "Found {} issues in {} rows",
        issues.len().to_string().bold(),
        table.rows.len()
    );
    for (kind, count) in counts_by_kind(&issues) {
        println!("  {kind}: {count}");
    }
    println!();
    for issue in issues.iter().take(limit) {
        println!(
            "[{}] row {} (id {}): {}",
            issue.kind.to_string().yellow(),
            issue.row + 1,
            issue.id,
            issue.message
        );
    }
    if issues.len() > limit {
        println!("... {} more (use --limit or --json)", issues.len() - limit);
    }
    Ok(())
}

fn counts_by_kind(issues: &[AuditIssue]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for issue in issues {
        *counts.entry(issue.kind.to_string()).or_insert(0) += 1;
    }
    counts
}

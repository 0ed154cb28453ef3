//! Run command implementation

use anyhow::{Context, Result};
use colored::Colorize;
use inquire::Confirm;
use is_terminal::IsTerminal;
use linewise_core::processor::BatchPlan;
use linewise_core::protocol::{MISSING_TRANSLATION, is_sentinel};
use linewise_core::strategy::TRANSCRIPTION_FLAG;
use linewise_core::table::Table;
use linewise_core::{
    Config, Processor, Row, RunReport, Strategy, StrategyContext, StrategyKind, build_strategy,
};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::cli::RunArgs;
use crate::utils::progress::batch_bar;

/// Load, process and write one table.
pub async fn execute(args: &RunArgs, config_path: Option<&Path>, quiet: bool) -> Result<()> {
    let config = Config::load(config_path)?;
    let client = super::build_client(&config)?;

    let table = Table::read(&args.input, config.table.positional_fallback)
        .with_context(|| format!("Failed to read {}", args.input.display()))?;
    let context = StrategyContext::load(args.glossary.as_deref(), args.style.as_deref())
        .context("Failed to load glossary or style guide")?;
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&args.input));

    let kind = StrategyKind::from(args.mode);
    let processor = Processor::new(client, config.processing.clone());
    let mut strategy = build_strategy(kind, &config);
    processor
        .setup_strategy(strategy.as_mut(), &table.rows, &context)
        .await;

    let plan = processor.plan(table.rows.len(), strategy.as_ref());
    if !quiet {
        print_summary(args, &config, kind, &context, &table, &plan, &output);
    }
    if !confirm(args.yes)? {
        println!("Cancelled");
        return Ok(());
    }

    let bar = batch_bar(plan.batches.len(), quiet);
    let progress = bar.clone();
    let processor = processor.with_progress(move |done, total| {
        progress.set_length(total as u64);
        progress.set_position(done as u64);
    });

    let outcome = processor
        .run(table.rows.clone(), strategy.as_ref(), shutdown_signal())
        .await;
    bar.finish_and_clear();

    if outcome.report.interrupted {
        warn!(
            "Writing partial output: {} of {} rows processed",
            outcome.rows.len(),
            table.rows.len()
        );
    }
    table
        .with_rows(outcome.rows.clone())
        .write(&output)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    if !quiet {
        print_report(&outcome.report, &outcome.rows, &output, strategy.as_ref());
    }
    Ok(())
}

/// `<stem>_processed.<ext>` next to `input`.
fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map_or_else(|| "output".to_string(), |s| s.to_string_lossy().into_owned());
    let name = match input.extension() {
        Some(ext) => format!("{stem}_processed.{}", ext.to_string_lossy()),
        None => format!("{stem}_processed"),
    };
    input.with_file_name(name)
}

/// Resolves on Ctrl-C; never resolves if the handler cannot be installed.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Ctrl-C handler unavailable: {e}");
        std::future::pending::<()>().await;
    }
}

/// Treat `--yes`, explicit non-interactive env, or the absence of a TTY as approval.
fn confirm(auto_yes: bool) -> Result<bool> {
    let force_non_interactive = std::env::var_os("LINEWISE_FORCE_NON_INTERACTIVE").is_some();
    let no_tty = !std::io::stdin().is_terminal();
    if auto_yes || force_non_interactive || no_tty {
        return Ok(true);
    }
    Ok(Confirm::new("Start processing?")
        .with_default(true)
        .prompt()?)
}

fn print_summary(
    args: &RunArgs,
    config: &Config,
    kind: StrategyKind,
    context: &StrategyContext,
    table: &Table,
    plan: &BatchPlan,
    output: &Path,
) {
    let locked = table.rows.iter().filter(|r| r.locked).count();
    println!("{}", "Job summary".bold());
    println!("  Input:     {} ({} rows, {locked} locked)", args.input.display(), table.rows.len());
    println!("  Output:    {}", output.display());
    println!("  Mode:      {kind}");
    println!("  Model:     {}", config.llm.default_model);
    println!(
        "  Batches:   {}{}",
        plan.batches.len(),
        if plan.custom { " (semantic segments)" } else { "" }
    );
    match &context.glossary_path {
        Some(path) => println!("  Glossary:  {} ({} terms)", path.display(), context.glossary.len()),
        None => println!("  Glossary:  none"),
    }
    match &context.style_path {
        Some(path) => println!("  Style:     {}", path.display()),
        None => println!("  Style:     none"),
    }
}

fn print_report(report: &RunReport, rows: &[Row], output: &Path, strategy: &dyn Strategy) {
    let missing = rows
        .iter()
        .filter(|r| r.target == MISSING_TRANSLATION)
        .count();
    let sentinels = rows.iter().filter(|r| is_sentinel(&r.target)).count();
    let flagged = rows
        .iter()
        .filter(|r| r.target.contains("[[GLOSSARY_VIOLATION") || r.target.contains("[[QA FLAG"))
        .count();
    let transcription = rows
        .iter()
        .filter(|r| r.comment().is_some_and(|c| c.contains(TRANSCRIPTION_FLAG)))
        .count();

    let status = if report.interrupted {
        "Interrupted".yellow()
    } else if report.fallbacks.is_empty() {
        "Done".green()
    } else {
        "Done with fallbacks".yellow()
    };
    println!(
        "{status}: {} finished {}/{} batches in {:.1}s",
        strategy.name(),
        report.processed_batches,
        report.planned_batches,
        report.elapsed.as_secs_f64()
    );
    for fallback in &report.fallbacks {
        println!(
            "  {} batch {} (rows {}-{}) kept its original rows: {}",
            "!".red(),
            fallback.batch,
            fallback.segment.start + 1,
            fallback.segment.end + 1,
            fallback.reason
        );
    }
    if sentinels > 0 {
        println!("  {sentinels} sentinel rows ({missing} missing translations)");
    }
    if flagged > 0 {
        println!("  {flagged} rows flagged for review");
    }
    if transcription > 0 {
        println!("  {transcription} rows with suspected transcription errors (see Comments)");
    }
    println!("Saved to {}", output.display());
}

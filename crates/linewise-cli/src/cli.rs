//! # CLI Structure and Argument Parsing
//!
//! The CLI follows a command-subcommand pattern built with `clap` derive:
//!
//! - **Global options**: `--verbose`, `--quiet`, `--config`, `--no-color`
//! - **Subcommands**: `run`, `check`, `segment`, `audit`
//!
//! ```bash
//! # Rewrite a table segment by segment
//! linewise run contract.tsv --mode segment --glossary terms.tsv
//!
//! # Verify credentials and connectivity
//! linewise check
//!
//! # Inspect how a table would be segmented
//! linewise segment contract.tsv --json
//!
//! # Audit a processed table
//! linewise audit contract_processed.tsv --glossary terms.tsv --limit 20
//! ```

use clap::{Args, Parser, Subcommand, ValueEnum};
use linewise_core::StrategyKind;
use std::path::PathBuf;

/// Main CLI structure for the `linewise` command
#[derive(Parser, Clone, Debug)]
#[command(name = "linewise")]
#[command(version)]
#[command(
    about = "linewise - Row-aligned batch rewriting of tab-separated documents",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Show debug logging
    #[arg(short = 'v', long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Suppress informational messages (only show errors)
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    /// Path to a config file (defaults to the platform config directory)
    #[arg(long, global = true, value_name = "PATH", env = "LINEWISE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Rewrite every row of a table through the generation service
    Run(RunArgs),

    /// Test the connection to the generation service
    Check,

    /// Show how a table would be split into semantic segments
    Segment {
        /// Input table (tab-separated)
        input: PathBuf,

        /// Output segments and statistics as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run deterministic quality checks over a processed table
    Audit {
        /// Processed table (tab-separated)
        input: PathBuf,

        /// Glossary file (tab-separated: term, renderings)
        #[arg(long, value_name = "PATH")]
        glossary: Option<PathBuf>,

        /// Output issues as JSON
        #[arg(long)]
        json: bool,

        /// Maximum number of issues to list in text output
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
}

/// Arguments for `linewise run`
#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Input table (tab-separated)
    pub input: PathBuf,

    /// Rewrite strategy
    #[arg(short, long, value_enum, default_value_t = Mode::Segment)]
    pub mode: Mode,

    /// Output path (defaults to `<stem>_processed.<ext>` next to the input)
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Glossary file (tab-separated: term, renderings)
    #[arg(long, value_name = "PATH")]
    pub glossary: Option<PathBuf>,

    /// Style guide file (free text)
    #[arg(long, value_name = "PATH")]
    pub style: Option<PathBuf>,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

/// Rewrite strategy selector
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// One call per row with a sliding context window
    Review,
    /// One call per semantic segment with the merge protocol
    Segment,
    /// Translate, edit, then optionally quality-check
    DualPass,
    /// Proofread subtitles and flag transcription errors in Comments
    Subtitle,
}

impl From<Mode> for StrategyKind {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Review => Self::Review,
            Mode::Segment => Self::Segment,
            Mode::DualPass => Self::DualPass,
            Mode::Subtitle => Self::Subtitle,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_mode_names_match_strategy_kinds() {
        for mode in Mode::value_variants() {
            let name = mode.to_possible_value().unwrap().get_name().to_string();
            assert_eq!(StrategyKind::from(*mode).as_str(), name);
        }
    }

    #[test]
    fn test_run_defaults() {
        let cli = Cli::try_parse_from(["linewise", "run", "in.tsv"]).unwrap();
        let Commands::Run(args) = cli.command else {
            unreachable!("parsed a different command");
        };
        assert_eq!(args.mode, Mode::Segment);
        assert!(!args.yes);
        assert!(args.output.is_none());
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        assert!(Cli::try_parse_from(["linewise", "-v", "-q", "check"]).is_err());
    }
}

//! linewise CLI - row-aligned batch rewriting of tab-separated documents
//!
//! This is the main entry point for the linewise command-line interface.
//! Command implementations live in separate modules under `commands`.

use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;

mod cli;
mod commands;
mod error;
mod utils;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> ExitCode {
    // Credentials may come from a local .env file.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    if let Err(err) = utils::logging::initialize_logging(&cli) {
        eprintln!("Error: {err:?}");
        return ExitCode::from(error::FAILURE);
    }

    match execute_command(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(error::exit_code_from_error(&err))
        },
    }
}

async fn execute_command(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Run(args) => {
            commands::run(&args, config_path, cli.quiet).await?;
        },
        Commands::Check => {
            commands::check(config_path).await?;
        },
        Commands::Segment { input, json } => {
            commands::segment(&input, json, config_path).await?;
        },
        Commands::Audit {
            input,
            glossary,
            json,
            limit,
        } => {
            commands::audit(&input, glossary.as_deref(), json, limit, config_path)?;
        },
    }
    Ok(())
}

//! Check command implementation

use anyhow::{Result, bail};
use colored::Colorize;
use linewise_core::Config;
use std::path::Path;

/// Make one un-retried call to the generation service.
pub async fn execute(config_path: Option<&Path>) -> Result<()> {
    let config = Config::load(config_path)?;
    let client = super::build_client(&config)?;

    println!(
        "Testing connection to {} ({})...",
        config.llm.base_url, config.llm.default_model
    );
    if !client.test_connection().await {
        bail!("Connection test failed");
    }
    println!("{} Connection OK", "✓".green());
    Ok(())
}

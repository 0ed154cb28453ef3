//! Command implementations for the linewise CLI
//!
//! Each command lives in its own submodule.

mod audit;
mod check;
mod run;
mod segment;

pub use audit::execute as audit;
pub use check::execute as check;
pub use run::execute as run;
pub use segment::execute as segment;

use anyhow::Result;
use linewise_core::client::GeminiBackend;
use linewise_core::{Config, GenerationClient, RetryPolicy};

/// Build the generation client; fails when credentials are missing.
pub(crate) fn build_client(config: &Config) -> Result<GenerationClient> {
    let backend = GeminiBackend::from_config(&config.llm)?;
    Ok(GenerationClient::new(
        backend,
        RetryPolicy::new(config.llm.max_retries),
    ))
}

//! Retrying client around a remote text-generation endpoint.
//!
//! The remote call itself sits behind the [`Generator`] trait so tests and
//! alternative backends can be swapped in. [`GenerationClient`] adds the
//! bounded exponential-backoff retry every caller relies on.
//!
//! ```rust,no_run
//! use linewise_core::client::{GeminiBackend, GenerateOptions, GenerationClient, RetryPolicy};
//! use linewise_core::Config;
//!
//! # async fn example() -> linewise_core::Result<()> {
//! let config = Config::load(None)?;
//! let backend = GeminiBackend::from_config(&config.llm)?;
//! let client = GenerationClient::new(backend, RetryPolicy::new(config.llm.max_retries));
//!
//! let text = client
//!     .generate("Say 'OK'", &GenerateOptions::default().with_temperature(0.0))
//!     .await?;
//! println!("{text}");
//! # Ok(())
//! # }
//! ```

mod gemini;

pub use gemini::GeminiBackend;

use crate::{Error, Result};
use async_trait::async_trait;
use rand::Rng;
use serde_json::Value;
use std::time::Duration;
use tracing::{error, info, warn};

/// MIME type requesting structured JSON output.
pub const JSON_MIME_TYPE: &str = "application/json";

/// Per-call options passed through to the backend untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateOptions {
    /// Model identifier; `None` uses the backend default.
    pub model: Option<String>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Optional system instruction.
    pub system_instruction: Option<String>,
    /// Optional response MIME type (e.g. `application/json`).
    pub response_mime_type: Option<String>,
    /// Optional structured-output schema.
    pub response_schema: Option<Value>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            model: None,
            temperature: 0.5,
            system_instruction: None,
            response_mime_type: None,
            response_schema: None,
        }
    }
}

impl GenerateOptions {
    /// Options requesting JSON output.
    #[must_use]
    pub fn json() -> Self {
        Self::default().with_response_mime_type(JSON_MIME_TYPE)
    }

    /// Set the model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the temperature.
    #[must_use]
    pub const fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the system instruction.
    #[must_use]
    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    /// Set the response MIME type.
    #[must_use]
    pub fn with_response_mime_type(mut self, mime: impl Into<String>) -> Self {
        self.response_mime_type = Some(mime.into());
        self
    }

    /// Set the structured-output schema.
    #[must_use]
    pub fn with_response_schema(mut self, schema: Value) -> Self {
        self.response_schema = Some(schema);
        self
    }
}

/// A single, non-retried call to a text-generation service.
///
/// Implement this trait to provide different backends.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate text for `prompt`.
    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String>;
}

/// Bounded exponential backoff with jitter.
///
/// The delay after the `n`-th failed attempt is
/// `min(base_delay * 2^(n-1) + jitter_fraction * jitter, max_delay)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per call, including the first. Never below 1.
    pub max_retries: u32,
    /// Delay after the first failure, before jitter.
    pub base_delay: Duration,
    /// Upper bound of the random jitter added to each delay.
    pub jitter: Duration,
    /// Cap applied after jitter.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

impl RetryPolicy {
    /// Policy with the standard 2 s base, 1 s jitter and 60 s cap.
    pub const fn new(max_retries: u32) -> Self {
        Self {
            max_retries: if max_retries == 0 { 1 } else { max_retries },
            base_delay: Duration::from_secs(2),
            jitter: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }

    /// Policy that retries without sleeping (tests, dry runs).
    pub const fn immediate(max_retries: u32) -> Self {
        let mut policy = Self::new(max_retries);
        policy.base_delay = Duration::ZERO;
        policy.jitter = Duration::ZERO;
        policy
    }

    /// Delay to wait after `failed_attempt` (1-based) failures.
    ///
    /// `jitter_fraction` is clamped to `[0, 1)`.
    pub fn delay_after(&self, failed_attempt: u32, jitter_fraction: f64) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(16);
        let backoff = self.base_delay.saturating_mul(1u32 << exponent);
        let fraction = jitter_fraction.clamp(0.0, 1.0 - f64::EPSILON);
        let delay = backoff.saturating_add(self.jitter.mul_f64(fraction));
        delay.min(self.max_delay)
    }
}

/// Generation client with bounded retry.
///
/// Failures are retried up to `max_retries` attempts in total; a response
/// that is blank after trimming counts as a failure. After the last attempt
/// the final error is returned to the caller unchanged.
pub struct GenerationClient {
    backend: Box<dyn Generator>,
    policy: RetryPolicy,
}

impl std::fmt::Debug for GenerationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationClient")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl GenerationClient {
    /// Wrap a backend with the given retry policy.
    pub fn new(backend: impl Generator + 'static, policy: RetryPolicy) -> Self {
        Self {
            backend: Box::new(backend),
            policy,
        }
    }

    /// Active retry policy.
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Generate text, retrying recoverable failures with backoff.
    ///
    /// A non-recoverable error (bad request, rejected key) is returned at once.
    pub async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String> {
        let max = self.policy.max_retries.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let outcome = match self.backend.generate(prompt, options).await {
                Ok(text) if text.trim().is_empty() => {
                    warn!("Empty response received from generation service.");
                    Err(Error::EmptyResponse)
                },
                other => other,
            };

            match outcome {
                Ok(text) => return Ok(text),
                Err(e) => {
                    warn!(
                        category = e.category(),
                        "Generation failed (attempt {attempt}/{max}): {e}"
                    );
                    if !e.is_recoverable() {
                        error!("Generation failed with a non-recoverable error, not retrying.");
                        return Err(e);
                    }
                    if attempt >= max {
                        error!("Max retries reached, giving up.");
                        return Err(e);
                    }
                    let jitter: f64 = rand::rng().random();
                    let delay = self.policy.delay_after(attempt, jitter);
                    info!("Waiting {:.2}s before retry...", delay.as_secs_f64());
                    tokio::time::sleep(delay).await;
                },
            }
        }
    }

    /// One un-retried call; reports whether the service answered at all.
    pub async fn test_connection(&self) -> bool {
        match self
            .backend
            .generate("Say 'OK'", &GenerateOptions::default())
            .await
        {
            Ok(text) => !text.trim().is_empty(),
            Err(e) => {
                error!("Connection test failed: {e}");
                false
            },
        }
    }
}

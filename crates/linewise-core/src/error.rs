//! Error types and handling for linewise-core operations.
//!
//! A single error type covers every failure in a rewrite run. Errors are
//! categorized so the orchestrator and the CLI can decide what to do with
//! them without string matching:
//!
//! - **Transient remote failures** (network, HTTP 429/5xx, empty responses)
//!   are retried by [`GenerationClient`](crate::client::GenerationClient).
//! - **Batch-level failures** (anything a strategy returns) are absorbed by the
//!   [`Processor`](crate::processor::Processor), which falls back to the
//!   original batch.
//! - **Fatal failures** (missing credentials, invalid configuration) abort a
//!   run before any row is processed.
//!
//! ```rust
//! use linewise_core::Error;
//!
//! let err = Error::MissingCredentials("GEMINI_API_KEY".to_string());
//! assert!(err.is_fatal());
//! assert!(!err.is_recoverable());
//! assert_eq!(err.category(), "credentials");
//! ```

use thiserror::Error;

/// The main error type for linewise-core operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation failed (reading tables, glossaries, config files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport-level failure talking to the generation service.
    ///
    /// Everything except request construction errors is recoverable.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The generation service answered with a non-success status.
    #[error("Generation API returned {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Message extracted from the error envelope, or the raw body.
        message: String,
    },

    /// The generation service answered, but with no usable text.
    #[error("Empty response from generation service")]
    EmptyResponse,

    /// Model output could not be interpreted (bad JSON, wrong shape).
    #[error("Parse error: {0}")]
    Parse(String),

    /// The tabular input could not be mapped onto rows.
    #[error("Table error: {0}")]
    Table(String),

    /// Configuration is invalid or inaccessible.
    #[error("Configuration error: {0}")]
    Config(String),

    /// No API key was found for the generation service.
    #[error("API key not found in environment variable: {0}")]
    MissingCredentials(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A strategy returned a batch whose size differs from its input.
    #[error("Row count mismatch: expected {expected}, got {actual}")]
    RowCountMismatch {
        /// Rows submitted.
        expected: usize,
        /// Rows returned.
        actual: usize,
    },

    /// Generic error for uncategorized failures.
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl Error {
    /// Check if the error might go away if the same call is retried.
    ///
    /// [`GenerationClient::generate`](crate::client::GenerationClient::generate)
    /// stops retrying on the first error for which this is `false`.
    /// Uncategorized errors count as recoverable.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Network(e) => !e.is_builder(),
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::EmptyResponse | Self::Other(_) => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }

    /// Whether the error must abort a run before any row is processed.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::MissingCredentials(_) | Self::Config(_))
    }

    /// Stable lowercase label for logs.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::Network(_) => "network",
            Self::Api { .. } => "api",
            Self::EmptyResponse => "empty_response",
            Self::Parse(_) => "parse",
            Self::Table(_) => "table",
            Self::Config(_) => "config",
            Self::MissingCredentials(_) => "credentials",
            Self::Serialization(_) => "serialization",
            Self::RowCountMismatch { .. } => "row_count",
            Self::Other(_) => "other",
        }
    }
}

/// Convenience type alias for `std::result::Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io;

    #[test]
    fn test_error_display_formatting() {
        let cases = vec![
            (
                Error::Api {
                    status: 503,
                    message: "overloaded".to_string(),
                },
                "Generation API returned 503: overloaded",
            ),
            (
                Error::EmptyResponse,
                "Empty response from generation service",
            ),
            (
                Error::MissingCredentials("GEMINI_API_KEY".to_string()),
                "API key not found in environment variable: GEMINI_API_KEY",
            ),
            (
                Error::RowCountMismatch {
                    expected: 3,
                    actual: 2,
                },
                "Row count mismatch: expected 3, got 2",
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.to_string(), expected);
        }
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(Error::EmptyResponse.is_recoverable());
        assert!(
            Error::Api {
                status: 429,
                message: String::new()
            }
            .is_recoverable()
        );
        assert!(
            Error::Api {
                status: 500,
                message: String::new()
            }
            .is_recoverable()
        );
        assert!(
            !Error::Api {
                status: 400,
                message: String::new()
            }
            .is_recoverable()
        );
        assert!(Error::Io(io::Error::new(io::ErrorKind::TimedOut, "t")).is_recoverable());
        assert!(!Error::Io(io::Error::new(io::ErrorKind::NotFound, "n")).is_recoverable());
        assert!(!Error::Parse("bad".to_string()).is_recoverable());
        assert!(!Error::MissingCredentials("K".to_string()).is_recoverable());
        assert!(Error::Other("unclassified".to_string()).is_recoverable());
    }

    #[test]
    fn test_only_credentials_and_config_are_fatal() {
        assert!(Error::MissingCredentials("K".to_string()).is_fatal());
        assert!(Error::Config("bad".to_string()).is_fatal());
        assert!(!Error::EmptyResponse.is_fatal());
        assert!(!Error::Table("no id column".to_string()).is_fatal());
        assert!(
            !Error::RowCountMismatch {
                expected: 1,
                actual: 0
            }
            .is_fatal()
        );
    }

    #[test]
    fn test_json_error_conversion() {
        let err: Error = serde_json::from_str::<serde_json::Value>("{oops")
            .unwrap_err()
            .into();
        assert_eq!(err.category(), "serialization");
    }

    proptest! {
        #[test]
        fn test_api_status_recoverability(status in 100u16..600) {
            let err = Error::Api { status, message: String::new() };
            prop_assert_eq!(err.is_recoverable(), status == 429 || status >= 500);
            prop_assert_eq!(err.category(), "api");
        }
    }
}

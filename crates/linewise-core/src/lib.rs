//! # linewise-core
//!
//! Row-aligned batch rewriting of tabular documents through a remote
//! text-generation service.
//!
//! A document is an ordered sequence of [`Row`]s (source text, optional draft
//! target, optional lock flag). The crate chunks that sequence into batches,
//! sends each batch to an unreliable external model, and reassembles a result
//! that lines up 1:1 with the input no matter what the model does.
//!
//! ## Architecture
//!
//! - **Client**: [`GenerationClient`](client::GenerationClient) wraps one remote
//!   call with bounded exponential backoff
//! - **Window**: [`ContextWindowBuilder`] renders the neighbourhood of a row
//! - **Segmentation**: [`Segmenter`](segment::Segmenter) proposes semantic spans
//!   and merges them into right-sized batches
//! - **Strategies**: [`Strategy`](strategy::Strategy) implementations rewrite
//!   one batch at a time
//! - **Orchestration**: [`Processor`] plans batches, runs them in order and
//!   falls back to the original rows when a batch fails
//! - **Collaborators**: [`Table`](table::Table) for tab-separated I/O,
//!   [`Glossary`] for terminology, [`audit`] for post-run checks
//!
//! ## Quick Start
//!
//! ```rust
//! use linewise_core::segment::{MergeBudget, merge_segments, tiles};
//! use linewise_core::table::Table;
//!
//! let table = Table::parse("ID\tSource\tTarget\n1\tHello\t\n2\tworld\t\n", false)?;
//! let raw: Vec<_> = (0..table.rows.len()).map(|i| linewise_core::Segment::new(i, i)).collect();
//! let batches = merge_segments(&raw, &table.rows, &MergeBudget::default());
//!
//! assert!(tiles(&batches, table.rows.len()));
//! assert_eq!(batches.len(), 1);
//! # Ok::<(), linewise_core::Error>(())
//! ```
//!
//! ## Error Handling
//!
//! Only configuration and credential failures abort a run. Everything else
//! degrades to in-band annotations in the output rows:
//!
//! ```rust
//! use linewise_core::Error;
//!
//! let err = Error::RowCountMismatch { expected: 3, actual: 2 };
//! assert!(!err.is_fatal());
//! ```

/// Post-run quality checks
pub mod audit;
/// Remote generation client with retry
pub mod client;
/// Configuration management
pub mod config;
/// Error types and result aliases
pub mod error;
/// Terminology compliance
pub mod glossary;
/// Batch orchestration
pub mod processor;
/// Sentinel vocabulary and response reconciliation
pub mod protocol;
/// Semantic segmentation
pub mod segment;
/// Rewrite strategies
pub mod strategy;
/// Tab-separated row source and sink
pub mod table;
/// Core data types
pub mod types;
/// Sliding context window
pub mod window;

// Re-export commonly used types
pub use client::{GenerateOptions, GenerationClient, Generator, RetryPolicy};
pub use config::Config;
pub use error::{Error, Result};
pub use glossary::Glossary;
pub use processor::{Processor, RunOutcome, RunReport};
pub use strategy::{Strategy, StrategyContext, StrategyKind, build_strategy};
pub use types::*;
pub use window::ContextWindowBuilder;

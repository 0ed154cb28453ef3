//! Configuration for rewrite runs.
//!
//! Configuration is stored in TOML. Every field has a default, so an absent
//! file, an absent section or an absent key all resolve to the values below.
//!
//! ## Example Configuration File
//!
//! ```toml
//! [llm]
//! api_key_env_var = "GEMINI_API_KEY"
//! default_model = "gemini-2.5-flash"
//! max_retries = 3
//!
//! [processing]
//! batch_size = 15
//! politeness_delay_ms = 500
//!
//! [processing.context_window]
//! before = 3
//! after = 2
//!
//! [segmentation]
//! target_chars = 1500
//! max_lines = 40
//! ```
//!
//! ## Environment Overrides
//!
//! Applied after the file is read:
//!
//! - `LINEWISE_MODEL` replaces `llm.default_model`
//! - `LINEWISE_BASE_URL` replaces `llm.base_url`
//! - `LINEWISE_MAX_RETRIES` replaces `llm.max_retries`
//!
//! ```rust
//! use linewise_core::Config;
//!
//! let config = Config::from_toml_str("[processing]\nbatch_size = 20\n")?;
//! assert_eq!(config.processing.batch_size, 20);
//! assert_eq!(config.llm.max_retries, 3);
//! # Ok::<(), linewise_core::Error>(())
//! ```

use crate::{Error, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Generation service settings.
    pub llm: LlmConfig,
    /// Orchestrator settings.
    pub processing: ProcessingConfig,
    /// Segmenter settings.
    pub segmentation: SegmentationConfig,
    /// Row source/sink settings.
    pub table: TableConfig,
    /// Per-strategy settings.
    pub strategies: StrategiesConfig,
}

/// Generation service settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Environment variable holding the API key.
    pub api_key_env_var: String,
    /// API root, without the `/models/...` suffix.
    pub base_url: String,
    /// Model used for batch calls.
    pub default_model: String,
    /// Model used for setup-time analysis (knowledge context, segmentation).
    pub knowledge_model: String,
    /// Attempts per call, including the first.
    pub max_retries: u32,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key_env_var: "GEMINI_API_KEY".to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            default_model: "gemini-2.5-flash".to_string(),
            knowledge_model: "gemini-2.5-pro".to_string(),
            max_retries: 3,
            timeout_secs: 60,
        }
    }
}

impl LlmConfig {
    /// Per-request timeout.
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Orchestrator settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Rows per batch when the strategy supplies no boundaries.
    pub batch_size: usize,
    /// Fixed pause between batches, in milliseconds.
    pub politeness_delay_ms: u64,
    /// How many processed rows a strategy may see as history.
    pub history_window: usize,
    /// Sliding window around the row under review.
    pub context_window: ContextWindowConfig,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            batch_size: 15,
            politeness_delay_ms: 500,
            history_window: 8,
            context_window: ContextWindowConfig::default(),
        }
    }
}

impl ProcessingConfig {
    /// Pause between batches.
    pub const fn politeness_delay(&self) -> Duration {
        Duration::from_millis(self.politeness_delay_ms)
    }
}

/// Sliding window size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextWindowConfig {
    /// Preceding rows shown.
    pub before: usize,
    /// Following rows shown.
    pub after: usize,
}

impl Default for ContextWindowConfig {
    fn default() -> Self {
        Self {
            before: 3,
            after: 2,
        }
    }
}

/// Segmenter settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    /// Rows per phase-1 analysis request.
    pub analysis_chunk_rows: usize,
    /// Character budget a segment grows towards.
    pub target_chars: usize,
    /// Hard cap on rows per segment.
    pub max_lines: usize,
    /// Segments shorter than this are absorbed whenever the line cap allows.
    pub straggler_chars: usize,
    /// Model for phase 1; falls back to `llm.knowledge_model`.
    pub model: Option<String>,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            analysis_chunk_rows: 200,
            target_chars: 1500,
            max_lines: 40,
            straggler_chars: 100,
            model: None,
        }
    }
}

/// Row source/sink settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    /// Map unrecognised headers by position (`id, source[, target]`).
    pub positional_fallback: bool,
}

/// Per-strategy settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategiesConfig {
    /// Row-review settings.
    pub review: ReviewConfig,
    /// Segment-rewrite settings.
    pub segment: SegmentRewriteConfig,
    /// Dual-pass settings.
    pub dual_pass: DualPassConfig,
    /// Subtitle settings.
    pub subtitle: SubtitleConfig,
}

/// Row-review settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    /// Derive a knowledge context during setup.
    pub generate_knowledge: bool,
    /// Overrides `llm.knowledge_model` for setup calls.
    pub knowledge_model: Option<String>,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            generate_knowledge: true,
            knowledge_model: None,
        }
    }
}

/// Segment-rewrite settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentRewriteConfig {
    /// Processed rows quoted in each prompt for continuity.
    pub history_rows: usize,
}

impl Default for SegmentRewriteConfig {
    fn default() -> Self {
        Self { history_rows: 8 }
    }
}

/// Dual-pass settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DualPassConfig {
    /// Extract recurring terms during setup.
    pub extract_terms: bool,
    /// Run the QA pass after editing.
    pub enable_qa_check: bool,
    /// Overrides `llm.knowledge_model` for persona and term generation.
    pub persona_model: Option<String>,
}

impl Default for DualPassConfig {
    fn default() -> Self {
        Self {
            extract_terms: true,
            enable_qa_check: true,
            persona_model: None,
        }
    }
}

/// Subtitle settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubtitleConfig {
    /// Ask the model for a style guide during setup when none was supplied.
    pub generate_style_guide: bool,
    /// Overrides `llm.knowledge_model` for style guide generation.
    pub style_model: Option<String>,
    /// Processed rows quoted in each prompt for continuity.
    pub history_rows: usize,
}

impl Default for SubtitleConfig {
    fn default() -> Self {
        Self {
            generate_style_guide: true,
            style_model: None,
            history_rows: 5,
        }
    }
}

impl Config {
    /// Load from `path`, or from [`Config::default_path`] when `None`.
    ///
    /// A missing file yields defaults; a malformed file is an error.
    /// Environment overrides are applied in both cases.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let resolved = match path {
            Some(p) => Some(p.to_path_buf()),
            None => Self::default_path(),
        };

        let mut config = match resolved {
            Some(ref p) if p.exists() => {
                debug!("Loading config from {}", p.display());
                let content = fs::read_to_string(p)?;
                Self::from_toml_str(&content)
                    .map_err(|e| Error::Config(format!("{}: {e}", p.display())))?
            },
            Some(ref p) => {
                // Only warn when the user pointed at a file explicitly.
                if path.is_some() {
                    warn!("Config file not found at {}. Using defaults.", p.display());
                }
                Self::default()
            },
            None => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Serialize to TOML text.
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Platform config location (`<config_dir>/config.toml`).
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("dev", "linewise", "linewise")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Apply `LINEWISE_*` overrides using `lookup` to read variables.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(model) = lookup("LINEWISE_MODEL").filter(|v| !v.trim().is_empty()) {
            self.llm.default_model = model;
        }
        if let Some(url) = lookup("LINEWISE_BASE_URL").filter(|v| !v.trim().is_empty()) {
            self.llm.base_url = url;
        }
        if let Some(raw) = lookup("LINEWISE_MAX_RETRIES") {
            match raw.trim().parse::<u32>() {
                Ok(n) => self.llm.max_retries = n,
                Err(_) => warn!("Ignoring non-numeric LINEWISE_MAX_RETRIES={raw}"),
            }
        }
    }

    /// Reject values no run can work with.
    pub fn validate(&self) -> Result<()> {
        if self.llm.max_retries == 0 {
            return Err(Error::Config("llm.max_retries must be at least 1".to_string()));
        }
        if self.processing.batch_size == 0 {
            return Err(Error::Config("processing.batch_size must be at least 1".to_string()));
        }
        if self.segmentation.max_lines == 0 || self.segmentation.analysis_chunk_rows == 0 {
            return Err(Error::Config(
                "segmentation.max_lines and segmentation.analysis_chunk_rows must be at least 1"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Model for setup-time analysis in the segmenter.
    pub fn segmentation_model(&self) -> &str {
        self.segmentation
            .model
            .as_deref()
            .unwrap_or(&self.llm.knowledge_model)
    }
}

//! Subtitle proofreading.
//!
//! Each batch is sent as one JSON request. Besides the corrected target,
//! the model returns a per-row comment, used mainly to flag transcription
//! errors in the source (misheard words, wrong names). Comments are
//! written to the row's `Comments` field and joined onto any comment the
//! row already carried.

use super::{Strategy, StrategyContext, pretty, scalar, source_snippet};
use crate::client::{GenerateOptions, GenerationClient};
use crate::config::Config;
use crate::glossary::Glossary;
use crate::protocol::parse_json;
use crate::types::{COMMENTS_FIELD, Row};
use crate::window::ContextWindowBuilder;
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use tracing::{info, warn};

const DEFAULT_STYLE_GUIDE: &str = "No specific style guide generated.";

/// Marker the model prepends to a comment about a suspected source error.
pub const TRANSCRIPTION_FLAG: &str = "[TRANSCRIPTION FLAG]";

const BLACKLIST: &str = "[NEGATIVE CONSTRAINTS: TRANSLATIONESE BLACKLIST]\n\
     - Do NOT use \"进行\" (conduct) as a dummy verb.\n\
     - Do NOT use \"通过\" (via/through) for 'by'.\n\
     - Do NOT use \"旨在\" (aim to).\n\
     - Avoid \"它\" (it) unless referring to a specific physical object.";

/// Proofreads subtitle rows and records transcription flags as comments.
#[derive(Debug, Clone)]
pub struct SubtitleStrategy {
    generate_style_guide: bool,
    style_model: String,
    history_rows: usize,
    style_guide: String,
    glossary: Glossary,
}

/// Reply for one row.
#[derive(Debug, Default)]
struct RowReply {
    target: Option<String>,
    comment: Option<String>,
}

impl SubtitleStrategy {
    /// Strategy configured from `[strategies.subtitle]`.
    pub fn from_config(config: &Config) -> Self {
        let subtitle = &config.strategies.subtitle;
        Self {
            generate_style_guide: subtitle.generate_style_guide,
            style_model: subtitle
                .style_model
                .clone()
                .unwrap_or_else(|| config.llm.knowledge_model.clone()),
            history_rows: subtitle.history_rows,
            style_guide: DEFAULT_STYLE_GUIDE.to_string(),
            glossary: Glossary::new(),
        }
    }

    /// Style guide used in batch prompts.
    pub fn style_guide(&self) -> &str {
        &self.style_guide
    }

    async fn derive_style_guide(&self, client: &GenerationClient, text: &str) -> Result<String> {
        let prompt = format!(
            "You are a senior localization architect for video content.\n\
             Task: create a concise, practical style guide.\n\n\
             Sections required:\n\
             1. Project Context: topic and vibe (casual channel vs. formal documentary).\n\
             2. Stylistic Protocols:\n\
             \x20  - Voice-Over (VO): spoken narrative, fluid and easy to breathe.\n\
             \x20  - On-Screen Text (OS): titles and labels, concise and nominal.\n\
             3. Formatting: numbers and punctuation in subtitles.\n\n\
             Source text snippet:\n{text}"
        );
        let options = GenerateOptions::default().with_model(self.style_model.clone());
        Ok(client.generate(&prompt, &options).await?.trim().to_string())
    }

    fn prompt(&self, batch: &[Row], history: &[Row]) -> String {
        let input: Vec<Value> = batch
            .iter()
            .filter(|r| !r.locked)
            .map(|r| json!({ "ID": r.id, "English": r.source, "Chinese": r.target }))
            .collect();
        let tail = &history[history.len().saturating_sub(self.history_rows)..];
        let previous: Vec<Value> = tail
            .iter()
            .map(|r| json!({ "English": r.source, "Chinese": r.target }))
            .collect();

        format!(
            "[STYLE GUIDE]\n{}\n\n{BLACKLIST}\n\n[GLOSSARY]\n{}\n\n\
             [PREVIOUS CONTEXT]\n{}\n\n\
             [TASK]\n\
             1. Transcription audit: check each 'English' source for typos, speech recognition \
             errors (homophones) or wrong names. If you find one, start 'Comments' with \
             \"{TRANSCRIPTION_FLAG}: <note>\".\n\
             2. Translation: decide whether the row is voice-over (spoken) or on-screen text, \
             then apply the matching style (VO fluid, OS concise).\n\n\
             [INPUT DATA]\n{}\n\n\
             [OUTPUT FORMAT]\n\
             JSON array of {{\"ID\": \"...\", \"Chinese_Proofread\": \"...\", \"Comments\": \"...\"}}",
            self.style_guide,
            self.glossary.prompt_lines(),
            pretty(&previous),
            pretty(&input),
        )
    }

    fn apply(&self, batch: &[Row], replies: &HashMap<String, RowReply>) -> Vec<Row> {
        batch
            .iter()
            .map(|row| {
                if row.locked {
                    return row.clone();
                }
                let reply = replies.get(&row.id);
                let mut out = match reply.and_then(|r| r.target.as_deref()) {
                    Some(text) if !text.trim().is_empty() => {
                        row.with_target(self.glossary.enforce(&row.source, text.trim()))
                    },
                    _ => row.clone(),
                };
                let comment = reply.and_then(|r| r.comment.as_deref()).unwrap_or("");
                out.extra
                    .insert(COMMENTS_FIELD.to_string(), join_comment(row, comment));
                out
            })
            .collect()
    }
}

/// Existing comment and `new` joined with ` | `, skipping empty parts.
fn join_comment(row: &Row, new: &str) -> String {
    let new = new.trim();
    match row.comment() {
        Some(existing) if !new.is_empty() => format!("{existing} | {new}"),
        Some(existing) => existing.to_string(),
        None => new.to_string(),
    }
}

/// Parse `[{"ID", "Chinese_Proofread", "Comments"}]` into an id → reply map.
fn parse_replies(text: &str) -> Result<HashMap<String, RowReply>> {
    let Value::Array(items) = parse_json(text)? else {
        return Err(Error::Parse("expected a JSON array of objects".to_string()));
    };
    Ok(items
        .iter()
        .filter_map(|item| {
            let id = scalar(item.get("ID")?)?;
            let reply = RowReply {
                target: item.get("Chinese_Proofread").and_then(scalar),
                comment: item.get("Comments").and_then(scalar),
            };
            Some((id, reply))
        })
        .collect())
}

#[async_trait]
impl Strategy for SubtitleStrategy {
    fn name(&self) -> &'static str {
        "SubtitleStrategy"
    }

    async fn setup(
        &mut self,
        client: &GenerationClient,
        rows: &[Row],
        context: &StrategyContext,
    ) -> Result<()> {
        self.glossary = context.glossary.clone();
        if let Some(guide) = context.style_guide.as_deref().filter(|g| !g.trim().is_empty()) {
            self.style_guide = guide.trim().to_string();
            return Ok(());
        }
        if !self.generate_style_guide {
            return Ok(());
        }

        let text = source_snippet(rows, 300, " ", 5000);
        if text.trim().is_empty() {
            return Ok(());
        }
        info!("Generating subtitle style guide...");
        self.style_guide = self.derive_style_guide(client, &text).await?;
        info!("Subtitle style guide generated.");
        Ok(())
    }

    async fn process_batch(
        &self,
        client: &GenerationClient,
        batch: &[Row],
        history: &[Row],
        _window: &ContextWindowBuilder<'_>,
    ) -> Result<Vec<Row>> {
        if batch.iter().all(|r| r.locked) {
            return Ok(batch.to_vec());
        }

        let reply = async {
            let text = client
                .generate(&self.prompt(batch, history), &GenerateOptions::json())
                .await?;
            parse_replies(&text)
        }
        .await;

        match reply {
            Ok(replies) => Ok(self.apply(batch, &replies)),
            Err(e) => {
                warn!("Subtitle batch failed, annotating rows: {e}");
                Ok(batch
                    .iter()
                    .map(|row| {
                        if row.locked {
                            return row.clone();
                        }
                        let mut out = row.clone();
                        out.extra.insert(
                            COMMENTS_FIELD.to_string(),
                            join_comment(row, &format!("Error: {e}")),
                        );
                        out
                    })
                    .collect())
            },
        }
    }
}

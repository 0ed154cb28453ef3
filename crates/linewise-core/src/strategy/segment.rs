use super::{Strategy, StrategyContext};
use crate::client::{GenerateOptions, GenerationClient};
use crate::config::Config;
use crate::glossary::Glossary;
use crate::protocol::{self, LOCKED, MERGED_DOWN, MERGED_UP, parse_index_map};
use crate::segment::Segmenter;
use crate::types::{Row, Segment};
use crate::window::ContextWindowBuilder;
use crate::Result;
use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info, warn};

const SYSTEM_INSTRUCTION: &str =
    "You are a professional translator and reviser. Output strictly valid JSON.";

/// Rewrites one semantic segment per call and reconciles the answer row by row.
#[derive(Debug, Clone)]
pub struct SegmentStrategy {
    segmenter: Segmenter,
    history_rows: usize,
    glossary: Glossary,
    style_guide: Option<String>,
    segments: Vec<Segment>,
}

impl SegmentStrategy {
    /// Strategy configured from `[segmentation]` and `[strategies.segment]`.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Segmenter::from_config(config),
            config.strategies.segment.history_rows,
        )
    }

    /// Strategy with an explicit segmenter.
    pub fn new(segmenter: Segmenter, history_rows: usize) -> Self {
        Self {
            segmenter,
            history_rows,
            glossary: Glossary::new(),
            style_guide: None,
            segments: Vec::new(),
        }
    }

    /// Segments computed during setup.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    fn prompt(&self, batch: &[Row], history: &[Row]) -> String {
        let rows: Vec<_> = batch
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let mut entry = json!({ "index": i, "source": row.source });
                if !row.target.trim().is_empty() {
                    entry["draft"] = json!(row.target);
                }
                if row.locked {
                    entry["locked"] = json!(true);
                }
                entry
            })
            .collect();

        let tail = &history[history.len().saturating_sub(self.history_rows)..];
        let history_text = if tail.is_empty() {
            "None".to_string()
        } else {
            tail.iter()
                .map(|r| format!("- {} -> {}", r.source, r.target))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let rows_json = serde_json::to_string_pretty(&rows).unwrap_or_else(|_| "[]".to_string());

        format!(
            "[STYLE GUIDE]\n{style}\n\n\
             [MANDATORY GLOSSARY]\n{glossary}\n\n\
             [PREVIOUS CONTEXT]\n{history_text}\n\n\
             [TASK]\n\
             Rewrite the target for every row below as one coherent passage.\n\
             Use the draft when present, but correct it where it is imprecise.\n\n\
             [MERGE PROTOCOL]\n\
             - If a sentence is split across rows, put the full text in one row.\n\
             - For a row whose content moved into the previous row, return \"{MERGED_UP}\".\n\
             - For a row whose content moved into the next row, return \"{MERGED_DOWN}\".\n\
             - For a row marked locked, return \"{LOCKED}\".\n\
             - Return a value for EVERY index. Never return an empty string.\n\n\
             [INPUT]\n{rows_json}\n\n\
             [OUTPUT FORMAT]\n\
             A JSON object mapping each index to its text: {{\"0\": \"...\", \"1\": \"{MERGED_UP}\"}}",
            style = self
                .style_guide
                .as_deref()
                .unwrap_or("(No style guide provided)"),
            glossary = self.glossary.prompt_lines(),
        )
    }
}

#[async_trait]
impl Strategy for SegmentStrategy {
    fn name(&self) -> &'static str {
        "SegmentStrategy"
    }

    async fn setup(
        &mut self,
        client: &GenerationClient,
        rows: &[Row],
        context: &StrategyContext,
    ) -> Result<()> {
        self.glossary = context.glossary.clone();
        self.style_guide = context.style_guide.clone();
        self.segments = self.segmenter.segment(client, rows).await;
        info!("Prepared {} semantic segments.", self.segments.len());
        Ok(())
    }

    fn batch_boundaries(&self, total: usize) -> Option<Vec<Segment>> {
        if self.segments.is_empty() {
            return None;
        }
        if self.segments.last().map(|s| s.end + 1) != Some(total) {
            debug!("Segments do not end at row {total}; planner will decide");
        }
        Some(self.segments.clone())
    }

    async fn process_batch(
        &self,
        client: &GenerationClient,
        batch: &[Row],
        history: &[Row],
        _window: &ContextWindowBuilder<'_>,
    ) -> Result<Vec<Row>> {
        if batch.iter().all(|r| r.locked || !r.has_source()) {
            return Ok(batch.to_vec());
        }

        let options = GenerateOptions::json()
            .with_system_instruction(SYSTEM_INSTRUCTION)
            .with_temperature(0.3);
        let text = client.generate(&self.prompt(batch, history), &options).await?;

        let parsed = match parse_index_map(&text, batch.len()) {
            Ok(map) => Some(map),
            Err(e) => {
                warn!("Unparsable segment response for {} rows: {e}", batch.len());
                None
            },
        };
        Ok(protocol::reconcile_batch(batch, parsed.as_ref(), &self.glossary))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::client::RetryPolicy;
    use crate::client::testing::ScriptedGenerator;
    use crate::protocol::MISSING_TRANSLATION;
    use crate::segment::MergeBudget;
    use pretty_assertions::assert_eq;

    fn strategy() -> SegmentStrategy {
        SegmentStrategy::new(Segmenter::new(200, MergeBudget::default(), "seg"), 8)
    }

    fn rows() -> Vec<Row> {
        vec![
            Row::new("a", "The Party", ""),
            Row::new("b", "shall indemnify", "draft"),
            Row::new("c", "the other.", ""),
        ]
    }

    #[tokio::test]
    async fn test_setup_computes_boundaries() {
        let backend = ScriptedGenerator::new().push_ok(r#"[{"start": 0, "end": 2}]"#);
        let client = GenerationClient::new(backend, RetryPolicy::immediate(1));
        let mut strategy = strategy();
        assert!(strategy.batch_boundaries(3).is_none());

        strategy
            .setup(&client, &rows(), &StrategyContext::default())
            .await
            .unwrap();
        assert_eq!(strategy.batch_boundaries(3), Some(vec![Segment::new(0, 2)]));
    }

    #[tokio::test]
    async fn test_process_batch_applies_protocol() {
        let backend = ScriptedGenerator::new()
            .push_ok(r#"{"0": "[[MERGED_DOWN]]", "1": "当事人应赔偿另一人。"}"#);
        let client = GenerationClient::new(backend.clone(), RetryPolicy::immediate(1));
        let mut strategy = strategy();
        strategy.glossary = Glossary::from_pairs([("Party", "方")]).unwrap();

        let batch = rows();
        let window = ContextWindowBuilder::with_defaults(&batch);
        let out = strategy
            .process_batch(&client, &batch, &[], &window)
            .await
            .unwrap();

        let targets: Vec<&str> = out.iter().map(|r| r.target.as_str()).collect();
        assert_eq!(
            targets,
            vec![
                MERGED_DOWN,
                "当事人应赔偿另一人。 [[GLOSSARY_VIOLATION: Party should be 方]]",
                MISSING_TRANSLATION,
            ]
        );

        let (prompt, options) = &backend.prompts()[0];
        assert!(prompt.contains("\"draft\": \"draft\""));
        assert!(prompt.contains("- Party -> 方"));
        assert_eq!(options.response_mime_type.as_deref(), Some("application/json"));
    }

    #[tokio::test]
    async fn test_failed_call_is_batch_error() {
        let backend = ScriptedGenerator::new().push_err("quota");
        let client = GenerationClient::new(backend, RetryPolicy::immediate(1));
        let batch = rows();
        let window = ContextWindowBuilder::with_defaults(&batch);
        assert!(
            strategy()
                .process_batch(&client, &batch, &[], &window)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_fully_locked_batch_skips_call() {
        let backend = ScriptedGenerator::new();
        let client = GenerationClient::new(backend.clone(), RetryPolicy::immediate(1));
        let batch: Vec<Row> = rows().into_iter().map(|r| r.with_locked(true)).collect();
        let window = ContextWindowBuilder::with_defaults(&batch);

        let out = strategy()
            .process_batch(&client, &batch, &[], &window)
            .await
            .unwrap();
        assert_eq!(out, batch);
        assert_eq!(backend.calls(), 0);
    }

    #[test]
    fn test_prompt_quotes_bounded_history() {
        let mut strategy = strategy();
        strategy.history_rows = 1;
        let history = vec![Row::new("x", "old one", "旧一"), Row::new("y", "old two", "旧二")];
        let prompt = strategy.prompt(&rows(), &history);
        assert!(prompt.contains("- old two -> 旧二"));
        assert!(!prompt.contains("old one"));
    }
}

use super::{Strategy, StrategyContext, pretty, scalar, source_snippet};
use crate::client::{GenerateOptions, GenerationClient};
use crate::config::Config;
use crate::glossary::Glossary;
use crate::protocol::{MERGED_UP, parse_json, qa_flag};
use crate::types::Row;
use crate::window::ContextWindowBuilder;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use tracing::{info, warn};

const DEFAULT_TRANSLATOR: &str = "You are a precise literal translator.";
const DEFAULT_EDITOR: &str = "You are an expert editor.";
const ENGINE_INSTRUCTION: &str = "You are an automated publishing engine. Output strictly valid JSON.";
const MAX_TERMS: usize = 20;
const HISTORY_ROWS: usize = 8;

/// A recurring term and its standard translation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Term {
    /// Source form.
    pub term: String,
    /// Standard translation.
    #[serde(default)]
    pub translation: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Personas {
    literal_translator: Option<String>,
    academic_editor: Option<String>,
}

/// Translator pass, editor pass, then an optional QA pass.
#[derive(Debug, Clone)]
pub struct DualPassStrategy {
    persona_model: String,
    extract_terms: bool,
    enable_qa_check: bool,
    translator: String,
    editor: String,
    terms: Vec<Term>,
    glossary: Glossary,
}

impl DualPassStrategy {
    /// Strategy configured from `[strategies.dual_pass]`.
    pub fn from_config(config: &Config) -> Self {
        let dual = &config.strategies.dual_pass;
        Self {
            persona_model: dual
                .persona_model
                .clone()
                .unwrap_or_else(|| config.llm.knowledge_model.clone()),
            extract_terms: dual.extract_terms,
            enable_qa_check: dual.enable_qa_check,
            translator: DEFAULT_TRANSLATOR.to_string(),
            editor: DEFAULT_EDITOR.to_string(),
            terms: Vec::new(),
            glossary: Glossary::new(),
        }
    }

    /// Extracted terms.
    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    /// Translator and editor personas.
    pub fn personas(&self) -> (&str, &str) {
        (&self.translator, &self.editor)
    }

    async fn generate_personas(&mut self, client: &GenerationClient, text: &str) -> Result<()> {
        let prompt = format!(
            "Analyze the following text snippet (field, tone).\n\n\
             Define TWO distinct personas:\n\
             1. \"Literal Translator\": focuses on semantic precision, suppresses the urge to polish.\n\
             2. \"Editor\": focuses on publication-level flow and register, blind to source structure.\n\n\
             OUTPUT FORMAT (JSON):\n\
             {{\"analysis\": \"...\", \"literalTranslator\": \"...\", \"academicEditor\": \"...\"}}\n\n\
             TEXT:\n{text}"
        );
        let options = GenerateOptions::json().with_model(self.persona_model.clone());
        let personas: Personas = serde_json::from_value(parse_json(&client.generate(&prompt, &options).await?)?)?;

        if let Some(t) = personas.literal_translator.filter(|t| !t.trim().is_empty()) {
            self.translator = t;
        }
        if let Some(e) = personas.academic_editor.filter(|e| !e.trim().is_empty()) {
            self.editor = e;
        }
        info!("Dual personas generated.");
        Ok(())
    }

    async fn collect_terms(&mut self, client: &GenerationClient, text: &str) -> Result<()> {
        let prompt = format!(
            "Extract the top {MAX_TERMS} recurring technical terms or concepts from this text.\n\
             Output a JSON list of objects: {{\"term\": \"...\", \"translation\": \"...\"}}\n\n\
             TEXT:\n{text}"
        );
        let options = GenerateOptions::json().with_model(self.persona_model.clone());
        let mut terms: Vec<Term> =
            serde_json::from_value(parse_json(&client.generate(&prompt, &options).await?)?)?;
        terms.retain(|t| !t.term.trim().is_empty());
        terms.truncate(MAX_TERMS);
        info!("Extracted {} terms.", terms.len());
        self.terms = terms;
        Ok(())
    }

    fn terminology(&self) -> String {
        let mut lines: Vec<String> = self
            .terms
            .iter()
            .map(|t| format!("- {}: {}", t.term, t.translation))
            .collect();
        if !self.glossary.is_empty() {
            lines.push(self.glossary.prompt_lines());
        }
        if lines.is_empty() {
            "None".to_string()
        } else {
            lines.join("\n")
        }
    }

    async fn translate(&self, client: &GenerationClient, batch: &[Row], history: &[Row]) -> Result<Vec<Row>> {
        let input: Vec<Value> = batch
            .iter()
            .map(|r| json!({ "ID": r.id, "Source": r.source, "Draft": r.target }))
            .collect();
        let tail = &history[history.len().saturating_sub(HISTORY_ROWS)..];
        let history_json: Vec<Value> = tail
            .iter()
            .map(|r| json!({ "ID": r.id, "Target": r.target }))
            .collect();

        let prompt = format!(
            "[ROLE]\n{}\n\n[TERMINOLOGY]\n{}\n\n[PREVIOUS CONTEXT]\n{}\n\n\
             [TASK]\nTranslate each 'Source' into the target language ('Target').\n\
             Use the Draft if provided, but override it if imprecise.\n\n\
             [MERGE PROTOCOL]\n\
             If a sentence is split across two rows, put the full sentence in the first row \
             and return \"{MERGED_UP}\" for the second. Return exactly one object per input row.\n\n\
             [INPUT DATA]\n{}\n\n\
             [OUTPUT FORMAT]\nJSON array of {{\"ID\": \"...\", \"Target\": \"...\"}}",
            self.translator,
            self.terminology(),
            pretty(&history_json),
            pretty(&input),
        );
        let options = GenerateOptions::json().with_system_instruction(ENGINE_INSTRUCTION);
        let text = client.generate(&prompt, &options).await?;
        let targets = parse_id_map(&text, "Target")?;
        Ok(apply_targets(batch, &targets))
    }

    async fn edit(&self, client: &GenerationClient, drafted: &[Row]) -> Result<Vec<Row>> {
        let input: Vec<Value> = drafted
            .iter()
            .filter(|r| !r.locked)
            .map(|r| json!({ "ID": r.id, "Draft": r.target }))
            .collect();
        let prompt = format!(
            "[ROLE]\n{}\n\n[TERMINOLOGY]\n{}\n\n\
             [TASK]\nPolish each Draft into fluent, publication-ready prose. \
             Do not consult the source language structure. Keep \"{MERGED_UP}\" values unchanged.\n\n\
             [INPUT DATA]\n{}\n\n\
             [OUTPUT FORMAT]\nJSON array of {{\"ID\": \"...\", \"Target\": \"...\"}}",
            self.editor,
            self.terminology(),
            pretty(&input),
        );
        let options = GenerateOptions::json().with_system_instruction(ENGINE_INSTRUCTION);
        let text = client.generate(&prompt, &options).await?;
        let targets = parse_id_map(&text, "Target")?;
        Ok(apply_targets(drafted, &targets))
    }

    async fn quality_check(&self, client: &GenerationClient, original: &[Row], revised: &[Row]) -> Result<Vec<Row>> {
        let input: Vec<Value> = original
            .iter()
            .zip(revised)
            .filter(|(_, rev)| !rev.locked)
            .map(|(orig, rev)| json!({ "ID": orig.id, "Source": orig.source, "Revision": rev.target }))
            .collect();
        let prompt = format!(
            "TASK: QA check. Identify:\n\
             1. Omissions (source information missing in the revision).\n\
             2. Misinterpretations (meaning contradicted).\n\
             3. Hallucinations (information not in the source).\n\
             Ignore stylistic changes. Focus on factual errors.\n\n\
             INPUT:\n{}\n\n\
             OUTPUT FORMAT (JSON):\nArray of {{\"ID\": \"...\", \"Issue\": \"...\"}}. Only include items with issues.",
            pretty(&input),
        );
        let text = client.generate(&prompt, &GenerateOptions::json()).await?;
        let issues = parse_id_map(&text, "Issue")?;

        Ok(revised
            .iter()
            .map(|row| match issues.get(&row.id) {
                Some(issue) if !row.locked && !issue.trim().eq_ignore_ascii_case("PASS") => {
                    row.with_target(format!("{}{}", row.target, qa_flag(issue.trim())))
                },
                _ => row.clone(),
            })
            .collect())
    }
}

/// Parse `[{"ID": ..., "<field>": ...}]` into an id → value map.
fn parse_id_map(text: &str, field: &str) -> Result<HashMap<String, String>> {
    let Value::Array(items) = parse_json(text)? else {
        return Err(Error::Parse("expected a JSON array of objects".to_string()));
    };
    Ok(items
        .iter()
        .filter_map(|item| {
            let id = scalar(item.get("ID")?)?;
            let value = scalar(item.get(field)?)?;
            Some((id, value))
        })
        .collect())
}

/// New targets for unlocked rows; absent rows keep their previous target.
fn apply_targets(rows: &[Row], targets: &HashMap<String, String>) -> Vec<Row> {
    rows.iter()
        .map(|row| match targets.get(&row.id) {
            Some(_) if row.locked => row.clone(),
            Some(text) if text.trim().is_empty() => row.with_target(MERGED_UP),
            Some(text) => row.with_target(text.trim()),
            None => row.clone(),
        })
        .collect()
}

#[async_trait]
impl Strategy for DualPassStrategy {
    fn name(&self) -> &'static str {
        "DualPassStrategy"
    }

    async fn setup(
        &mut self,
        client: &GenerationClient,
        rows: &[Row],
        context: &StrategyContext,
    ) -> Result<()> {
        self.glossary = context.glossary.clone();
        let text = source_snippet(rows, 60, "\n", 8000);
        if text.trim().is_empty() {
            return Ok(());
        }

        info!("Initializing dual-pass analysis...");
        if let Err(e) = self.generate_personas(client, &text).await {
            warn!("Persona generation failed: {e}");
        }
        if self.extract_terms {
            if let Err(e) = self.collect_terms(client, &text).await {
                warn!("Term extraction failed: {e}");
            }
        }
        Ok(())
    }

    async fn process_batch(
        &self,
        client: &GenerationClient,
        batch: &[Row],
        history: &[Row],
        _window: &ContextWindowBuilder<'_>,
    ) -> Result<Vec<Row>> {
        let drafted = self.translate(client, batch, history).await?;

        let edited = match self.edit(client, &drafted).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("Editor pass failed, keeping translator output: {e}");
                drafted
            },
        };

        if !self.enable_qa_check {
            return Ok(edited);
        }
        match self.quality_check(client, batch, &edited).await {
            Ok(rows) => Ok(rows),
            Err(e) => {
                warn!("QA check failed: {e}");
                Ok(edited)
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::client::RetryPolicy;
    use crate::client::testing::ScriptedGenerator;
    use pretty_assertions::assert_eq;

    fn strategy(qa: bool) -> DualPassStrategy {
        let mut config = Config::default();
        config.strategies.dual_pass.enable_qa_check = qa;
        DualPassStrategy::from_config(&config)
    }

    fn batch() -> Vec<Row> {
        vec![
            Row::new("1", "Results are shown", "结果"),
            Row::new("2", "in Table 2.", ""),
            Row::new("3", "Fixed.", "固定。").with_locked(true),
        ]
    }

    fn targets(rows: &[Row]) -> Vec<&str> {
        rows.iter().map(|r| r.target.as_str()).collect()
    }

    async fn run(strategy: &DualPassStrategy, backend: &ScriptedGenerator) -> Result<Vec<Row>> {
        let client = GenerationClient::new(backend.clone(), RetryPolicy::immediate(1));
        let rows = batch();
        let window = ContextWindowBuilder::with_defaults(&rows);
        strategy.process_batch(&client, &rows, &[], &window).await
    }

    #[tokio::test]
    async fn test_translate_then_edit() {
        let backend = ScriptedGenerator::new()
            .push_ok(r#"[{"ID": "1", "Target": "结果见表2。"}, {"ID": "2", "Target": ""}, {"ID": "3", "Target": "x"}]"#)
            .push_ok(r#"[{"ID": 1, "Target": "结果如表2所示。"}]"#);
        let out = run(&strategy(false), &backend).await.unwrap();
        assert_eq!(targets(&out), vec!["结果如表2所示。", MERGED_UP, "固定。"]);
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_editor_failure_keeps_translation() {
        let backend = ScriptedGenerator::new()
            .push_ok(r#"[{"ID": "1", "Target": "结果"}, {"ID": "2", "Target": "见表2。"}]"#)
            .push_err("editor down");
        let out = run(&strategy(false), &backend).await.unwrap();
        assert_eq!(targets(&out), vec!["结果", "见表2。", "固定。"]);
    }

    #[tokio::test]
    async fn test_qa_flags_rows() {
        let backend = ScriptedGenerator::new()
            .push_ok(r#"[{"ID": "1", "Target": "结果"}, {"ID": "2", "Target": "见表3。"}]"#)
            .push_ok(r#"[{"ID": "1", "Target": "结果"}, {"ID": "2", "Target": "见表3。"}]"#)
            .push_ok(r#"[{"ID": "1", "Issue": "PASS"}, {"ID": "2", "Issue": "Table number changed"}]"#);
        let out = run(&strategy(true), &backend).await.unwrap();
        assert_eq!(
            targets(&out),
            vec!["结果", "见表3。 [[QA FLAG: Table number changed]]", "固定。"]
        );
    }

    #[tokio::test]
    async fn test_translator_failure_is_batch_error() {
        let backend = ScriptedGenerator::new().push_ok("{\"not\": \"an array\"}");
        assert!(run(&strategy(false), &backend).await.is_err());
    }

    #[tokio::test]
    async fn test_setup_degrades_gracefully() {
        let backend = ScriptedGenerator::new()
            .push_ok(r#"{"analysis": "physics", "literalTranslator": "T", "academicEditor": "E"}"#)
            .push_err("terms down");
        let client = GenerationClient::new(backend, RetryPolicy::immediate(1));
        let mut strategy = strategy(false);
        strategy
            .setup(&client, &batch(), &StrategyContext::default())
            .await
            .unwrap();
        assert_eq!(strategy.personas(), ("T", "E"));
        assert!(strategy.terms().is_empty());
    }

    #[tokio::test]
    async fn test_terms_are_capped() {
        let many: Vec<Value> = (0..30)
            .map(|i| json!({ "term": format!("t{i}"), "translation": "x" }))
            .collect();
        let backend = ScriptedGenerator::new()
            .push_err("no personas")
            .push_ok(&serde_json::to_string(&many).unwrap());
        let client = GenerationClient::new(backend, RetryPolicy::immediate(1));
        let mut strategy = strategy(false);
        strategy
            .setup(&client, &batch(), &StrategyContext::default())
            .await
            .unwrap();
        assert_eq!(strategy.terms().len(), MAX_TERMS);
        assert_eq!(strategy.personas().0, DEFAULT_TRANSLATOR);
    }
}

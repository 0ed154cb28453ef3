use super::{Strategy, StrategyContext, source_snippet};
use crate::client::{GenerateOptions, GenerationClient};
use crate::config::Config;
use crate::glossary::Glossary;
use crate::types::Row;
use crate::window::{ContextWindowBuilder, preview};
use crate::Result;
use async_trait::async_trait;
use tracing::{info, warn};

const DEFAULT_CONTEXT: &str = "Translation review context (general)";

/// Three-part background derived once per document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KnowledgeContext {
    /// Topic, document type, audience and tone.
    pub context: Option<String>,
    /// Micro-domain, key terms and pitfalls.
    pub insight: Option<String>,
    /// Plain-language explanation of the document's logic.
    pub logic: Option<String>,
}

/// Reviews one row per call with a sliding window of its neighbours.
#[derive(Debug, Clone)]
pub struct ReviewStrategy {
    generate_knowledge: bool,
    knowledge_model: String,
    glossary: Glossary,
    knowledge: KnowledgeContext,
}

impl ReviewStrategy {
    /// Strategy configured from `[strategies.review]`.
    pub fn from_config(config: &Config) -> Self {
        let review = &config.strategies.review;
        Self {
            generate_knowledge: review.generate_knowledge,
            knowledge_model: review
                .knowledge_model
                .clone()
                .unwrap_or_else(|| config.llm.knowledge_model.clone()),
            glossary: Glossary::new(),
            knowledge: KnowledgeContext::default(),
        }
    }

    /// Background derived during setup.
    pub fn knowledge(&self) -> &KnowledgeContext {
        &self.knowledge
    }

    async fn derive_knowledge(&self, client: &GenerationClient, text: &str) -> Result<KnowledgeContext> {
        let excerpt = preview(text, 3000);
        let options = GenerateOptions::default().with_model(self.knowledge_model.clone());

        let context = client
            .generate(
                &format!(
                    "Analyze the following text.\n\
                     Identify: core topic, document type, intended audience, general tone.\n\
                     Summarize in one concise paragraph (under 100 words).\n\n\
                     Text:\n\"{excerpt}\""
                ),
                &options,
            )
            .await?
            .trim()
            .to_string();
        info!("Context generated");

        let insight = client
            .generate(
                &format!(
                    "ROLE: Senior domain analyst.\nGLOBAL CONTEXT: \"{context}\"\n\n\
                     1. Identify the specific micro-domain.\n\
                     2. Define 3-5 key terms.\n\
                     3. Flag false friends or pitfalls.\n\n\
                     OUTPUT:\n- Domain Context: ...\n- Key Definitions: ...\n- Pitfalls: ...\n\n\
                     TEXT:\n\"{excerpt}\""
                ),
                &options,
            )
            .await?
            .trim()
            .to_string();
        info!("Insight generated");

        let logic = client
            .generate(
                &format!(
                    "ROLE: Layman in the loop.\nCONTEXT: {}\n\n\
                     1. Explain what this text means to an outsider.\n\
                     2. Extract the logic, not a word-for-word translation.\n\
                     3. Explain in the opposite language of the source.\n\n\
                     TEXT:\n\"{excerpt}\"",
                    preview(&context, 500)
                ),
                &options.clone().with_temperature(0.7),
            )
            .await?
            .trim()
            .to_string();
        info!("Layman's logic generated");

        Ok(KnowledgeContext {
            context: Some(context),
            insight: Some(insight),
            logic: Some(logic),
        })
    }

    fn system_instruction(&self) -> String {
        format!(
            "You are an expert translation reviewer.\n\n\
             === KNOWLEDGE ===\n\
             [CONTEXT]\n{}\n\n[INSIGHT]\n{}\n\n\
             [MANDATORY GLOSSARY]\n\
             The following terminology MUST be used exactly as specified.\n{}\n\n\
             [LOGIC]\n{}\n\
             === END KNOWLEDGE ===\n\n\
             [TASK]\nReview the Target translation for the marked segment.\n\
             1. Check glossary compliance first.\n\
             2. Ensure the logic flows.\n\
             3. Ensure coherence with the surrounding segments.\n\
             4. Fix grammar and punctuation.\n\n\
             [OUTPUT]\nReturn ONLY the corrected Target text. If no changes, return the original.",
            self.knowledge.context.as_deref().unwrap_or("(Not available)"),
            self.knowledge.insight.as_deref().unwrap_or("(See glossary)"),
            self.glossary.prompt_lines(),
            self.knowledge.logic.as_deref().unwrap_or("(Not available)"),
        )
    }
}

/// Collapse doubled full-width commas left by the model.
fn tidy(text: &str) -> String {
    let mut out = text.trim().to_string();
    while out.contains("，，") {
        out = out.replace("，，", "，");
    }
    out
}

#[async_trait]
impl Strategy for ReviewStrategy {
    fn name(&self) -> &'static str {
        "ReviewStrategy"
    }

    async fn setup(
        &mut self,
        client: &GenerationClient,
        rows: &[Row],
        context: &StrategyContext,
    ) -> Result<()> {
        self.glossary = context.glossary.clone();
        if !self.generate_knowledge {
            return Ok(());
        }

        let text = source_snippet(rows, 100, " ", 5000);
        if text.trim().is_empty() {
            return Ok(());
        }

        info!("Generating knowledge context...");
        match self.derive_knowledge(client, &text).await {
            Ok(knowledge) => self.knowledge = knowledge,
            Err(e) => {
                self.knowledge = KnowledgeContext {
                    context: Some(DEFAULT_CONTEXT.to_string()),
                    ..KnowledgeContext::default()
                };
                return Err(e);
            },
        }
        Ok(())
    }

    async fn process_batch(
        &self,
        client: &GenerationClient,
        batch: &[Row],
        history: &[Row],
        window: &ContextWindowBuilder<'_>,
    ) -> Result<Vec<Row>> {
        let options = GenerateOptions::default().with_system_instruction(self.system_instruction());
        let mut reviewed: Vec<Row> = Vec::with_capacity(batch.len());

        for (i, row) in batch.iter().enumerate() {
            if row.locked || !row.has_source() {
                reviewed.push(row.clone());
                continue;
            }

            // Earlier rows show their corrected targets, later rows their drafts.
            let local: Vec<Row> = history
                .iter()
                .chain(reviewed.iter())
                .chain(batch[i..].iter())
                .cloned()
                .collect();
            let index = history.len() + i;
            let window_text =
                ContextWindowBuilder::new(&local, window.before(), window.after()).build(index);

            let prompt = format!(
                "[CONTEXT WINDOW]\n{window_text}\n\n\
                 Please review and correct the Target for the marked segment."
            );

            match client.generate(&prompt, &options).await {
                Ok(text) => {
                    let corrected = self.glossary.enforce(&row.source, &tidy(&text));
                    reviewed.push(row.with_target(corrected));
                },
                Err(e) => {
                    warn!("Row {} review failed: {e}", row.id);
                    reviewed.push(row.clone());
                },
            }
        }

        Ok(reviewed)
    }
}

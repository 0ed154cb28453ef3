#![allow(clippy::expect_used, clippy::unwrap_used, dead_code)]

use async_trait::async_trait;
use linewise_core::config::ProcessingConfig;
use linewise_core::{GenerateOptions, GenerationClient, Generator, Processor, Result, RetryPolicy, Row};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

type Responder = dyn Fn(&str) -> Result<String> + Send + Sync;

/// Generator answering every prompt through a closure, counting calls.
#[derive(Clone)]
pub struct FnGenerator {
    respond: Arc<Responder>,
    calls: Arc<AtomicUsize>,
}

impl FnGenerator {
    pub fn new(respond: impl Fn(&str) -> Result<String> + Send + Sync + 'static) -> Self {
        Self {
            respond: Arc::new(respond),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for FnGenerator {
    async fn generate(&self, prompt: &str, _options: &GenerateOptions) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.respond)(prompt)
    }
}

pub fn client(generator: &FnGenerator, max_retries: u32) -> GenerationClient {
    GenerationClient::new(generator.clone(), RetryPolicy::immediate(max_retries))
}

pub fn processor(client: GenerationClient, batch_size: usize) -> Processor {
    let config = ProcessingConfig {
        batch_size,
        politeness_delay_ms: 0,
        ..ProcessingConfig::default()
    };
    Processor::new(client, config)
}

pub fn rows(n: usize) -> Vec<Row> {
    (0..n)
        .map(|i| Row::new(format!("R{i}"), format!("r{i}| source text {i}"), format!("draft {i}")))
        .collect()
}

/// `{"0": "<prefix> 0", ...}` for a batch of `len` rows.
pub fn index_map(len: usize, prefix: &str) -> String {
    let entries: Vec<String> = (0..len).map(|i| format!("\"{i}\": \"{prefix} {i}\"")).collect();
    format!("{{{}}}", entries.join(", "))
}

/// Number of rows listed in a segment-rewrite prompt.
pub fn rows_in_prompt(prompt: &str) -> usize {
    prompt.matches("\"index\":").count()
}

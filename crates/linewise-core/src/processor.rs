//! Batch orchestration.
//!
//! The [`Processor`] drives one run: it plans batches once, hands each batch
//! to the active [`Strategy`] in order, and appends whatever comes back to
//! the output only if it still lines up with the input. A batch that fails
//! or comes back misaligned is replaced by its original rows, so the output
//! always has exactly one row per input row, in order.
//!
//! Batches run strictly one after another. Each batch sees a bounded tail
//! of the rows already produced, which makes "what did batch N see" a
//! function of the earlier outputs only.
//!
//! ```rust,no_run
//! use linewise_core::client::{GeminiBackend, GenerationClient, RetryPolicy};
//! use linewise_core::strategy::{StrategyContext, StrategyKind, build_strategy};
//! use linewise_core::{Config, Processor, Row};
//!
//! # async fn example(rows: Vec<Row>) -> linewise_core::Result<()> {
//! let config = Config::load(None)?;
//! let backend = GeminiBackend::from_config(&config.llm)?;
//! let client = GenerationClient::new(backend, RetryPolicy::new(config.llm.max_retries));
//! let processor = Processor::new(client, config.processing.clone());
//!
//! let mut strategy = build_strategy(StrategyKind::Segment, &config);
//! processor
//!     .setup_strategy(strategy.as_mut(), &rows, &StrategyContext::default())
//!     .await;
//!
//! let outcome = processor.run(rows, strategy.as_ref(), tokio::signal::ctrl_c()).await;
//! println!("{} rows, {} fallbacks", outcome.rows.len(), outcome.report.fallbacks.len());
//! # Ok(())
//! # }
//! ```

use crate::client::GenerationClient;
use crate::config::ProcessingConfig;
use crate::segment::tiles;
use crate::strategy::{Strategy, StrategyContext};
use crate::types::{History, Row, Segment};
use crate::window::ContextWindowBuilder;
use crate::Error;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Progress callback, called with `(completed_batches, total_batches)`.
pub type ProgressCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Batches resolved for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchPlan {
    /// Batches in processing order; they tile the row range.
    pub batches: Vec<Segment>,
    /// Whether the strategy supplied the boundaries.
    pub custom: bool,
}

/// A batch whose original rows were kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchFallback {
    /// 1-based batch number.
    pub batch: usize,
    /// Rows covered.
    pub segment: Segment,
    /// What went wrong.
    pub reason: String,
}

/// Summary of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Rows in the input.
    pub total_rows: usize,
    /// Batches planned.
    pub planned_batches: usize,
    /// Whether the plan came from the strategy.
    pub custom_boundaries: bool,
    /// Batches completed (including fallbacks).
    pub processed_batches: usize,
    /// Batches that fell back to their input.
    pub fallbacks: Vec<BatchFallback>,
    /// Whether the run was stopped early.
    pub interrupted: bool,
    /// Wall-clock time spent in the batch loop.
    pub elapsed: Duration,
}

/// Rows produced by a run plus its report.
///
/// When interrupted, `rows` is an exact prefix of the input's length.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Output rows.
    pub rows: Vec<Row>,
    /// Summary.
    pub report: RunReport,
}

/// Sequential batch orchestrator.
pub struct Processor {
    client: GenerationClient,
    config: ProcessingConfig,
    progress_callback: Option<ProgressCallback>,
}

impl std::fmt::Debug for Processor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Processor")
            .field("client", &self.client)
            .field("config", &self.config)
            .field("has_progress_callback", &self.progress_callback.is_some())
            .finish()
    }
}

impl Processor {
    /// Create a processor.
    pub fn new(client: GenerationClient, config: ProcessingConfig) -> Self {
        Self {
            client,
            config,
            progress_callback: None,
        }
    }

    /// Set a progress callback.
    #[must_use]
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(usize, usize) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(callback));
        self
    }

    /// Client used for every strategy call.
    pub const fn client(&self) -> &GenerationClient {
        &self.client
    }

    /// Run strategy setup; failures are logged and the run continues.
    pub async fn setup_strategy(
        &self,
        strategy: &mut dyn Strategy,
        rows: &[Row],
        context: &StrategyContext,
    ) {
        info!("Setting up {}...", strategy.name());
        if let Err(e) = strategy.setup(&self.client, rows, context).await {
            warn!(
                "{} setup failed, continuing with defaults: {e}",
                strategy.name()
            );
        }
    }

    /// Resolve batch boundaries once for `total` rows.
    pub fn plan(&self, total: usize, strategy: &dyn Strategy) -> BatchPlan {
        if let Some(custom) = strategy.batch_boundaries(total) {
            if tiles(&custom, total) && !custom.is_empty() {
                return BatchPlan {
                    batches: custom,
                    custom: true,
                };
            }
            warn!(
                "{} boundaries do not cover rows 0..{total} exactly; using fixed batches",
                strategy.name()
            );
        }
        BatchPlan {
            batches: Segment::chunks(total, self.config.batch_size),
            custom: false,
        }
    }

    /// Process `rows` until done or until `shutdown` resolves.
    pub async fn run<F>(&self, rows: Vec<Row>, strategy: &dyn Strategy, shutdown: F) -> RunOutcome
    where
        F: Future,
    {
        let started = Instant::now();
        let plan = self.plan(rows.len(), strategy);
        let total_batches = plan.batches.len();
        info!(
            "Starting {} over {} rows in {total_batches} batches{}",
            strategy.name(),
            rows.len(),
            if plan.custom { " (semantic boundaries)" } else { "" }
        );

        let window = ContextWindowBuilder::new(
            &rows,
            self.config.context_window.before,
            self.config.context_window.after,
        );
        let mut history = History::with_capacity(rows.len());
        let mut fallbacks = Vec::new();
        let mut processed = 0;
        let mut interrupted = false;

        tokio::pin!(shutdown);

        for (n, segment) in plan.batches.iter().enumerate() {
            let number = n + 1;
            let batch = &rows[segment.range()];
            info!(
                "Processing batch {number}/{total_batches} (rows {}-{})",
                segment.start + 1,
                segment.end + 1
            );

            let result = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    interrupted = true;
                    break;
                },
                result = strategy.process_batch(
                    &self.client,
                    batch,
                    history.tail(self.config.history_window),
                    &window,
                ) => result,
            };

            let accepted = result.and_then(|output| align(batch, output));
            match accepted {
                Ok(output) => history.extend(output),
                Err(e) => {
                    error!("Batch {number} failed, keeping original rows: {e}");
                    fallbacks.push(BatchFallback {
                        batch: number,
                        segment: *segment,
                        reason: e.to_string(),
                    });
                    history.extend(batch.iter().cloned());
                },
            }
            processed += 1;
            if let Some(callback) = &self.progress_callback {
                callback(processed, total_batches);
            }

            if number < total_batches {
                tokio::select! {
                    biased;
                    _ = &mut shutdown => {
                        interrupted = true;
                        break;
                    },
                    () = tokio::time::sleep(self.config.politeness_delay()) => {},
                }
            }
        }

        if interrupted {
            warn!(
                "Interrupted after {processed}/{total_batches} batches; output covers {} of {} rows",
                history.len(),
                rows.len()
            );
        }

        let elapsed = started.elapsed();
        info!("Processing finished in {:.2}s", elapsed.as_secs_f64());

        RunOutcome {
            report: RunReport {
                total_rows: rows.len(),
                planned_batches: total_batches,
                custom_boundaries: plan.custom,
                processed_batches: processed,
                fallbacks,
                interrupted,
                elapsed,
            },
            rows: history.into_rows(),
        }
    }

    /// Process all rows with no interruption source.
    pub async fn run_to_completion(&self, rows: Vec<Row>, strategy: &dyn Strategy) -> RunOutcome {
        self.run(rows, strategy, std::future::pending::<()>()).await
    }
}

/// Accept `output` for `input` only if it lines up row for row.
///
/// Locked rows are restored and sources are pinned to the input.
fn align(input: &[Row], mut output: Vec<Row>) -> crate::Result<Vec<Row>> {
    if output.len() != input.len() {
        return Err(Error::RowCountMismatch {
            expected: input.len(),
            actual: output.len(),
        });
    }
    if let Some((pos, (i, o))) = input
        .iter()
        .zip(&output)
        .enumerate()
        .find(|(_, (i, o))| i.id != o.id)
    {
        return Err(Error::Other(format!(
            "row {pos} out of order: expected id '{}', got '{}'",
            i.id, o.id
        )));
    }

    for (original, row) in input.iter().zip(output.iter_mut()) {
        if original.locked && row.target != original.target {
            warn!("Locked row {} was modified; restoring", original.id);
            *row = original.clone();
        } else if row.source != original.source {
            debug!("Row {} source was modified; restoring", original.id);
            row.source.clone_from(&original.source);
        }
    }
    Ok(output)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::client::RetryPolicy;
    use crate::client::testing::ScriptedGenerator;
    use crate::Result;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Uppercases targets; can be told to misbehave on given batch numbers.
    #[derive(Default)]
    struct TestStrategy {
        boundaries: Option<Vec<Segment>>,
        fail_on: Vec<usize>,
        drop_row_on: Vec<usize>,
        calls: AtomicUsize,
        seen_history: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl Strategy for TestStrategy {
        fn name(&self) -> &'static str {
            "TestStrategy"
        }

        async fn setup(&mut self, _: &GenerationClient, _: &[Row], _: &StrategyContext) -> Result<()> {
            Err(Error::Other("setup always fails here".to_string()))
        }

        fn batch_boundaries(&self, _total: usize) -> Option<Vec<Segment>> {
            self.boundaries.clone()
        }

        async fn process_batch(
            &self,
            _client: &GenerationClient,
            batch: &[Row],
            history: &[Row],
            _window: &ContextWindowBuilder<'_>,
        ) -> Result<Vec<Row>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.seen_history
                .lock()
                .unwrap()
                .push(history.iter().map(|r| r.target.clone()).collect());
            if self.fail_on.contains(&n) {
                return Err(Error::Other(format!("batch {n} exploded")));
            }
            let mut out: Vec<Row> = batch
                .iter()
                .map(|r| r.with_target(r.source.to_uppercase()))
                .collect();
            if self.drop_row_on.contains(&n) {
                out.pop();
            }
            Ok(out)
        }
    }

    fn rows(n: usize) -> Vec<Row> {
        (0..n)
            .map(|i| Row::new(format!("id{i}"), format!("row {i}"), String::new()))
            .collect()
    }

    fn processor(batch_size: usize) -> Processor {
        let client = GenerationClient::new(ScriptedGenerator::new(), RetryPolicy::immediate(1));
        let config = ProcessingConfig {
            batch_size,
            politeness_delay_ms: 0,
            history_window: 2,
            ..ProcessingConfig::default()
        };
        Processor::new(client, config)
    }

    #[test]
    fn test_plan_uses_fixed_chunks_without_boundaries() {
        let plan = processor(2).plan(5, &TestStrategy::default());
        assert!(!plan.custom);
        assert_eq!(plan.batches.len(), 3);
    }

    #[test]
    fn test_plan_rejects_non_tiling_boundaries() {
        let strategy = TestStrategy {
            boundaries: Some(vec![Segment::new(0, 1), Segment::new(3, 4)]),
            ..TestStrategy::default()
        };
        let plan = processor(10).plan(5, &strategy);
        assert!(!plan.custom);
        assert_eq!(plan.batches, vec![Segment::new(0, 4)]);

        let strategy = TestStrategy {
            boundaries: Some(vec![Segment::new(0, 0), Segment::new(1, 4)]),
            ..TestStrategy::default()
        };
        assert!(processor(10).plan(5, &strategy).custom);
    }

    #[tokio::test]
    async fn test_failed_and_misaligned_batches_fall_back() {
        let strategy = TestStrategy {
            fail_on: vec![2],
            drop_row_on: vec![3],
            ..TestStrategy::default()
        };
        let input = rows(7);
        let outcome = processor(2).run_to_completion(input.clone(), &strategy).await;

        assert_eq!(outcome.rows.len(), 7);
        let targets: Vec<&str> = outcome.rows.iter().map(|r| r.target.as_str()).collect();
        assert_eq!(targets, vec!["ROW 0", "ROW 1", "", "", "", "", "ROW 6"]);
        assert_eq!(outcome.report.fallbacks.len(), 2);
        assert_eq!(outcome.report.fallbacks[0].batch, 2);
        assert!(outcome.report.fallbacks[1].reason.contains("expected 2, got 1"));
        assert_eq!(outcome.report.processed_batches, 4);
        assert!(!outcome.report.interrupted);
    }

    #[tokio::test]
    async fn test_history_tail_is_bounded_and_ordered() {
        let strategy = TestStrategy::default();
        processor(1).run_to_completion(rows(4), &strategy).await;

        let seen = strategy.seen_history.lock().unwrap().clone();
        assert_eq!(seen[0], Vec::<String>::new());
        assert_eq!(seen[1], vec!["ROW 0"]);
        assert_eq!(seen[3], vec!["ROW 1", "ROW 2"]);
    }

    #[test]
    fn test_align_restores_locked_rows_and_rejects_reordering() {
        let input = vec![
            Row::new("a", "x", "keep").with_locked(true),
            Row::new("b", "y", ""),
        ];
        let output = vec![input[0].with_target("changed"), input[1].with_target("new")];
        let aligned = align(&input, output).unwrap();
        assert_eq!(aligned[0].target, "keep");
        assert_eq!(aligned[1].target, "new");

        let swapped = vec![input[1].clone(), input[0].clone()];
        assert!(align(&input, swapped).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_during_delay_keeps_prefix() {
        let client = GenerationClient::new(ScriptedGenerator::new(), RetryPolicy::immediate(1));
        let config = ProcessingConfig {
            batch_size: 2,
            politeness_delay_ms: 1000,
            ..ProcessingConfig::default()
        };
        let processor = Processor::new(client, config);
        let strategy = TestStrategy::default();

        let shutdown = tokio::time::sleep(Duration::from_millis(1500));
        let outcome = processor.run(rows(6), &strategy, shutdown).await;

        assert!(outcome.report.interrupted);
        assert_eq!(outcome.report.processed_batches, 2);
        assert_eq!(outcome.rows.len(), 4);
        assert_eq!(outcome.rows[3].target, "ROW 3");
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_delay_after_last_batch() {
        let client = GenerationClient::new(ScriptedGenerator::new(), RetryPolicy::immediate(1));
        let config = ProcessingConfig {
            batch_size: 2,
            politeness_delay_ms: 500,
            ..ProcessingConfig::default()
        };
        let outcome = Processor::new(client, config)
            .run_to_completion(rows(6), &TestStrategy::default())
            .await;
        // Two delays between three batches.
        assert!(outcome.report.elapsed >= Duration::from_millis(1000));
        assert!(outcome.report.elapsed < Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn test_setup_failure_is_swallowed_and_progress_reported() {
        let progress = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&progress);
        let processor = processor(3).with_progress(move |done, total| {
            sink.lock().unwrap().push((done, total));
        });

        let mut strategy = TestStrategy::default();
        let input = rows(5);
        processor
            .setup_strategy(&mut strategy, &input, &StrategyContext::default())
            .await;
        let outcome = processor.run_to_completion(input, &strategy).await;

        assert_eq!(outcome.rows.len(), 5);
        assert_eq!(*progress.lock().unwrap(), vec![(1, 2), (2, 2)]);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let outcome = processor(3)
            .run_to_completion(Vec::new(), &TestStrategy::default())
            .await;
        assert!(outcome.rows.is_empty());
        assert_eq!(outcome.report.planned_batches, 0);
    }
}

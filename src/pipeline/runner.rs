//! Batched, concurrent execution of a single stage.
//!
//! The `StageRunner` partitions a stage's input into contiguous batches and
//! either processes them in order on the calling task, or dispatches them to
//! a pool of worker tasks pulling from a shared queue.
//!
//! # Guarantees
//!
//! - Empty input invokes the stage exactly once with an empty batch.
//! - With one worker, output is the concatenation of batch outputs in order.
//! - With several workers, output order follows batch completion unless the
//!   plan is `ordered`.
//! - Any batch failure discards all output; the first recorded error wins.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::FutureExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::StageError;
use crate::record::Record;
use crate::stage::{Stage, StageSpec};

/// Errors that can occur while running a stage.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// A batch transform returned an error.
    #[error("Stage '{stage}' failed on batch {batch}/{batches}{}: {source}", worker_suffix(.worker))]
    BatchFailed {
        stage: String,
        /// 1-based index of the failing batch.
        batch: usize,
        batches: usize,
        worker: Option<usize>,
        #[source]
        source: StageError,
    },

    /// The caller's cancellation token fired between batches.
    #[error("Stage '{stage}' cancelled{}", worker_suffix(.worker))]
    Cancelled { stage: String, worker: Option<usize> },

    /// The stage panicked while processing a batch.
    #[error("Stage '{stage}' panicked{}: {message}", worker_suffix(.worker))]
    WorkerPanicked {
        stage: String,
        worker: Option<usize>,
        message: String,
    },
}

fn worker_suffix(worker: &Option<usize>) -> String {
    match worker {
        Some(id) => format!(" (worker {})", id),
        None => String::new(),
    }
}

/// Batching and concurrency parameters for one stage run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchPlan {
    /// Number of workers; 0 means 1.
    pub concurrency: usize,
    /// Records per batch; 0 means the whole input as one batch.
    pub batch_size: usize,
    /// Re-sort concurrent output by batch index.
    pub ordered: bool,
}

impl BatchPlan {
    /// Creates a plan with the given concurrency and batch size.
    pub fn new(concurrency: usize, batch_size: usize) -> Self {
        Self {
            concurrency,
            batch_size,
            ordered: false,
        }
    }

    /// Takes the plan declared on a stage spec.
    pub fn from_spec(spec: &StageSpec) -> Self {
        Self {
            concurrency: spec.concurrency,
            batch_size: spec.batch_size,
            ordered: spec.ordered,
        }
    }

    /// Sets ordered output for the concurrent path.
    pub fn with_ordered(mut self, ordered: bool) -> Self {
        self.ordered = ordered;
        self
    }

    /// Effective `(concurrency, batch_size)` for an input of `items` records.
    ///
    /// Both values are at least 1.
    pub fn normalize(&self, items: usize) -> (usize, usize) {
        let concurrency = self.concurrency.max(1);
        let batch_size = if self.batch_size >= 1 {
            self.batch_size
        } else {
            items.max(1)
        };
        (concurrency, batch_size)
    }
}

/// Records produced by a stage run.
#[derive(Debug, Clone, Default)]
pub struct StageOutput {
    pub records: Vec<Record>,
    /// Number of batches dispatched to the stage.
    pub batches: usize,
}

/// Executes one stage over one record set.
///
/// A fresh worker pool is created for every concurrent run and torn down
/// before `run` returns.
#[derive(Debug, Clone, Copy)]
pub struct StageRunner {
    fail_fast: bool,
}

impl Default for StageRunner {
    fn default() -> Self {
        Self { fail_fast: true }
    }
}

impl StageRunner {
    /// Creates a runner that stops sibling workers on the first failure.
    pub fn new() -> Self {
        Self::default()
    }

    /// Controls whether a failing worker stops its siblings.
    ///
    /// With `false`, remaining workers keep draining the queue after a
    /// failure; their output is still discarded.
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Runs `stage` over `records` according to `plan`.
    ///
    /// # Errors
    ///
    /// Returns the first `RunnerError` recorded by any batch or worker. No
    /// partial output is ever returned alongside an error.
    pub async fn run(
        &self,
        stage: Arc<dyn Stage>,
        records: Vec<Record>,
        plan: BatchPlan,
        cancel: &CancellationToken,
    ) -> Result<StageOutput, RunnerError> {
        let stage_name = stage.name().to_string();

        if records.is_empty() {
            debug!(stage = %stage_name, "No input, invoking stage once with an empty batch");
            let output = process_caught(&*stage, cancel, Vec::new())
                .await
                .map_err(|message| RunnerError::WorkerPanicked {
                    stage: stage_name.clone(),
                    worker: None,
                    message,
                })?
                .map_err(|source| RunnerError::BatchFailed {
                    stage: stage_name.clone(),
                    batch: 1,
                    batches: 1,
                    worker: None,
                    source,
                })?;
            return Ok(StageOutput {
                records: output,
                batches: 1,
            });
        }

        let items = records.len();
        let (concurrency, batch_size) = plan.normalize(items);
        let batches = partition(records, batch_size);
        let total = batches.len();

        info!(
            stage = %stage_name,
            items = items,
            batches = total,
            batch_size = batch_size,
            concurrency = concurrency,
            "Running stage"
        );
        let start = Instant::now();

        let records = if concurrency == 1 {
            self.run_sequential(&stage, &stage_name, batches, cancel)
                .await?
        } else {
            self.run_concurrent(&stage, &stage_name, batches, concurrency, plan.ordered, cancel)
                .await?
        };

        info!(
            stage = %stage_name,
            output_items = records.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Stage finished"
        );

        Ok(StageOutput {
            records,
            batches: total,
        })
    }

    async fn run_sequential(
        &self,
        stage: &Arc<dyn Stage>,
        stage_name: &str,
        batches: Vec<Vec<Record>>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Record>, RunnerError> {
        let total = batches.len();
        let mut output = Vec::new();

        for (index, batch) in batches.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(RunnerError::Cancelled {
                    stage: stage_name.to_string(),
                    worker: None,
                });
            }

            let input_items = batch.len();
            let produced = process_caught(&**stage, cancel, batch)
                .await
                .map_err(|message| {
                    error!(
                        stage = %stage_name,
                        batch = index + 1,
                        error = %message,
                        "Stage panicked"
                    );
                    RunnerError::WorkerPanicked {
                        stage: stage_name.to_string(),
                        worker: None,
                        message,
                    }
                })?
                .map_err(|source| RunnerError::BatchFailed {
                    stage: stage_name.to_string(),
                    batch: index + 1,
                    batches: total,
                    worker: None,
                    source,
                })?;

            debug!(
                stage = %stage_name,
                batch = index + 1,
                input_items = input_items,
                output_items = produced.len(),
                "Batch processed"
            );
            output.extend(produced);
        }

        Ok(output)
    }

    async fn run_concurrent(
        &self,
        stage: &Arc<dyn Stage>,
        stage_name: &str,
        batches: Vec<Vec<Record>>,
        concurrency: usize,
        ordered: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<Record>, RunnerError> {
        let total = batches.len();
        let queue = Arc::new(Mutex::new(
            batches.into_iter().enumerate().collect::<VecDeque<_>>(),
        ));
        let results = Arc::new(Mutex::new(Vec::with_capacity(total)));
        // Each worker reports at most one error.
        let (error_tx, mut error_rx) = mpsc::channel(concurrency);
        let siblings = cancel.child_token();

        let handles: Vec<_> = (0..concurrency)
            .map(|id| {
                let worker = BatchWorker {
                    id,
                    stage: Arc::clone(stage),
                    stage_name: stage_name.to_string(),
                    total,
                    queue: Arc::clone(&queue),
                    results: Arc::clone(&results),
                    errors: error_tx.clone(),
                    cancel: cancel.clone(),
                    siblings: siblings.clone(),
                    fail_fast: self.fail_fast,
                };
                tokio::spawn(worker.run())
            })
            .collect();
        drop(error_tx);

        let joined = futures::future::join_all(handles).await;

        let mut errors = Vec::new();
        while let Ok(err) = error_rx.try_recv() {
            errors.push(err);
        }
        for (id, outcome) in joined.into_iter().enumerate() {
            if let Err(join_err) = outcome {
                error!(stage = %stage_name, worker = id, error = %join_err, "Worker task failed");
                let message = if join_err.is_panic() {
                    panic_message(join_err.into_panic())
                } else {
                    "worker task was aborted".to_string()
                };
                errors.push(RunnerError::WorkerPanicked {
                    stage: stage_name.to_string(),
                    worker: Some(id),
                    message,
                });
            }
        }

        if !errors.is_empty() {
            if errors.len() > 1 {
                warn!(
                    stage = %stage_name,
                    suppressed = errors.len() - 1,
                    "Multiple workers failed, returning the first error"
                );
            }
            return Err(errors.swap_remove(0));
        }

        let mut completed = std::mem::take(&mut *results.lock().expect("results lock poisoned"));
        if ordered {
            completed.sort_by_key(|(index, _)| *index);
        }

        Ok(completed
            .into_iter()
            .flat_map(|(_, records)| records)
            .collect())
    }
}

/// One worker of a concurrent stage run.
struct BatchWorker {
    id: usize,
    stage: Arc<dyn Stage>,
    stage_name: String,
    total: usize,
    queue: Arc<Mutex<VecDeque<(usize, Vec<Record>)>>>,
    results: Arc<Mutex<Vec<(usize, Vec<Record>)>>>,
    errors: mpsc::Sender<RunnerError>,
    /// Caller's token.
    cancel: CancellationToken,
    /// Stage-scoped child token, cancelled on the first failure.
    siblings: CancellationToken,
    fail_fast: bool,
}

impl BatchWorker {
    async fn run(self) {
        debug!(stage = %self.stage_name, worker = self.id, "Worker started");

        loop {
            if self.cancel.is_cancelled() {
                self.report(RunnerError::Cancelled {
                    stage: self.stage_name.clone(),
                    worker: Some(self.id),
                });
                break;
            }
            if self.siblings.is_cancelled() {
                debug!(
                    stage = %self.stage_name,
                    worker = self.id,
                    "Stopping after sibling failure"
                );
                break;
            }

            let next = self
                .queue
                .lock()
                .expect("batch queue lock poisoned")
                .pop_front();
            let Some((index, batch)) = next else {
                break;
            };

            let input_items = batch.len();
            match self.stage.process(&self.siblings, batch).await {
                Ok(produced) => {
                    debug!(
                        stage = %self.stage_name,
                        worker = self.id,
                        batch = index + 1,
                        input_items = input_items,
                        output_items = produced.len(),
                        "Batch processed"
                    );
                    self.results
                        .lock()
                        .expect("results lock poisoned")
                        .push((index, produced));
                }
                Err(source) => {
                    error!(
                        stage = %self.stage_name,
                        worker = self.id,
                        batch = index + 1,
                        error = %source,
                        "Batch failed"
                    );
                    self.report(RunnerError::BatchFailed {
                        stage: self.stage_name.clone(),
                        batch: index + 1,
                        batches: self.total,
                        worker: Some(self.id),
                        source,
                    });
                    if self.fail_fast {
                        self.siblings.cancel();
                    }
                    break;
                }
            }
        }

        debug!(stage = %self.stage_name, worker = self.id, "Worker stopped");
    }

    fn report(&self, err: RunnerError) {
        if self.errors.try_send(err).is_err() {
            warn!(stage = %self.stage_name, worker = self.id, "Dropped worker error report");
        }
    }
}

/// Splits `records` into contiguous batches of at most `batch_size` records.
///
/// Order is preserved; the final batch may be shorter. A `batch_size` of 0
/// is treated as 1.
pub fn partition(records: Vec<Record>, batch_size: usize) -> Vec<Vec<Record>> {
    let batch_size = batch_size.max(1);
    let mut batches = Vec::with_capacity(records.len().div_ceil(batch_size));
    let mut iter = records.into_iter().peekable();
    while iter.peek().is_some() {
        batches.push(iter.by_ref().take(batch_size).collect());
    }
    batches
}

/// Runs one `process` call, turning a panic into its message.
async fn process_caught(
    stage: &dyn Stage,
    cancel: &CancellationToken,
    batch: Vec<Record>,
) -> Result<Result<Vec<Record>, StageError>, String> {
    AssertUnwindSafe(stage.process(cancel, batch))
        .catch_unwind()
        .await
        .map_err(panic_message)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

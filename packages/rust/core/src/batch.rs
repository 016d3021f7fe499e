//! Batch runs: ordered commit, failure budget, and the status machine.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::field::{Empty, display};
use tracing::{Span, debug, info, instrument, warn};

use enrichflow_mapping::OutputRecord;
use enrichflow_shared::{EnrichflowError, FailureLimit, PipelineOptions, Result, RunId};
use enrichflow_skills::SkillInvoker;

use crate::pipeline::{
    DocumentFailure, DocumentOutcome, DocumentWarning, FailureReason, Pipeline, PipelineResult,
    PipelineRunner, SourceDocument,
};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    NotStarted,
    Running,
    Succeeded,
    Failed,
    /// Reset after a previous run; ready to run again.
    ResetPending,
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NotStarted => "not started",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::ResetPending => "reset pending",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum AbortReason {
    BudgetExceeded { failed: usize, limit: FailureLimit },
    Cancelled,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BudgetExceeded { failed, limit } => {
                write!(f, "{failed} failed documents exceed the limit of {limit}")
            }
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Why and where a batch stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchAbort {
    #[serde(flatten)]
    pub reason: AbortReason,
    /// Position of the last committed document, if any.
    pub after_position: Option<usize>,
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

/// Outcome of one batch run.
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub run_id: RunId,
    pub graph_digest: String,
    pub status: BatchStatus,

    /// Succeeded and partially failed records, in input order.
    pub records: Vec<OutputRecord>,
    pub failures: Vec<DocumentFailure>,
    /// Warnings of the partially failed documents.
    pub warnings: Vec<DocumentWarning>,

    pub succeeded: usize,
    pub partially_failed: usize,
    pub failed: usize,
    /// Documents committed before the batch finished or aborted.
    pub processed: usize,
    pub unprocessed: usize,

    pub abort: Option<BatchAbort>,
    pub elapsed: Duration,
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callbacks for a batch.
pub trait BatchProgress: Send + Sync {
    fn status_changed(&self, status: BatchStatus);

    /// Called as each document is committed, in input order.
    fn document_finished(&self, result: &PipelineResult, processed: usize, total: usize);
}

/// No-op progress reporter.
pub struct SilentBatchProgress;

impl BatchProgress for SilentBatchProgress {
    fn status_changed(&self, _status: BatchStatus) {}
    fn document_finished(&self, _result: &PipelineResult, _processed: usize, _total: usize) {}
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Runs batches of documents through one pipeline.
///
/// ```text
/// NotStarted --run--> Running --> Succeeded | Failed
/// Succeeded | Failed --reset--> ResetPending --run--> Running
/// ```
pub struct BatchController {
    pipeline: Arc<Pipeline>,
    invoker: Arc<dyn SkillInvoker>,
    options: PipelineOptions,
    progress: Arc<dyn BatchProgress>,
    status: Mutex<BatchStatus>,
    cancel: Mutex<CancellationToken>,
    last: Mutex<Option<BatchResult>>,
}

impl BatchController {
    pub fn new(pipeline: Arc<Pipeline>, invoker: Arc<dyn SkillInvoker>, options: PipelineOptions) -> Self {
        Self {
            pipeline,
            invoker,
            options,
            progress: Arc::new(SilentBatchProgress),
            status: Mutex::new(BatchStatus::NotStarted),
            cancel: Mutex::new(CancellationToken::new()),
            last: Mutex::new(None),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn BatchProgress>) -> Self {
        self.progress = progress;
        self
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn status(&self) -> BatchStatus {
        *lock(&self.status)
    }

    /// Result of the most recent finished run, until the next reset.
    pub fn last_result(&self) -> Option<BatchResult> {
        lock(&self.last).clone()
    }

    /// Cancel the running batch. In-flight documents are discarded.
    pub fn cancel(&self) {
        lock(&self.cancel).cancel();
    }

    /// Make a finished controller runnable again and drop its last result.
    pub fn reset(&self) -> Result<()> {
        {
            let mut status = lock(&self.status);
            if *status == BatchStatus::Running {
                return Err(EnrichflowError::invalid_state("cannot reset a running batch"));
            }
            *status = BatchStatus::ResetPending;
        }
        lock(&self.last).take();
        self.progress.status_changed(BatchStatus::ResetPending);
        Ok(())
    }

    /// Run `documents` to completion, or until the document budget is
    /// exceeded or the batch is cancelled.
    ///
    /// Results are committed in input order, so the outcome matches a
    /// sequential run whatever the concurrency.
    #[instrument(skip_all, fields(run_id = Empty, documents = Empty))]
    pub async fn run_batch<I>(&self, documents: I) -> Result<BatchResult>
    where
        I: IntoIterator<Item = SourceDocument>,
    {
        let cancel = self.begin()?;
        let mut guard = RunningGuard {
            controller: self,
            armed: true,
        };

        let documents: Vec<SourceDocument> = documents.into_iter().collect();
        let run_id = RunId::new();
        let span = Span::current();
        span.record("run_id", display(run_id));
        span.record("documents", documents.len());

        let mut batch = Batch::new(run_id, self.pipeline.digest(), documents.len(), self.options);
        info!(
            %run_id,
            documents = batch.total,
            digest = %batch.graph_digest,
            workers = self.options.document_workers(),
            "starting batch"
        );

        self.schedule(documents, &cancel, &mut batch).await;

        let status = if batch.abort.is_some() {
            BatchStatus::Failed
        } else {
            BatchStatus::Succeeded
        };
        let result = batch.finish(status);
        info!(
            %run_id,
            documents = result.processed + result.unprocessed,
            succeeded = result.succeeded,
            partially_failed = result.partially_failed,
            failed = result.failed,
            unprocessed = result.unprocessed,
            elapsed_ms = result.elapsed.as_millis(),
            %status,
            "batch finished"
        );

        *lock(&self.last) = Some(result.clone());
        guard.armed = false;
        self.set_status(status);
        Ok(result)
    }

    /// Enter `Running` and hand out a fresh cancellation token.
    fn begin(&self) -> Result<CancellationToken> {
        {
            let mut status = lock(&self.status);
            match *status {
                BatchStatus::NotStarted | BatchStatus::ResetPending => {
                    *status = BatchStatus::Running;
                }
                other => {
                    return Err(EnrichflowError::invalid_state(format!(
                        "cannot run a batch while {other}; reset first"
                    )));
                }
            }
        }
        let token = CancellationToken::new();
        *lock(&self.cancel) = token.clone();
        self.progress.status_changed(BatchStatus::Running);
        Ok(token)
    }

    fn set_status(&self, status: BatchStatus) {
        *lock(&self.status) = status;
        self.progress.status_changed(status);
    }

    /// Dispatch documents to a bounded set of tasks and commit their results
    /// in input order.
    async fn schedule(&self, documents: Vec<SourceDocument>, cancel: &CancellationToken, batch: &mut Batch) {
        let limiter = Arc::new(Semaphore::new(self.options.concurrency_limit.max(1)));
        let runner = PipelineRunner::with_limiter(
            Arc::clone(&self.pipeline),
            Arc::clone(&self.invoker),
            self.options,
            limiter,
        );
        let workers = self.options.document_workers();
        // Budget aborts cancel only this batch's runs.
        let runs = cancel.child_token();

        let mut queue = documents.into_iter().enumerate();
        let mut tasks = JoinSet::new();
        let mut in_flight: HashMap<tokio::task::Id, (usize, String)> = HashMap::new();
        let mut buffered: BTreeMap<usize, PipelineResult> = BTreeMap::new();

        loop {
            while tasks.len() < workers && !runs.is_cancelled() {
                let Some((position, document)) = queue.next() else {
                    break;
                };
                let id = document.id.clone().unwrap_or_else(|| position.to_string());
                let runner = runner.clone();
                let token = runs.clone();
                let handle = tasks.spawn(async move { runner.run(document, position, &token).await });
                in_flight.insert(handle.id(), (position, id));
            }

            let Some(joined) = tasks.join_next_with_id().await else {
                break;
            };
            if cancel.is_cancelled() {
                batch.abort(AbortReason::Cancelled);
                break;
            }

            let result = match joined {
                Ok((task_id, result)) => {
                    in_flight.remove(&task_id);
                    result
                }
                Err(e) => {
                    let Some((position, document_id)) = in_flight.remove(&e.id()) else {
                        continue;
                    };
                    warn!(position, %document_id, error = %e, "document task failed");
                    PipelineResult {
                        document_id: document_id.clone(),
                        position,
                        outcome: DocumentOutcome::Failed(DocumentFailure {
                            document_id,
                            position,
                            reason: FailureReason::Execution {
                                message: e.to_string(),
                            },
                            warnings: Vec::new(),
                        }),
                    }
                }
            };
            buffered.insert(result.position, result);

            while let Some(result) = buffered.remove(&batch.processed) {
                batch.commit(result, self.progress.as_ref());
                if batch.abort.is_some() {
                    break;
                }
            }
            if batch.abort.is_some() {
                break;
            }
        }

        // A cancel landing between a commit and the next dispatch empties
        // the set without being seen above.
        if cancel.is_cancelled() && batch.abort.is_none() && batch.processed < batch.total {
            batch.abort(AbortReason::Cancelled);
        }

        if batch.abort.is_some() {
            runs.cancel();
            tasks.abort_all();
            debug!(discarded = tasks.len() + buffered.len(), "discarding in-flight documents");
        }
    }
}

impl std::fmt::Debug for BatchController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchController")
            .field("pipeline", &self.pipeline.name())
            .field("options", &self.options)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

/// Marks the controller `Failed` if a run is dropped before it finishes.
struct RunningGuard<'a> {
    controller: &'a BatchController,
    armed: bool,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.controller.set_status(BatchStatus::Failed);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Accumulator
// ---------------------------------------------------------------------------

struct Batch {
    run_id: RunId,
    graph_digest: String,
    total: usize,
    limit: FailureLimit,
    started: Instant,

    records: Vec<OutputRecord>,
    failures: Vec<DocumentFailure>,
    warnings: Vec<DocumentWarning>,
    succeeded: usize,
    partially_failed: usize,
    processed: usize,
    abort: Option<BatchAbort>,
}

impl Batch {
    fn new(run_id: RunId, graph_digest: &str, total: usize, options: PipelineOptions) -> Self {
        Self {
            run_id,
            graph_digest: graph_digest.to_string(),
            total,
            limit: options.max_failed_documents,
            started: Instant::now(),
            records: Vec::new(),
            failures: Vec::new(),
            warnings: Vec::new(),
            succeeded: 0,
            partially_failed: 0,
            processed: 0,
            abort: None,
        }
    }

    fn last_position(&self) -> Option<usize> {
        self.processed.checked_sub(1)
    }

    fn abort(&mut self, reason: AbortReason) {
        let abort = BatchAbort {
            reason,
            after_position: self.last_position(),
        };
        warn!(run_id = %self.run_id, %reason, after_position = ?abort.after_position, "batch aborted");
        self.abort = Some(abort);
    }

    /// Commit the next result in input order.
    fn commit(&mut self, result: PipelineResult, progress: &dyn BatchProgress) {
        self.processed += 1;
        progress.document_finished(&result, self.processed, self.total);

        match result.outcome {
            DocumentOutcome::Succeeded(record) => {
                self.succeeded += 1;
                self.records.push(record);
            }
            DocumentOutcome::PartiallyFailed { record, warnings } => {
                self.partially_failed += 1;
                self.records.push(record);
                self.warnings.extend(warnings);
            }
            DocumentOutcome::Failed(failure) => {
                self.failures.push(failure);
                let failed = self.failures.len();
                if self.limit.is_exceeded_by(failed) {
                    self.abort(AbortReason::BudgetExceeded {
                        failed,
                        limit: self.limit,
                    });
                }
            }
        }
    }

    fn finish(self, status: BatchStatus) -> BatchResult {
        BatchResult {
            run_id: self.run_id,
            graph_digest: self.graph_digest,
            status,
            failed: self.failures.len(),
            records: self.records,
            failures: self.failures,
            warnings: self.warnings,
            succeeded: self.succeeded,
            partially_failed: self.partially_failed,
            processed: self.processed,
            unprocessed: self.total - self.processed,
            abort: self.abort,
            elapsed: self.started.elapsed(),
        }
    }
}

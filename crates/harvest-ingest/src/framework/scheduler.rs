//! Batch scheduler
//!
//! A fixed pool of `min(max_concurrent, batches)` workers pulls batches
//! from a shared queue in partition order. Each attempt runs in its own
//! task, so a panic, error or timeout inside the harvester fails that batch
//! and nothing else. Completion order is free; counters are commutative.
//!
//! Cancellation stops dispatch at once. In graceful mode running batches
//! finish normally. In hard mode the harvester's abort token fires as
//! well, and whatever outcome it then reports is recorded.

use super::harvester::{HarvestOutcome, Harvester, HarvesterFailure, RecordSink};
use super::pipeline::IngestionPipeline;
use crate::config::{CancelMode, PersistStrategy, RetryPolicy, SchedulerConfig};
use crate::Result;
use harvest_common::types::{Batch, RunStats};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct BatchScheduler {
    config: SchedulerConfig,
    persist: PersistStrategy,
}

struct RunContext {
    queue: Mutex<VecDeque<Arc<Batch>>>,
    harvester: Arc<dyn Harvester>,
    pipeline: Arc<IngestionPipeline>,
    cancel: CancellationToken,
    /// Handed to harvesters; only fires on a hard cancel
    abort: CancellationToken,
    active: AtomicU64,
    timeout: Option<Duration>,
    retry: RetryPolicy,
    persist: PersistStrategy,
}

impl BatchScheduler {
    pub fn new(config: SchedulerConfig, persist: PersistStrategy) -> Self {
        Self { config, persist }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Run every batch through `harvester`, feeding records to `pipeline`.
    ///
    /// Resolves once every dispatched batch is terminal. The returned
    /// stats are the pipeline's counters, so use one pipeline per run.
    /// Only configuration problems are errors; batch failures are counted.
    pub async fn run(
        &self,
        batches: Vec<Batch>,
        harvester: Arc<dyn Harvester>,
        pipeline: Arc<IngestionPipeline>,
        cancel: CancellationToken,
    ) -> Result<RunStats> {
        self.config.validate()?;

        let total = batches.len();
        let workers = self.config.max_concurrent.min(total);
        let abort = match self.config.cancel_mode {
            CancelMode::Hard => cancel.child_token(),
            CancelMode::Graceful => CancellationToken::new(),
        };

        tracing::info!(
            harvester = harvester.name(),
            batches = total,
            workers = workers,
            cancel_mode = ?self.config.cancel_mode,
            "Starting batch run"
        );

        let ctx = Arc::new(RunContext {
            queue: Mutex::new(batches.into_iter().map(Arc::new).collect()),
            harvester,
            pipeline: pipeline.clone(),
            cancel,
            abort,
            active: AtomicU64::new(0),
            timeout: self.config.batch_timeout(),
            retry: self.config.retry.clone(),
            persist: self.persist,
        });

        let started = Instant::now();
        let mut set = JoinSet::new();
        for worker in 0..workers {
            let ctx = ctx.clone();
            set.spawn(async move { ctx.work(worker).await });
        }
        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Scheduler worker terminated abnormally");
            }
        }

        let skipped = ctx.queue.lock().unwrap_or_else(|e| e.into_inner()).len() as u64;
        let counters = pipeline.counters();
        if skipped > 0 {
            counters.batches_skipped(skipped);
            tracing::warn!(skipped = skipped, "Run cancelled before all batches were dispatched");
        }

        let stats = counters.snapshot();
        tracing::info!(
            harvester = ctx.harvester.name(),
            batches_succeeded = stats.batches_succeeded,
            batches_failed = stats.batches_failed,
            batches_skipped = stats.batches_skipped,
            items_saved = stats.items_saved,
            items_duplicate = stats.items_duplicate,
            items_failed = stats.items_failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Batch run finished"
        );
        Ok(stats)
    }
}

impl RunContext {
    fn next_batch(&self) -> Option<Arc<Batch>> {
        if self.cancel.is_cancelled() {
            return None;
        }
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).pop_front()
    }

    async fn work(&self, worker: usize) {
        let counters = self.pipeline.counters();
        while let Some(batch) = self.next_batch() {
            let active = self.active.fetch_add(1, Ordering::AcqRel) + 1;
            counters.observe_concurrency(active);

            tracing::debug!(worker = worker, batch = batch.index, units = batch.len(), "Batch dispatched");
            let started = Instant::now();
            let result = self.execute(&batch).await;
            self.active.fetch_sub(1, Ordering::AcqRel);

            match result {
                Ok(outcome) => {
                    counters.batch_succeeded();
                    tracing::info!(
                        batch = batch.index,
                        emitted = outcome.emitted,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Batch succeeded"
                    );
                },
                Err(failure) => {
                    counters.batch_failed();
                    tracing::warn!(
                        batch = batch.index,
                        units = ?batch.unit_ids().collect::<Vec<_>>(),
                        reason = %failure,
                        "Batch failed"
                    );
                },
            }
        }
    }

    /// Run a batch under the retry policy
    async fn execute(&self, batch: &Arc<Batch>) -> std::result::Result<HarvestOutcome, HarvesterFailure> {
        let mut attempt = 1;
        loop {
            let failure = match self.attempt(batch).await {
                Ok(outcome) => return Ok(outcome),
                Err(failure) => failure,
            };

            let retryable = attempt < self.retry.max_attempts
                && !self.cancel.is_cancelled()
                && !matches!(failure, HarvesterFailure::Aborted { .. });
            if !retryable {
                return Err(failure);
            }

            let delay = self.retry.backoff(attempt);
            tracing::info!(
                batch = batch.index,
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                reason = %failure,
                "Retrying batch"
            );
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(failure),
                _ = tokio::time::sleep(delay) => {},
            }
            attempt += 1;
        }
    }

    /// One harvester call in its own task, bounded by the batch timeout
    async fn attempt(&self, batch: &Arc<Batch>) -> std::result::Result<HarvestOutcome, HarvesterFailure> {
        let sink = Arc::new(RecordSink::new(self.pipeline.clone(), self.persist));

        let mut handle = {
            let harvester = self.harvester.clone();
            let batch = batch.clone();
            let sink = sink.clone();
            let abort = self.abort.clone();
            tokio::spawn(async move { harvester.harvest(&batch, &sink, abort).await })
        };

        let joined = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
                Ok(joined) => Some(joined),
                Err(_) => {
                    handle.abort();
                    // Wait for the harvester future to be dropped before flushing
                    let _ = handle.await;
                    None
                },
            },
            None => Some(handle.await),
        };

        sink.flush().await;
        self.pipeline.counters().add_emitted(sink.emitted());
        let lost = sink.lost();
        if lost > 0 {
            tracing::warn!(
                batch = batch.index,
                lost = lost,
                "Records dropped mid-ingest when the batch was aborted"
            );
        }

        match joined {
            None => Err(HarvesterFailure::Timeout(self.timeout.unwrap_or_default())),
            Some(Ok(result)) => result,
            Some(Err(e)) => Err(join_failure(e)),
        }
    }
}

fn join_failure(err: JoinError) -> HarvesterFailure {
    if err.is_panic() {
        let panic = err.into_panic();
        let msg = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        HarvesterFailure::Panicked(msg)
    } else {
        HarvesterFailure::failed(format!("harvester task cancelled: {err}"))
    }
}

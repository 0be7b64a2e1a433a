//! Ingestion pipeline
//!
//! Validates each harvested record, computes its identity key, performs the
//! atomic insert and turns the store's answer into an [`IngestOutcome`].
//! Many workers call into one pipeline at once; nothing here serializes
//! them. At-most-once storage comes from the store's uniqueness
//! constraint alone, the optional pre-filter only saves round trips.

use super::failed_log::{FailedEntry, FailedRecordLog};
use super::stats::{ProgressReporter, RunCounters, TracingReporter};
use crate::config::{PipelineConfig, RetryPolicy};
use crate::registry::SourceRegistry;
use crate::store::{InsertOutcome, RecordStore, StoreResult};
use chrono::Utc;
use harvest_common::identity::IdentityKey;
use harvest_common::types::{Record, RecordKind, RunStats, ValidRecord};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Missing or malformed fields; retrying will not help
    Validation(String),
    /// The store failed for a reason other than a duplicate key
    Store(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Validation(msg) => write!(f, "validation: {msg}"),
            RejectReason::Store(msg) => write!(f, "store: {msg}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Saved,
    /// Legal document stage changed
    Updated,
    Duplicate,
    Rejected(RejectReason),
}

pub struct IngestionPipeline {
    label: String,
    store: Arc<dyn RecordStore>,
    registry: Arc<dyn SourceRegistry>,
    counters: Arc<RunCounters>,
    reporter: Arc<dyn ProgressReporter>,
    progress_every: u64,
    store_retry: RetryPolicy,
    failed_log: Option<Arc<FailedRecordLog>>,
    prefilter: Option<Mutex<HashSet<(RecordKind, IdentityKey)>>>,
}

impl IngestionPipeline {
    /// Pipeline with fresh counters and the default tracing reporter.
    /// The failed-record log is attached separately with
    /// [`with_failed_log`](Self::with_failed_log).
    pub fn new(
        store: Arc<dyn RecordStore>,
        registry: Arc<dyn SourceRegistry>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            label: "ingest".to_string(),
            store,
            registry,
            counters: Arc::new(RunCounters::new()),
            reporter: Arc::new(TracingReporter),
            progress_every: config.progress_every.max(1),
            store_retry: config.store_retry.clone(),
            failed_log: None,
            prefilter: config.dedup_prefilter.then(|| Mutex::new(HashSet::new())),
        }
    }

    /// Name used in progress reports, usually the source
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_failed_log(mut self, log: Arc<FailedRecordLog>) -> Self {
        self.failed_log = Some(log);
        self
    }

    pub fn counters(&self) -> &Arc<RunCounters> {
        &self.counters
    }

    pub fn snapshot(&self) -> RunStats {
        self.counters.snapshot()
    }

    /// Process one record. Never fails: every problem becomes an outcome.
    pub async fn ingest(&self, record: Record) -> IngestOutcome {
        let outcome = match record.validate() {
            Ok(valid) => self.persist(valid).await,
            Err(e) => self.invalid(e.to_string()),
        };
        self.count(&outcome);
        outcome
    }

    /// Process a chunk with one store round trip where the backend allows.
    /// Outcomes are returned in input order.
    pub async fn ingest_many(&self, records: Vec<Record>) -> Vec<IngestOutcome> {
        let mut outcomes: Vec<Option<IngestOutcome>> = vec![None; records.len()];
        let mut pending = Vec::new();
        let mut pending_idx = Vec::new();

        for (i, record) in records.into_iter().enumerate() {
            match record.validate() {
                Ok(valid) if self.prefilter_hit(&valid) => {
                    outcomes[i] = Some(IngestOutcome::Duplicate);
                },
                Ok(valid) => {
                    pending.push(valid);
                    pending_idx.push(i);
                },
                Err(e) => outcomes[i] = Some(self.invalid(e.to_string())),
            }
        }

        if !pending.is_empty() {
            let results = self.store.insert_many(&pending).await;
            for ((i, valid), result) in pending_idx.into_iter().zip(pending).zip(results) {
                let result = self.retry_transient(&valid, result).await;
                outcomes[i] = Some(self.settle(valid, result).await);
            }
        }

        let outcomes: Vec<IngestOutcome> = outcomes
            .into_iter()
            .map(|o| {
                o.unwrap_or_else(|| {
                    IngestOutcome::Rejected(RejectReason::Store("no result from store".into()))
                })
            })
            .collect();
        for outcome in &outcomes {
            self.count(outcome);
        }
        outcomes
    }

    /// Count a record that could not even be decoded
    pub fn record_rejected(&self, reason: impl Into<String>) -> IngestOutcome {
        let outcome = self.invalid(reason.into());
        self.count(&outcome);
        outcome
    }

    fn invalid(&self, reason: String) -> IngestOutcome {
        tracing::debug!(run = %self.label, reason = %reason, "Record rejected by validation");
        IngestOutcome::Rejected(RejectReason::Validation(reason))
    }

    fn count(&self, outcome: &IngestOutcome) {
        let seen = self.counters.record(outcome);
        if seen % self.progress_every == 0 {
            self.reporter.report(&self.label, &self.counters.snapshot());
        }
    }

    async fn persist(&self, valid: ValidRecord) -> IngestOutcome {
        if self.prefilter_hit(&valid) {
            return IngestOutcome::Duplicate;
        }
        let first = self.store.insert(&valid).await;
        let result = self.retry_transient(&valid, first).await;
        self.settle(valid, result).await
    }

    /// Repeat an insert that failed transiently, up to the retry policy.
    async fn retry_transient(
        &self,
        record: &ValidRecord,
        mut result: StoreResult<InsertOutcome>,
    ) -> StoreResult<InsertOutcome> {
        let mut attempt = 1;
        while let Err(e) = &result {
            if !e.is_transient() || attempt >= self.store_retry.max_attempts {
                break;
            }
            let delay = self.store_retry.backoff(attempt);
            tracing::debug!(
                key = %record.key,
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                error = %e,
                "Transient store error, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
            result = self.store.insert(record).await;
        }
        result
    }

    async fn settle(&self, valid: ValidRecord, result: StoreResult<InsertOutcome>) -> IngestOutcome {
        match result {
            Ok(InsertOutcome::Inserted) => {
                self.remember(&valid);
                self.heartbeat(&valid).await;
                tracing::debug!(key = %valid.key, "Record saved");
                IngestOutcome::Saved
            },
            Ok(InsertOutcome::Updated) => {
                self.heartbeat(&valid).await;
                tracing::info!(key = %valid.key, "Legal document stage updated");
                IngestOutcome::Updated
            },
            Ok(InsertOutcome::Duplicate) => {
                self.remember(&valid);
                tracing::debug!(key = %valid.key, "Duplicate record");
                IngestOutcome::Duplicate
            },
            Err(e) => {
                tracing::warn!(key = %valid.key, error = %e, "Record rejected by store");
                let reason = e.to_string();
                if let Some(log) = &self.failed_log {
                    let entry = FailedEntry {
                        key: valid.key.to_string(),
                        reason: reason.clone(),
                        failed_at: Utc::now(),
                        record: valid.record,
                    };
                    if let Err(io) = log.append(&entry).await {
                        tracing::error!(
                            path = %log.path().display(),
                            error = %io,
                            "Failed to append to failed-record log"
                        );
                    }
                }
                IngestOutcome::Rejected(RejectReason::Store(reason))
            },
        }
    }

    /// Registry write failures are logged and never fail the record.
    async fn heartbeat(&self, valid: &ValidRecord) {
        if let Err(e) = self.registry.heartbeat(&valid.key.source, valid.parsed_at).await {
            tracing::warn!(source = %valid.key.source, error = %e, "Source heartbeat failed");
        }
    }

    fn prefilter_hit(&self, valid: &ValidRecord) -> bool {
        // Legal documents may come back with a new stage, so they always reach the store
        match (&self.prefilter, valid.record.kind()) {
            (Some(seen), RecordKind::News) => seen
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .contains(&(RecordKind::News, valid.key.clone())),
            _ => false,
        }
    }

    fn remember(&self, valid: &ValidRecord) {
        if let (Some(seen), RecordKind::News) = (&self.prefilter, valid.record.kind()) {
            seen.lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert((RecordKind::News, valid.key.clone()));
        }
    }
}

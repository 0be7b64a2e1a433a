//! Shared fixtures for the harvest-ingest integration tests
//!
//! - record builders
//! - a scripted in-process harvester that tracks concurrency
//! - stores and registries with injectable failures
//! - a reporter that keeps every progress snapshot

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use harvest_common::types::{
    Batch, LegalRecord, NewsRecord, Record, RunState, RunStats, SourceState, SourceStatus,
};
use harvest_ingest::framework::{
    HarvestOutcome, Harvester, HarvesterFailure, ProgressReporter, RecordSink,
};
use harvest_ingest::registry::{RegistryError, RegistryResult};
use harvest_ingest::store::{InsertOutcome, StoreError, StoreResult};
use harvest_ingest::{MemoryRecordStore, MemorySourceRegistry, RecordStore, SourceRegistry};
use harvest_common::types::ValidRecord;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Records
// ============================================================================

pub fn news(source: &str, url: &str) -> Record {
    news_at(source, url, 1_700_000_000)
}

pub fn news_at(source: &str, url: &str, parsed_at: i64) -> Record {
    Record::News(NewsRecord {
        source: source.to_string(),
        url: url.to_string(),
        text: format!("body of {url}"),
        title: format!("title of {url}"),
        published_at: Some(parsed_at - 60),
        parsed_at: Some(parsed_at),
        ..Default::default()
    })
}

pub fn legal(source: &str, url: &str, stage: &str) -> Record {
    Record::Legal(LegalRecord {
        source: source.to_string(),
        url: url.to_string(),
        text: "draft law".to_string(),
        title: format!("project {url}"),
        published_at: Some(1_700_000_000),
        parsed_at: Some(1_700_000_100),
        stage: Some(stage.to_string()),
        ..Default::default()
    })
}

// ============================================================================
// Scripted harvester
// ============================================================================

/// What the harvester does with a given batch
#[derive(Debug, Clone)]
pub enum Step {
    /// Emit `records_per_unit` records for every unit
    Emit,
    Fail(String),
    Panic,
    /// Fail this many attempts, then emit
    FailTimes(u32),
    /// Wait for the abort token; runs forever without one
    Hang,
    /// Cancel the run token, then emit
    Cancel(CancellationToken),
}

pub struct ScriptedHarvester {
    name: String,
    delay: Duration,
    records_per_unit: usize,
    steps: HashMap<usize, Step>,
    active: AtomicUsize,
    peak: AtomicUsize,
    dispatched: Mutex<Vec<usize>>,
    attempts: Mutex<HashMap<usize, u32>>,
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedHarvester {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            delay: Duration::ZERO,
            records_per_unit: 1,
            steps: HashMap::new(),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            dispatched: Mutex::new(Vec::new()),
            attempts: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_records_per_unit(mut self, n: usize) -> Self {
        self.records_per_unit = n;
        self
    }

    pub fn with_step(mut self, batch: usize, step: Step) -> Self {
        self.steps.insert(batch, step);
        self
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Batch indexes in the order their first attempt started
    pub fn dispatched(&self) -> Vec<usize> {
        self.dispatched.lock().unwrap().clone()
    }

    pub fn attempts(&self, batch: usize) -> u32 {
        self.attempts.lock().unwrap().get(&batch).copied().unwrap_or(0)
    }

    fn url(&self, unit: &str, n: usize) -> String {
        format!("https://{}.example/{unit}/{n}", self.name)
    }

    async fn emit_all(&self, batch: &Batch, sink: &RecordSink) -> u64 {
        let mut emitted = 0;
        for unit in batch.unit_ids() {
            for n in 0..self.records_per_unit {
                sink.emit(news(&self.name, &self.url(unit, n))).await;
                emitted += 1;
            }
        }
        emitted
    }
}

#[async_trait]
impl Harvester for ScriptedHarvester {
    fn name(&self) -> &str {
        &self.name
    }

    async fn harvest(
        &self,
        batch: &Batch,
        sink: &RecordSink,
        abort: CancellationToken,
    ) -> Result<HarvestOutcome, HarvesterFailure> {
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let n = attempts.entry(batch.index).or_insert(0);
            *n += 1;
            *n
        };
        if attempt == 1 {
            self.dispatched.lock().unwrap().push(batch.index);
        }

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);
        let _guard = ActiveGuard(&self.active);

        let step = self.steps.get(&batch.index).cloned().unwrap_or(Step::Emit);
        if let Step::Cancel(token) = &step {
            token.cancel();
        }

        tokio::time::sleep(self.delay).await;

        match step {
            Step::Emit | Step::Cancel(_) => Ok(HarvestOutcome {
                emitted: self.emit_all(batch, sink).await,
            }),
            Step::Fail(reason) => Err(HarvesterFailure::failed(reason)),
            Step::Panic => panic!("scraper crashed on batch {}", batch.index),
            Step::FailTimes(n) if attempt <= n => {
                Err(HarvesterFailure::failed(format!("attempt {attempt} failed")))
            },
            Step::FailTimes(_) => Ok(HarvestOutcome {
                emitted: self.emit_all(batch, sink).await,
            }),
            Step::Hang => {
                abort.cancelled().await;
                Err(HarvesterFailure::Aborted { emitted: 0 })
            },
        }
    }
}

// ============================================================================
// Stores and registries with failures
// ============================================================================

/// Memory store that fails on demand
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryRecordStore,
    transient_failures: AtomicU32,
    rejected_urls: Mutex<HashSet<String>>,
    calls: AtomicU32,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `n` inserts fail as unavailable
    pub fn fail_next(&self, n: u32) {
        self.transient_failures.store(n, Ordering::SeqCst);
    }

    /// Inserts for this normalized url fail permanently until cleared
    pub fn reject_url(&self, url: &str) {
        self.rejected_urls.lock().unwrap().insert(url.to_string());
    }

    pub fn heal(&self) {
        self.transient_failures.store(0, Ordering::SeqCst);
        self.rejected_urls.lock().unwrap().clear();
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordStore for FlakyStore {
    async fn insert(&self, record: &ValidRecord) -> StoreResult<InsertOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let pending = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if pending.is_ok() {
            return Err(StoreError::Unavailable("connection refused".into()));
        }
        if self.rejected_urls.lock().unwrap().contains(&record.key.url) {
            return Err(StoreError::Malformed("value too long for column".into()));
        }
        self.inner.insert(record).await
    }
}

/// Registry whose heartbeat always fails; everything else delegates
pub struct BrokenHeartbeatRegistry {
    pub inner: MemorySourceRegistry,
}

#[async_trait]
impl SourceRegistry for BrokenHeartbeatRegistry {
    async fn get(&self, name: &str) -> RegistryResult<SourceStatus> {
        self.inner.get(name).await
    }

    async fn list(&self) -> RegistryResult<Vec<SourceStatus>> {
        self.inner.list().await
    }

    async fn set_status(&self, name: &str, status: SourceState) -> RegistryResult<()> {
        self.inner.set_status(name, status).await
    }

    async fn heartbeat(&self, name: &str, _at: DateTime<Utc>) -> RegistryResult<()> {
        Err(RegistryError::Corrupt {
            name: name.to_string(),
            reason: "registry offline".to_string(),
        })
    }

    async fn register(&self, name: &str, status: SourceState) -> RegistryResult<SourceStatus> {
        self.inner.register(name, status).await
    }

    async fn set_run_state(&self, name: &str, state: RunState) -> RegistryResult<()> {
        self.inner.set_run_state(name, state).await
    }
}

// ============================================================================
// Reporting
// ============================================================================

#[derive(Default)]
pub struct CollectingReporter {
    snapshots: Mutex<Vec<RunStats>>,
}

impl CollectingReporter {
    pub fn snapshots(&self) -> Vec<RunStats> {
        self.snapshots.lock().unwrap().clone()
    }
}

impl ProgressReporter for CollectingReporter {
    fn report(&self, _label: &str, snapshot: &RunStats) {
        self.snapshots.lock().unwrap().push(*snapshot);
    }
}

pub fn memory_backends() -> (Arc<MemoryRecordStore>, Arc<MemorySourceRegistry>) {
    (Arc::new(MemoryRecordStore::new()), Arc::new(MemorySourceRegistry::new()))
}

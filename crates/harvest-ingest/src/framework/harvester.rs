//! Harvester contract and the per-batch record sink

use super::pipeline::IngestionPipeline;
use crate::config::PersistStrategy;
use async_trait::async_trait;
use harvest_common::types::{Batch, Record};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HarvestOutcome {
    /// Records the harvester reports having produced
    pub emitted: u64,
}

/// Why a batch did not succeed. Always confined to that batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HarvesterFailure {
    #[error("harvester failed: {0}")]
    Failed(String),

    #[error("harvester timed out after {0:?}")]
    Timeout(Duration),

    #[error("harvester aborted after emitting {emitted} records")]
    Aborted { emitted: u64 },

    #[error("harvester panicked: {0}")]
    Panicked(String),
}

impl HarvesterFailure {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}

/// Turns a batch of work units into records.
///
/// Implementations push every record into `sink` as it is produced and
/// return once the batch is done. `abort` fires only on a hard cancel;
/// implementations should stop promptly and report
/// [`HarvesterFailure::Aborted`]. A harvester may also be dropped mid-call
/// when its batch times out.
#[async_trait]
pub trait Harvester: Send + Sync {
    fn name(&self) -> &str;

    async fn harvest(
        &self,
        batch: &Batch,
        sink: &RecordSink,
        abort: CancellationToken,
    ) -> Result<HarvestOutcome, HarvesterFailure>;
}

/// Entry point from a running harvester into the pipeline.
///
/// Applies the persistence strategy: immediate mode ingests each record on
/// arrival, batched mode buffers and ingests in chunks. The scheduler
/// flushes the sink whatever the batch outcome.
pub struct RecordSink {
    pipeline: Arc<IngestionPipeline>,
    strategy: PersistStrategy,
    buffer: Mutex<Vec<Record>>,
    emitted: AtomicU64,
    /// Records the pipeline finished with
    settled: AtomicU64,
}

impl RecordSink {
    pub fn new(pipeline: Arc<IngestionPipeline>, strategy: PersistStrategy) -> Self {
        Self {
            pipeline,
            strategy,
            buffer: Mutex::new(Vec::new()),
            emitted: AtomicU64::new(0),
            settled: AtomicU64::new(0),
        }
    }

    pub async fn emit(&self, record: Record) {
        self.emitted.fetch_add(1, Ordering::Relaxed);
        match self.strategy {
            PersistStrategy::Immediate => {
                self.pipeline.ingest(record).await;
                self.settled.fetch_add(1, Ordering::Relaxed);
            },
            PersistStrategy::Batched { size } => {
                let chunk = {
                    let mut buffer = self.buffer.lock().await;
                    buffer.push(record);
                    if buffer.len() < size {
                        return;
                    }
                    std::mem::take(&mut *buffer)
                };
                self.ingest_chunk(chunk).await;
            },
        }
    }

    /// Report output the harvester produced but could not decode
    pub fn reject(&self, reason: impl Into<String>) {
        self.emitted.fetch_add(1, Ordering::Relaxed);
        self.pipeline.record_rejected(reason);
        self.settled.fetch_add(1, Ordering::Relaxed);
    }

    async fn ingest_chunk(&self, chunk: Vec<Record>) {
        let len = chunk.len() as u64;
        self.pipeline.ingest_many(chunk).await;
        self.settled.fetch_add(len, Ordering::Relaxed);
    }

    /// Ingest anything still buffered
    pub async fn flush(&self) {
        let chunk = std::mem::take(&mut *self.buffer.lock().await);
        if !chunk.is_empty() {
            self.ingest_chunk(chunk).await;
        }
    }

    /// Records received so far, decodable or not
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    /// Records received but never counted by the pipeline, because the
    /// harvester was dropped while they were being ingested.
    ///
    /// Meaningful only after [`flush`](Self::flush).
    pub fn lost(&self) -> u64 {
        self.emitted().saturating_sub(self.settled.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::registry::MemorySourceRegistry;
    use crate::store::{InsertOutcome, MemoryRecordStore, RecordStore, StoreResult};
    use harvest_common::types::{NewsRecord, ValidRecord};

    fn record(n: usize) -> Record {
        Record::News(NewsRecord {
            source: "interfax".into(),
            url: format!("https://interfax.ru/{n}"),
            text: "text".into(),
            title: "title".into(),
            published_at: Some(1),
            parsed_at: Some(2),
            ..Default::default()
        })
    }

    fn pipeline() -> (Arc<IngestionPipeline>, Arc<MemoryRecordStore>) {
        let store = Arc::new(MemoryRecordStore::new());
        let pipeline = IngestionPipeline::new(
            store.clone(),
            Arc::new(MemorySourceRegistry::new()),
            &PipelineConfig::default(),
        );
        (Arc::new(pipeline), store)
    }

    #[tokio::test]
    async fn test_batched_sink_buffers_until_size_or_flush() {
        let (pipeline, store) = pipeline();
        let sink = RecordSink::new(pipeline.clone(), PersistStrategy::Batched { size: 3 });

        for n in 0..4 {
            sink.emit(record(n)).await;
        }
        assert_eq!(store.len(), 3);

        sink.flush().await;
        assert_eq!(store.len(), 4);
        assert_eq!(sink.emitted(), 4);
        assert_eq!(pipeline.snapshot().items_saved, 4);
    }

    #[tokio::test]
    async fn test_immediate_sink_and_rejects() {
        let (pipeline, store) = pipeline();
        let sink = RecordSink::new(pipeline.clone(), PersistStrategy::Immediate);
        sink.emit(record(1)).await;
        sink.reject("line 2: trailing characters");
        sink.flush().await;

        assert_eq!(store.len(), 1);
        assert_eq!(sink.emitted(), 2);
        assert_eq!(pipeline.snapshot().items_invalid, 1);
    }

    /// Never answers, like a database stuck behind a lock
    struct StalledStore;

    #[async_trait]
    impl RecordStore for StalledStore {
        async fn insert(&self, _record: &ValidRecord) -> StoreResult<InsertOutcome> {
            std::future::pending().await
        }
    }

    async fn abort_mid_ingest(strategy: PersistStrategy, records: usize) -> Arc<RecordSink> {
        let pipeline = Arc::new(IngestionPipeline::new(
            Arc::new(StalledStore),
            Arc::new(MemorySourceRegistry::new()),
            &PipelineConfig::default(),
        ));
        let sink = Arc::new(RecordSink::new(pipeline, strategy));

        let task = {
            let sink = sink.clone();
            tokio::spawn(async move {
                for n in 0..records {
                    sink.emit(record(n)).await;
                }
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        task.abort();
        let _ = task.await;
        sink
    }

    #[tokio::test]
    async fn test_lost_counts_records_dropped_mid_ingest() {
        let sink = abort_mid_ingest(PersistStrategy::Immediate, 3).await;
        assert_eq!(sink.emitted(), 1);
        assert_eq!(sink.lost(), 1);

        let sink = abort_mid_ingest(PersistStrategy::Batched { size: 2 }, 3).await;
        assert_eq!(sink.emitted(), 2);
        assert_eq!(sink.lost(), 2);
    }

    #[tokio::test]
    async fn test_nothing_lost_after_clean_flush() {
        let (pipeline, _) = pipeline();
        let sink = RecordSink::new(pipeline, PersistStrategy::Batched { size: 4 });
        for n in 0..6 {
            sink.emit(record(n)).await;
        }
        sink.reject("line 7: expected value");
        sink.flush().await;
        assert_eq!(sink.emitted(), 7);
        assert_eq!(sink.lost(), 0);
    }
}

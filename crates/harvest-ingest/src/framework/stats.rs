//! Run counters and progress snapshots

use super::pipeline::{IngestOutcome, RejectReason};
use harvest_common::types::RunStats;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters shared by every worker of a run
#[derive(Debug, Default)]
pub struct RunCounters {
    items_seen: AtomicU64,
    items_saved: AtomicU64,
    items_duplicate: AtomicU64,
    items_updated: AtomicU64,
    items_failed: AtomicU64,
    items_invalid: AtomicU64,
    records_emitted: AtomicU64,
    batches_succeeded: AtomicU64,
    batches_failed: AtomicU64,
    batches_skipped: AtomicU64,
    peak_concurrency: AtomicU64,
}

impl RunCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one pipeline outcome; returns the new `items_seen`.
    pub fn record(&self, outcome: &IngestOutcome) -> u64 {
        match outcome {
            IngestOutcome::Saved => self.items_saved.fetch_add(1, Ordering::Relaxed),
            IngestOutcome::Updated => self.items_updated.fetch_add(1, Ordering::Relaxed),
            IngestOutcome::Duplicate => self.items_duplicate.fetch_add(1, Ordering::Relaxed),
            IngestOutcome::Rejected(reason) => {
                if matches!(reason, RejectReason::Validation(_)) {
                    self.items_invalid.fetch_add(1, Ordering::Relaxed);
                }
                self.items_failed.fetch_add(1, Ordering::Relaxed)
            },
        };
        self.items_seen.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn add_emitted(&self, n: u64) {
        self.records_emitted.fetch_add(n, Ordering::Relaxed);
    }

    pub fn batch_succeeded(&self) {
        self.batches_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn batch_failed(&self) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn batches_skipped(&self, n: u64) {
        self.batches_skipped.fetch_add(n, Ordering::Relaxed);
    }

    pub fn observe_concurrency(&self, active: u64) {
        self.peak_concurrency.fetch_max(active, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RunStats {
        RunStats {
            items_seen: self.items_seen.load(Ordering::Acquire),
            items_saved: self.items_saved.load(Ordering::Relaxed),
            items_duplicate: self.items_duplicate.load(Ordering::Relaxed),
            items_updated: self.items_updated.load(Ordering::Relaxed),
            items_failed: self.items_failed.load(Ordering::Relaxed),
            items_invalid: self.items_invalid.load(Ordering::Relaxed),
            records_emitted: self.records_emitted.load(Ordering::Relaxed),
            batches_succeeded: self.batches_succeeded.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            batches_skipped: self.batches_skipped.load(Ordering::Relaxed),
            peak_concurrency: self.peak_concurrency.load(Ordering::Relaxed),
        }
    }
}

/// Receives counter snapshots on the configured cadence
pub trait ProgressReporter: Send + Sync {
    fn report(&self, label: &str, snapshot: &RunStats);
}

/// Emits snapshots as structured `tracing` events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ProgressReporter for TracingReporter {
    fn report(&self, label: &str, s: &RunStats) {
        tracing::info!(
            run = %label,
            seen = s.items_seen,
            saved = s.items_saved,
            duplicate = s.items_duplicate,
            updated = s.items_updated,
            failed = s.items_failed,
            batches_succeeded = s.batches_succeeded,
            batches_failed = s.batches_failed,
            "Ingestion progress"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_counts_each_outcome_once() {
        let counters = RunCounters::new();
        assert_eq!(counters.record(&IngestOutcome::Saved), 1);
        assert_eq!(counters.record(&IngestOutcome::Duplicate), 2);
        counters.record(&IngestOutcome::Rejected(RejectReason::Validation("no url".into())));
        counters.record(&IngestOutcome::Rejected(RejectReason::Store("down".into())));
        counters.record(&IngestOutcome::Updated);
        counters.observe_concurrency(2);
        counters.observe_concurrency(1);

        let s = counters.snapshot();
        assert_eq!(s.items_seen, 5);
        assert_eq!(s.items_saved, 1);
        assert_eq!(s.items_duplicate, 1);
        assert_eq!(s.items_updated, 1);
        assert_eq!(s.items_failed, 2);
        assert_eq!(s.items_invalid, 1);
        assert_eq!(s.peak_concurrency, 2);
    }
}

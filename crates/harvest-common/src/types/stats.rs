use serde::{Deserialize, Serialize};

/// Counters for one run.
///
/// `merge` is commutative and associative, so per-batch or per-source
/// results can be combined in any completion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunStats {
    pub items_seen: u64,
    pub items_saved: u64,
    pub items_duplicate: u64,
    /// Legal documents whose stage changed
    pub items_updated: u64,
    pub items_failed: u64,
    /// Validation rejections, included in `items_failed`
    pub items_invalid: u64,
    /// Records reported by harvesters, whatever their outcome
    pub records_emitted: u64,
    pub batches_succeeded: u64,
    pub batches_failed: u64,
    /// Never dispatched because the run was cancelled
    pub batches_skipped: u64,
    pub peak_concurrency: u64,
}

impl RunStats {
    pub fn merge(&mut self, other: &RunStats) {
        self.items_seen += other.items_seen;
        self.items_saved += other.items_saved;
        self.items_duplicate += other.items_duplicate;
        self.items_updated += other.items_updated;
        self.items_failed += other.items_failed;
        self.items_invalid += other.items_invalid;
        self.records_emitted += other.records_emitted;
        self.batches_succeeded += other.batches_succeeded;
        self.batches_failed += other.batches_failed;
        self.batches_skipped += other.batches_skipped;
        self.peak_concurrency = self.peak_concurrency.max(other.peak_concurrency);
    }

    /// Batches that reached a terminal outcome
    pub fn batches_dispatched(&self) -> u64 {
        self.batches_succeeded + self.batches_failed
    }

    /// True when batches ran and none of them succeeded
    pub fn all_batches_failed(&self) -> bool {
        self.batches_failed > 0 && self.batches_succeeded == 0
    }
}

impl std::iter::Sum for RunStats {
    fn sum<I: Iterator<Item = RunStats>>(iter: I) -> Self {
        iter.fold(RunStats::default(), |mut acc, s| {
            acc.merge(&s);
            acc
        })
    }
}

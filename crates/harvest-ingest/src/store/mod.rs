//! Record store
//!
//! Uniqueness of `(source, url)` is enforced here and only here. The
//! pipeline never decides "duplicate" on its own; it reports whatever the
//! atomic insert returned.

mod memory;
mod postgres;

pub use memory::MemoryRecordStore;
pub use postgres::PgRecordStore;

use async_trait::async_trait;
use harvest_common::types::ValidRecord;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Identity key already present
    Duplicate,
    /// Legal document already present with a different stage; stage refreshed
    Updated,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached; the same insert may succeed later
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The store refused the payload
    #[error("Store rejected record: {0}")]
    Malformed(String),

    #[error("Store error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Atomically insert `record` unless its identity key exists.
    async fn insert(&self, record: &ValidRecord) -> StoreResult<InsertOutcome>;

    /// Insert a chunk, one result per input in input order.
    ///
    /// Backends may use a single round trip; a failing chunk must fall back
    /// to per-record inserts so one bad record does not fail its neighbours.
    async fn insert_many(&self, records: &[ValidRecord]) -> Vec<StoreResult<InsertOutcome>> {
        let mut results = Vec::with_capacity(records.len());
        for record in records {
            results.push(self.insert(record).await);
        }
        results
    }
}

//! Source registry
//!
//! Durable mapping from source name to control status, run state and the
//! parsed time of the newest saved record. Every write is applied
//! immediately. The registry is an owned handle passed to the pipeline and
//! orchestrator; there is no process-wide source state.

mod memory;
mod postgres;

pub use memory::MemorySourceRegistry;
pub use postgres::PgSourceRegistry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use harvest_common::types::{RunState, SourceState, SourceStatus};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Source '{0}' not found")]
    NotFound(String),

    #[error("Registry database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row could not be decoded
    #[error("Registry row for '{name}' is invalid: {reason}")]
    Corrupt { name: String, reason: String },
}

pub type RegistryResult<T> = Result<T, RegistryError>;

#[async_trait]
pub trait SourceRegistry: Send + Sync {
    async fn get(&self, name: &str) -> RegistryResult<SourceStatus>;

    /// All sources, ordered by name
    async fn list(&self) -> RegistryResult<Vec<SourceStatus>>;

    async fn set_status(&self, name: &str, status: SourceState) -> RegistryResult<()>;

    /// Advance `last_update` to `at` unless a later value is already stored.
    ///
    /// Replayed or out-of-order heartbeats are harmless. An unknown source is
    /// registered as enabled.
    async fn heartbeat(&self, name: &str, at: DateTime<Utc>) -> RegistryResult<()>;

    /// Insert the source if absent and return its current row.
    /// An existing row is left untouched.
    async fn register(&self, name: &str, status: SourceState) -> RegistryResult<SourceStatus>;

    async fn set_run_state(&self, name: &str, state: RunState) -> RegistryResult<()>;
}

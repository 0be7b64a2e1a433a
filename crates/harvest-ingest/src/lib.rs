//! Harvest ingestion engine
//!
//! Turns large work lists into bounded-concurrency batch runs against
//! external harvesters and persists what they produce exactly once per
//! `(source, url)`.
//!
//! - [`framework`]: partitioner, scheduler, pipeline and counters
//! - [`registry`]: source status, run state and heartbeats
//! - [`store`]: record persistence with store-enforced uniqueness
//! - [`orchestrator`]: per-source runs and the periodic loop
//! - [`control`]: status / enable / disable / schedule / run now
//! - [`process`]: harvester backed by an external process
//!
//! ```no_run
//! use harvest_ingest::{db, HarvestConfig, Orchestrator, PgRecordStore, PgSourceRegistry};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> harvest_ingest::Result<()> {
//! let config = HarvestConfig::load(None)?;
//! let pool = db::create_pool(&db::DbConfig::from_env()?).await?;
//! let orchestrator = Orchestrator::from_config(
//!     &config,
//!     Arc::new(PgRecordStore::new(pool.clone())),
//!     Arc::new(PgSourceRegistry::new(pool)),
//! );
//! let stats = orchestrator.run_now(&["cntd".to_string()], CancellationToken::new()).await?;
//! println!("saved {}", stats.items_saved);
//! # Ok(())
//! # }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod control;
pub mod db;
pub mod error;
pub mod framework;
pub mod orchestrator;
pub mod process;
pub mod registry;
pub mod store;

pub use config::{HarvestConfig, PersistStrategy, RetryPolicy, SchedulerConfig};
pub use control::ControlSurface;
pub use error::{IngestError, Result};
pub use orchestrator::{Orchestrator, SourcePlan, WorkList};
pub use registry::{MemorySourceRegistry, PgSourceRegistry, SourceRegistry};
pub use store::{MemoryRecordStore, PgRecordStore, RecordStore};

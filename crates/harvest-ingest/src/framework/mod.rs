//! Batch harvesting framework
//!
//! - [`partition`]: split a work list into ordered batches
//! - [`scheduler`]: run batches under a concurrency cap
//! - [`harvester`]: the external harvester contract and record sink
//! - [`pipeline`]: validate, deduplicate and persist records
//! - [`stats`]: atomic run counters and progress reporting
//! - [`failed_log`]: records the store rejected, kept for retry

pub mod failed_log;
pub mod harvester;
pub mod partition;
pub mod pipeline;
pub mod scheduler;
pub mod stats;

pub use failed_log::{FailedEntry, FailedRecordLog};
pub use harvester::{HarvestOutcome, Harvester, HarvesterFailure, RecordSink};
pub use partition::{partition, partition_with_pages};
pub use pipeline::{IngestOutcome, IngestionPipeline, RejectReason};
pub use scheduler::BatchScheduler;
pub use stats::{ProgressReporter, RunCounters, TracingReporter};

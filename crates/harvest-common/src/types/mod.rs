//! Shared domain types

mod record;
mod source;
mod stats;
mod work;

pub use record::{LegalRecord, NewsRecord, Record, RecordKind, ValidRecord};
pub use source::{RunState, SourceState, SourceStatus};
pub use stats::RunStats;
pub use work::{Batch, PageRange, WorkUnit};

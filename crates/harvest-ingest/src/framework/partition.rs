//! Work partitioner

use harvest_common::types::{Batch, PageRange, WorkUnit};
use harvest_common::{HarvestError, Result};

/// Split `units` into consecutive batches of at most `batch_size`.
///
/// Batch `i` holds `units[i * batch_size..min((i + 1) * batch_size, len)]`.
/// Empty input gives no batches; a non-positive size is a configuration
/// error.
pub fn partition(units: Vec<WorkUnit>, batch_size: i64) -> Result<Vec<Batch>> {
    partition_with_pages(units, batch_size, None)
}

/// Like [`partition`], stamping every batch with the source-level page window.
pub fn partition_with_pages(
    units: Vec<WorkUnit>,
    batch_size: i64,
    pages: Option<PageRange>,
) -> Result<Vec<Batch>> {
    let size = usize::try_from(batch_size)
        .ok()
        .filter(|s| *s > 0)
        .ok_or_else(|| HarvestError::config(format!("batch_size must be positive, got {batch_size}")))?;

    let mut batches = Vec::with_capacity(units.len().div_ceil(size));
    let mut units = units.into_iter().peekable();
    while units.peek().is_some() {
        batches.push(Batch {
            index: batches.len(),
            units: units.by_ref().take(size).collect(),
            pages,
        });
    }

    tracing::debug!(batches = batches.len(), batch_size = size, "Work partitioned");
    Ok(batches)
}

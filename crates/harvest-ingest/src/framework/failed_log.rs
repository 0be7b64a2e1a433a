//! Append-only JSON-lines log of records the store rejected

use super::pipeline::{IngestOutcome, IngestionPipeline};
use chrono::{DateTime, Utc};
use harvest_common::types::{Record, RunStats};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedEntry {
    /// `source url` after normalization
    pub key: String,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
    pub record: Record,
}

#[derive(Debug)]
pub struct FailedRecordLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FailedRecordLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, entry: &FailedEntry) -> io::Result<()> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await
    }

    /// Read every entry; a missing file is an empty log. Undecodable lines
    /// are skipped with a warning.
    pub async fn load(&self) -> io::Result<Vec<FailedEntry>> {
        let _guard = self.lock.lock().await;
        self.load_unlocked().await
    }

    async fn load_unlocked(&self) -> io::Result<Vec<FailedEntry>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut entries = Vec::new();
        for (n, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!(
                    path = %self.path.display(),
                    line = n + 1,
                    error = %e,
                    "Skipping unreadable failed-record entry"
                ),
            }
        }
        Ok(entries)
    }

    /// Replace the log contents
    async fn rewrite_unlocked(&self, entries: &[FailedEntry]) -> io::Result<()> {
        let mut buf = Vec::new();
        for entry in entries {
            serde_json::to_writer(&mut buf, entry)?;
            buf.push(b'\n');
        }
        let tmp = self.path.with_extension("jsonl.tmp");
        tokio::fs::write(&tmp, &buf).await?;
        tokio::fs::rename(&tmp, &self.path).await
    }

    /// Feed every logged record through `pipeline` again.
    ///
    /// Records that are now saved, updated or duplicate leave the log; the
    /// rest are written back with their new reason. `pipeline` must not log
    /// into this same file.
    pub async fn retry(&self, pipeline: &IngestionPipeline) -> io::Result<RunStats> {
        let _guard = self.lock.lock().await;
        let entries = self.load_unlocked().await?;
        if entries.is_empty() {
            return Ok(RunStats::default());
        }

        tracing::info!(path = %self.path.display(), entries = entries.len(), "Retrying failed records");

        let mut remaining = Vec::new();
        for entry in entries {
            if let IngestOutcome::Rejected(reason) = pipeline.ingest(entry.record.clone()).await {
                remaining.push(FailedEntry {
                    reason: reason.to_string(),
                    failed_at: Utc::now(),
                    ..entry
                });
            }
        }

        self.rewrite_unlocked(&remaining).await?;
        let stats = pipeline.snapshot();
        tracing::info!(
            recovered = stats.items_seen.saturating_sub(stats.items_failed),
            still_failing = remaining.len(),
            "Failed-record retry finished"
        );
        Ok(stats)
    }
}

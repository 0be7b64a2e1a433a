//! Harvest configuration
//!
//! Layered with figment: built-in defaults, then the TOML file
//! (`harvest.toml` or `--config`), then `HARVEST_*` environment variables
//! where `__` separates nested keys, e.g. `HARVEST_SCHEDULER__MAX_CONCURRENT=5`.
//!
//! ```toml
//! schedule_interval_secs = 86400
//!
//! [scheduler]
//! batch_size = 10
//! max_concurrent = 3
//! batch_timeout_secs = 3600
//! cancel_mode = "graceful"
//!
//! [pipeline]
//! progress_every = 10
//! persist = { mode = "batched", size = 100 }
//! failed_log = "logs/failed_records.jsonl"
//!
//! [[sources]]
//! name = "cntd"
//! program = "scrapy"
//! args = ["crawl", "cntd", "-a", "thematic_ids={units}"]
//! units_file = "data/thematic_ids.json"
//! pages = { start = 1, end = 50 }
//! ```

use crate::{IngestError, Result};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use harvest_common::types::PageRange;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "harvest.toml";
pub const DEFAULT_BATCH_SIZE: i64 = 10;
pub const DEFAULT_MAX_CONCURRENT: usize = 3;
pub const DEFAULT_BATCH_TIMEOUT_SECS: u64 = 3600;
pub const DEFAULT_PROGRESS_EVERY: u64 = 10;
pub const DEFAULT_PERSIST_BATCH_SIZE: usize = 100;
pub const DEFAULT_SCHEDULE_INTERVAL_SECS: u64 = 86_400;

/// Bounded retry with exponential backoff.
///
/// `max_attempts` counts the first try, so `1` means no retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub multiplier: f64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 500,
            multiplier: 2.0,
            max_backoff_ms: 30_000,
        }
    }

    pub fn attempts(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff_ms: backoff.as_millis() as u64,
            ..Self::none()
        }
    }

    /// Delay before attempt `failed + 1`, after `failed` failures.
    pub fn backoff(&self, failed: u32) -> Duration {
        let exp = failed.saturating_sub(1).min(32) as i32;
        let ms = (self.backoff_ms as f64) * self.multiplier.powi(exp);
        Duration::from_millis(ms.min(self.max_backoff_ms as f64) as u64)
    }

    fn validate(&self, field: &str) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(IngestError::config(format!("{field}.max_attempts must be at least 1")));
        }
        if !(self.multiplier >= 1.0) {
            return Err(IngestError::config(format!("{field}.multiplier must be >= 1.0")));
        }
        Ok(())
    }
}

/// What happens to running batches when a run is cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CancelMode {
    /// Running batches finish normally
    #[default]
    Graceful,
    /// Running batches are asked to abort
    Hard,
}

/// How records reach the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum PersistStrategy {
    /// One insert per record as it arrives
    #[default]
    Immediate,
    /// Buffer up to `size` records per batch and insert them together
    Batched { size: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Work units per batch
    pub batch_size: i64,
    pub max_concurrent: usize,
    /// Per-batch deadline; `0` or unset disables it
    pub batch_timeout_secs: Option<u64>,
    pub cancel_mode: CancelMode,
    pub retry: RetryPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            batch_timeout_secs: Some(DEFAULT_BATCH_TIMEOUT_SECS),
            cancel_mode: CancelMode::Graceful,
            retry: RetryPolicy::none(),
        }
    }
}

impl SchedulerConfig {
    pub fn batch_timeout(&self) -> Option<Duration> {
        self.batch_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Apply a source's overrides
    pub fn for_source(&self, source: &SourceConfig) -> SchedulerConfig {
        SchedulerConfig {
            batch_size: source.batch_size.unwrap_or(self.batch_size),
            max_concurrent: source.max_concurrent.unwrap_or(self.max_concurrent),
            batch_timeout_secs: source.batch_timeout_secs.or(self.batch_timeout_secs),
            ..self.clone()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size <= 0 {
            return Err(IngestError::config(format!(
                "batch_size must be positive, got {}",
                self.batch_size
            )));
        }
        if self.max_concurrent == 0 {
            return Err(IngestError::config("max_concurrent must be at least 1"));
        }
        self.retry.validate("scheduler.retry")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Emit a progress snapshot every this many records
    pub progress_every: u64,
    pub persist: PersistStrategy,
    /// Retry for transient store errors
    pub store_retry: RetryPolicy,
    /// Skip keys already saved in this process before asking the store
    pub dedup_prefilter: bool,
    /// JSON-lines file receiving records the store rejected
    pub failed_log: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            progress_every: DEFAULT_PROGRESS_EVERY,
            persist: PersistStrategy::Immediate,
            store_retry: RetryPolicy::none(),
            dedup_prefilter: false,
            failed_log: None,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.progress_every == 0 {
            return Err(IngestError::config("progress_every must be at least 1"));
        }
        if self.persist == (PersistStrategy::Batched { size: 0 }) {
            return Err(IngestError::config("persist.size must be at least 1"));
        }
        self.store_retry.validate("pipeline.store_retry")
    }
}

/// External harvester definition for one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    /// Executable spawned once per batch
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// JSON array of work unit ids or objects; without it the source is
    /// harvested as a single unit named after itself
    #[serde(default)]
    pub units_file: Option<PathBuf>,
    #[serde(default)]
    pub pages: Option<PageRange>,
    #[serde(default)]
    pub batch_size: Option<i64>,
    #[serde(default)]
    pub max_concurrent: Option<usize>,
    #[serde(default)]
    pub batch_timeout_secs: Option<u64>,
}

impl SourceConfig {
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
            units_file: None,
            pages: None,
            batch_size: None,
            max_concurrent: None,
            batch_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub scheduler: SchedulerConfig,
    pub pipeline: PipelineConfig,
    /// Period of the daemon loop that runs `scheduled` sources
    pub schedule_interval_secs: u64,
    pub sources: Vec<SourceConfig>,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            pipeline: PipelineConfig::default(),
            schedule_interval_secs: DEFAULT_SCHEDULE_INTERVAL_SECS,
            sources: Vec::new(),
        }
    }
}

impl HarvestConfig {
    /// Load defaults, the TOML file and `HARVEST_*` overrides, then validate.
    ///
    /// An explicitly given file must exist; the default `harvest.toml` is
    /// optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) if !p.exists() => {
                return Err(IngestError::config(format!(
                    "config file {} does not exist",
                    p.display()
                )));
            },
            Some(p) => p.to_path_buf(),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(&file))
            .merge(Env::prefixed("HARVEST_").split("__"))
            .extract()?;

        config.validate()?;
        tracing::debug!(
            file = %file.display(),
            sources = config.sources.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.scheduler.validate()?;
        self.pipeline.validate()?;

        if self.schedule_interval_secs == 0 {
            return Err(IngestError::config("schedule_interval_secs must be positive"));
        }

        let mut names = HashSet::new();
        for source in &self.sources {
            if source.name.trim().is_empty() {
                return Err(IngestError::config("source name must not be empty"));
            }
            if !names.insert(source.name.as_str()) {
                return Err(IngestError::config(format!(
                    "source '{}' is defined twice",
                    source.name
                )));
            }
            if source.program.trim().is_empty() {
                return Err(IngestError::config(format!(
                    "source '{}' has an empty harvester program",
                    source.name
                )));
            }
            self.scheduler
                .for_source(source)
                .validate()
                .map_err(|e| IngestError::config(format!("source '{}': {}", source.name, e)))?;
        }

        Ok(())
    }

    pub fn source(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.name == name)
    }

    pub fn schedule_interval(&self) -> Duration {
        Duration::from_secs(self.schedule_interval_secs)
    }
}

//! Per-source run lifecycle
//!
//! For each source: look it up in the registry, resolve its harvester and
//! work list, partition, mark it running, schedule the batches and
//! reconcile its status from the outcome. Sources run one after another;
//! concurrency lives inside a source's batch run.

use crate::config::{HarvestConfig, PipelineConfig, SchedulerConfig};
use crate::framework::{
    partition_with_pages, BatchScheduler, FailedRecordLog, Harvester, IngestionPipeline,
    ProgressReporter, TracingReporter,
};
use crate::process::ProcessHarvester;
use crate::registry::SourceRegistry;
use crate::store::RecordStore;
use crate::{IngestError, Result};
use harvest_common::types::{Batch, PageRange, RunState, RunStats, SourceState, WorkUnit};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Where a source's work units come from
#[derive(Debug, Clone, PartialEq)]
pub enum WorkList {
    /// JSON array of ids or unit objects
    File(PathBuf),
    Units(Vec<WorkUnit>),
    /// One unit named after the source
    Single,
}

/// Everything needed to harvest one source
#[derive(Clone)]
pub struct SourcePlan {
    pub harvester: Arc<dyn Harvester>,
    pub work: WorkList,
    pub pages: Option<PageRange>,
    pub scheduler: SchedulerConfig,
}

impl SourcePlan {
    pub fn new(harvester: Arc<dyn Harvester>, work: WorkList, scheduler: SchedulerConfig) -> Self {
        Self {
            harvester,
            work,
            pages: None,
            scheduler,
        }
    }

    async fn load_units(&self, source: &str) -> Result<Vec<WorkUnit>> {
        match &self.work {
            WorkList::Units(units) => Ok(units.clone()),
            WorkList::Single => Ok(vec![WorkUnit::new(source)]),
            WorkList::File(path) => {
                let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
                    IngestError::config(format!("cannot read work units from {}: {e}", path.display()))
                })?;
                serde_json::from_str(&raw).map_err(|e| {
                    IngestError::config(format!("invalid work unit file {}: {e}", path.display()))
                })
            },
        }
    }
}

/// A source that passed every check and is ready to dispatch
struct PreparedRun<'a> {
    name: String,
    status: SourceState,
    plan: &'a SourcePlan,
    batches: Vec<Batch>,
}

pub struct Orchestrator {
    store: Arc<dyn RecordStore>,
    registry: Arc<dyn SourceRegistry>,
    pipeline_config: PipelineConfig,
    failed_log: Option<Arc<FailedRecordLog>>,
    reporter: Arc<dyn ProgressReporter>,
    plans: BTreeMap<String, SourcePlan>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn RecordStore>,
        registry: Arc<dyn SourceRegistry>,
        pipeline_config: PipelineConfig,
    ) -> Self {
        let failed_log = pipeline_config
            .failed_log
            .as_ref()
            .map(|path| Arc::new(FailedRecordLog::new(path)));
        Self {
            store,
            registry,
            pipeline_config,
            failed_log,
            reporter: Arc::new(TracingReporter),
            plans: BTreeMap::new(),
        }
    }

    /// Orchestrator with a process harvester for every configured source
    pub fn from_config(
        config: &HarvestConfig,
        store: Arc<dyn RecordStore>,
        registry: Arc<dyn SourceRegistry>,
    ) -> Self {
        config.sources.iter().fold(
            Self::new(store, registry, config.pipeline.clone()),
            |orchestrator, source| {
                let work = match &source.units_file {
                    Some(path) => WorkList::File(path.clone()),
                    None => WorkList::Single,
                };
                let plan = SourcePlan {
                    harvester: Arc::new(ProcessHarvester::new(source.clone())),
                    work,
                    pages: source.pages,
                    scheduler: config.scheduler.for_source(source),
                };
                orchestrator.with_source(source.name.clone(), plan)
            },
        )
    }

    pub fn with_source(mut self, name: impl Into<String>, plan: SourcePlan) -> Self {
        self.plans.insert(name.into(), plan);
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn registry(&self) -> &Arc<dyn SourceRegistry> {
        &self.registry
    }

    pub fn has_plan(&self, name: &str) -> bool {
        self.plans.contains_key(name)
    }

    /// Make sure every source with a harvester has a registry row.
    pub async fn sync_registry(&self) -> Result<()> {
        for name in self.plans.keys() {
            let status = self.registry.register(name, SourceState::Enabled).await?;
            tracing::debug!(source = %name, status = %status.status, "Source registered");
        }
        Ok(())
    }

    fn pipeline(&self, label: &str) -> IngestionPipeline {
        let pipeline =
            IngestionPipeline::new(self.store.clone(), self.registry.clone(), &self.pipeline_config)
                .with_label(label)
                .with_reporter(self.reporter.clone());
        match &self.failed_log {
            Some(log) => pipeline.with_failed_log(log.clone()),
            None => pipeline,
        }
    }

    fn plan(&self, name: &str) -> Result<&SourcePlan> {
        self.plans
            .get(name)
            .ok_or_else(|| IngestError::config(format!("no harvester configured for source '{name}'")))
    }

    /// Best-effort registry write; failures never abort a run
    async fn mark(&self, name: &str, run_state: RunState, status: Option<SourceState>) {
        if let Err(e) = self.registry.set_run_state(name, run_state).await {
            tracing::warn!(source = %name, error = %e, "Failed to update run state");
        }
        if let Some(status) = status {
            if let Err(e) = self.registry.set_status(name, status).await {
                tracing::warn!(source = %name, error = %e, "Failed to update source status");
            }
        }
    }

    /// Everything that can fail on configuration, done before any batch runs.
    ///
    /// Returns `None` for a disabled source.
    async fn prepare(&self, name: &str) -> Result<Option<PreparedRun<'_>>> {
        let status = self.registry.get(name).await?;
        if !status.status.is_runnable() {
            tracing::info!(source = %name, "Source disabled, skipping");
            return Ok(None);
        }

        let plan = self.plan(name)?;
        plan.scheduler.validate()?;
        let units = plan.load_units(name).await?;
        let batches = partition_with_pages(units, plan.scheduler.batch_size, plan.pages)?;

        Ok(Some(PreparedRun {
            name: name.to_string(),
            status: status.status,
            plan,
            batches,
        }))
    }

    /// Harvest one source. Disabled sources are skipped with empty stats.
    pub async fn run_source(&self, name: &str, cancel: CancellationToken) -> Result<RunStats> {
        match self.prepare(name).await? {
            Some(run) => self.execute(run, cancel).await,
            None => Ok(RunStats::default()),
        }
    }

    async fn execute(&self, run: PreparedRun<'_>, cancel: CancellationToken) -> Result<RunStats> {
        let PreparedRun {
            name,
            status,
            plan,
            batches,
        } = run;
        let name = name.as_str();

        tracing::info!(source = %name, batches = batches.len(), "Starting source run");
        self.mark(name, RunState::Running, None).await;

        let scheduler = BatchScheduler::new(plan.scheduler.clone(), self.pipeline_config.persist);
        let pipeline = Arc::new(self.pipeline(name));
        let stats = match scheduler.run(batches, plan.harvester.clone(), pipeline, cancel).await {
            Ok(stats) => stats,
            Err(e) => {
                self.mark(name, RunState::Error, None).await;
                return Err(e);
            },
        };

        if stats.all_batches_failed() {
            tracing::error!(
                source = %name,
                batches_failed = stats.batches_failed,
                "Every batch failed"
            );
            self.mark(name, RunState::Error, Some(SourceState::Error)).await;
        } else {
            let recovered = (status == SourceState::Error && stats.batches_succeeded > 0)
                .then_some(SourceState::Scheduled);
            self.mark(name, RunState::Idle, recovered).await;
        }

        tracing::info!(
            source = %name,
            saved = stats.items_saved,
            duplicate = stats.items_duplicate,
            failed = stats.items_failed,
            batches_succeeded = stats.batches_succeeded,
            batches_failed = stats.batches_failed,
            "Source run finished"
        );
        Ok(stats)
    }

    /// Check every name, then prepare every source, before running any.
    async fn prepare_all(&self, names: &[String]) -> Result<Vec<PreparedRun<'_>>> {
        if names.is_empty() {
            return Err(IngestError::config("no sources given"));
        }
        for name in names {
            self.registry.get(name).await?;
            self.plan(name)?;
        }

        let mut runs = Vec::with_capacity(names.len());
        for name in names {
            if let Some(run) = self.prepare(name).await? {
                runs.push(run);
            }
        }
        Ok(runs)
    }

    /// Run the named sources in order and merge their stats.
    ///
    /// Unknown sources, sources without a harvester, bad scheduler settings
    /// and unreadable work lists fail the call before anything runs.
    /// Cancellation stops before the next source.
    pub async fn run_now(&self, names: &[String], cancel: CancellationToken) -> Result<RunStats> {
        let runs = self.prepare_all(names).await?;

        let mut total = RunStats::default();
        for run in runs {
            if cancel.is_cancelled() {
                tracing::warn!(source = %run.name, "Run cancelled, not starting source");
                break;
            }
            let name = run.name.clone();
            match self.execute(run, cancel.clone()).await {
                Ok(stats) => total.merge(&stats),
                Err(e) => {
                    tracing::error!(source = %name, error = %e, "Source run failed");
                    return Err(e);
                },
            }
        }
        Ok(total)
    }

    /// Run every source whose status is `scheduled`.
    pub async fn run_scheduled(&self, cancel: CancellationToken) -> Result<RunStats> {
        let scheduled: Vec<String> = self
            .registry
            .list()
            .await?
            .into_iter()
            .filter(|s| s.status == SourceState::Scheduled)
            .map(|s| s.name)
            .collect();

        let mut total = RunStats::default();
        for name in scheduled {
            if cancel.is_cancelled() {
                break;
            }
            if !self.has_plan(&name) {
                tracing::warn!(source = %name, "Scheduled source has no harvester configured");
                continue;
            }
            // One broken source must not stop the others
            match self.run_source(&name, cancel.clone()).await {
                Ok(stats) => total.merge(&stats),
                Err(e) => tracing::error!(source = %name, error = %e, "Scheduled run failed"),
            }
        }
        Ok(total)
    }

    /// Run scheduled sources now and then every `interval` until cancelled.
    pub async fn run_periodic(&self, interval: Duration, cancel: CancellationToken) -> Result<()> {
        tracing::info!(interval_secs = interval.as_secs(), "Periodic scheduler started");
        loop {
            let stats = self.run_scheduled(cancel.clone()).await?;
            tracing::info!(
                saved = stats.items_saved,
                batches_failed = stats.batches_failed,
                "Scheduled cycle finished"
            );
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {},
            }
        }
        tracing::info!("Periodic scheduler stopped");
        Ok(())
    }

    /// Re-ingest everything in the failed-record log.
    pub async fn retry_failed(&self) -> Result<RunStats> {
        let log = self
            .failed_log
            .as_ref()
            .ok_or_else(|| IngestError::config("pipeline.failed_log is not configured"))?;
        let pipeline =
            IngestionPipeline::new(self.store.clone(), self.registry.clone(), &self.pipeline_config)
                .with_label("retry-failed")
                .with_reporter(self.reporter.clone());
        Ok(log.retry(&pipeline).await?)
    }
}

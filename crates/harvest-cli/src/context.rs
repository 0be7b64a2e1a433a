//! Wiring shared by every command: configuration, pool and orchestrator

use crate::error::Result;
use harvest_ingest::config::CancelMode;
use harvest_ingest::db::{self, DbConfig};
use harvest_ingest::{
    ControlSurface, HarvestConfig, Orchestrator, PgRecordStore, PgSourceRegistry,
};
use sqlx::PgPool;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct AppContext {
    pub config: HarvestConfig,
    pool: PgPool,
    orchestrator: Arc<Orchestrator>,
}

impl AppContext {
    /// Load configuration; see [`HarvestConfig::load`]
    pub fn load_config(path: Option<&Path>) -> Result<HarvestConfig> {
        Ok(HarvestConfig::load(path)?)
    }

    /// Connect to PostgreSQL and build an orchestrator over `config`.
    pub async fn connect(config: HarvestConfig) -> Result<Self> {
        let pool = db::create_pool(&DbConfig::from_env()?).await?;

        let orchestrator = Orchestrator::from_config(
            &config,
            Arc::new(PgRecordStore::new(pool.clone())),
            Arc::new(PgSourceRegistry::new(pool.clone())),
        );

        Ok(Self {
            config,
            pool,
            orchestrator: Arc::new(orchestrator),
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn control(&self) -> ControlSurface {
        ControlSurface::new(self.orchestrator.clone())
    }

    /// Register configured sources that the registry does not know yet
    pub async fn sync_registry(&self) -> Result<()> {
        Ok(self.orchestrator.sync_registry().await?)
    }
}

/// Switch running batches to abort on cancel
pub fn hard_cancel(mut config: HarvestConfig) -> HarvestConfig {
    config.scheduler.cancel_mode = CancelMode::Hard;
    config
}

/// Token cancelled on the first Ctrl-C
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling");
            eprintln!("Interrupted, cancelling run...");
            trigger.cancel();
        }
    });
    token
}

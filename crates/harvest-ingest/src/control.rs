//! Operator control surface
//!
//! Name lists are checked up front: one unknown name fails the whole call
//! and nothing is changed.

use crate::orchestrator::Orchestrator;
use crate::registry::RegistryError;
use crate::{IngestError, Result};
use harvest_common::types::{RunStats, SourceState, SourceStatus};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct ControlSurface {
    orchestrator: Arc<Orchestrator>,
}

impl ControlSurface {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    pub async fn status(&self) -> Result<Vec<SourceStatus>> {
        Ok(self.orchestrator.registry().list().await?)
    }

    pub async fn enable(&self, names: &[String]) -> Result<()> {
        self.set_all(names, SourceState::Enabled).await
    }

    pub async fn disable(&self, names: &[String]) -> Result<()> {
        self.set_all(names, SourceState::Disabled).await
    }

    /// Hand sources to the periodic scheduler
    pub async fn schedule(&self, names: &[String]) -> Result<()> {
        self.set_all(names, SourceState::Scheduled).await
    }

    pub async fn register(&self, name: &str, status: SourceState) -> Result<SourceStatus> {
        let name = name.trim();
        if name.is_empty() {
            return Err(IngestError::config("source name must not be empty"));
        }
        Ok(self.orchestrator.registry().register(name, status).await?)
    }

    pub async fn run_now(&self, names: &[String], cancel: CancellationToken) -> Result<RunStats> {
        self.orchestrator.run_now(names, cancel).await
    }

    async fn set_all(&self, names: &[String], status: SourceState) -> Result<()> {
        let registry = self.orchestrator.registry();

        let mut missing = Vec::new();
        for name in names {
            match registry.get(name).await {
                Ok(_) => {},
                Err(RegistryError::NotFound(_)) => missing.push(name.as_str()),
                Err(e) => return Err(e.into()),
            }
        }
        if !missing.is_empty() {
            return Err(RegistryError::NotFound(missing.join(", ")).into());
        }

        for name in names {
            registry.set_status(name, status).await?;
            tracing::info!(source = %name, status = %status, "Source status changed");
        }
        Ok(())
    }
}

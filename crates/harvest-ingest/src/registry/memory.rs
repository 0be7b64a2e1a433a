use super::{RegistryError, RegistryResult, SourceRegistry};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use harvest_common::types::{RunState, SourceState, SourceStatus};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// In-process registry for tests and dry runs
#[derive(Debug, Default)]
pub struct MemorySourceRegistry {
    sources: Mutex<BTreeMap<String, SourceStatus>>,
}

impl MemorySourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sources<'a>(sources: impl IntoIterator<Item = (&'a str, SourceState)>) -> Self {
        let map = sources
            .into_iter()
            .map(|(name, status)| (name.to_string(), SourceStatus::new(name, status)))
            .collect();
        Self {
            sources: Mutex::new(map),
        }
    }

    fn update<F>(&self, name: &str, f: F) -> RegistryResult<()>
    where
        F: FnOnce(&mut SourceStatus),
    {
        let mut sources = self.sources.lock().unwrap_or_else(|e| e.into_inner());
        let entry = sources
            .get_mut(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        f(entry);
        Ok(())
    }
}

#[async_trait]
impl SourceRegistry for MemorySourceRegistry {
    async fn get(&self, name: &str) -> RegistryResult<SourceStatus> {
        let sources = self.sources.lock().unwrap_or_else(|e| e.into_inner());
        sources
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    async fn list(&self) -> RegistryResult<Vec<SourceStatus>> {
        let sources = self.sources.lock().unwrap_or_else(|e| e.into_inner());
        Ok(sources.values().cloned().collect())
    }

    async fn set_status(&self, name: &str, status: SourceState) -> RegistryResult<()> {
        self.update(name, |s| s.status = status)
    }

    async fn heartbeat(&self, name: &str, at: DateTime<Utc>) -> RegistryResult<()> {
        let mut sources = self.sources.lock().unwrap_or_else(|e| e.into_inner());
        let entry = sources
            .entry(name.to_string())
            .or_insert_with(|| SourceStatus::new(name, SourceState::Enabled));
        if entry.last_update.is_none_or(|current| at >= current) {
            entry.last_update = Some(at);
        }
        Ok(())
    }

    async fn register(&self, name: &str, status: SourceState) -> RegistryResult<SourceStatus> {
        let mut sources = self.sources.lock().unwrap_or_else(|e| e.into_inner());
        Ok(sources
            .entry(name.to_string())
            .or_insert_with(|| SourceStatus::new(name, status))
            .clone())
    }

    async fn set_run_state(&self, name: &str, state: RunState) -> RegistryResult<()> {
        self.update(name, |s| s.run_state = state)
    }
}

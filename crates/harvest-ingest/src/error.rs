//! Top-level error type for runs, control calls and configuration

use crate::registry::RegistryError;
use crate::store::StoreError;
use harvest_common::HarvestError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Error, Debug)]
pub enum IngestError {
    /// Invalid settings; nothing was started
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Common(#[from] HarvestError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IngestError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn is_config(&self) -> bool {
        match self {
            Self::Config(_) => true,
            Self::Common(e) => e.is_config(),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Registry(RegistryError::NotFound(_)))
    }
}

impl From<figment::Error> for IngestError {
    fn from(err: figment::Error) -> Self {
        Self::Config(err.to_string())
    }
}

//! Error types for the harvest CLI
//!
//! Messages are user-facing and end with a hint on what to do next.

use harvest_common::HarvestError;
use harvest_ingest::db::DbError;
use harvest_ingest::IngestError;
use thiserror::Error;

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Error, Debug)]
pub enum CliError {
    /// Source name unknown to the registry
    #[error("Source not found: {0}. Run 'harvest status' to list sources or 'harvest register' to add one.")]
    SourceNotFound(String),

    /// Configuration is missing or invalid
    #[error("Configuration error: {0}. Check harvest.toml and HARVEST_* environment variables.")]
    Config(String),

    /// Database could not be reached or rejected a statement
    #[error("Database error: {0}. Check DATABASE_URL and that 'harvest migrate' has been run.")]
    Database(String),

    /// Anything else the engine reported
    #[error(transparent)]
    Ingest(IngestError),

    #[error("Failed to write output: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl CliError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

impl From<IngestError> for CliError {
    fn from(err: IngestError) -> Self {
        use harvest_ingest::registry::RegistryError;

        match err {
            IngestError::Registry(RegistryError::NotFound(names)) => Self::SourceNotFound(names),
            IngestError::Registry(RegistryError::Database(e)) | IngestError::Database(e) => {
                Self::Database(e.to_string())
            },
            IngestError::Migrate(e) => Self::Database(e.to_string()),
            err if err.is_config() => Self::Config(config_message(err)),
            err => Self::Ingest(err),
        }
    }
}

impl From<DbError> for CliError {
    fn from(err: DbError) -> Self {
        IngestError::from(err).into()
    }
}

fn config_message(err: IngestError) -> String {
    match err {
        IngestError::Config(msg) | IngestError::Common(HarvestError::Config(msg)) => msg,
        other => other.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use harvest_ingest::registry::RegistryError;

    #[test]
    fn test_not_found_gets_a_hint() {
        let err: CliError = IngestError::from(RegistryError::NotFound("ghost".into())).into();
        assert!(matches!(err, CliError::SourceNotFound(_)));
        assert!(err.to_string().contains("harvest status"));
    }

    #[test]
    fn test_config_errors_are_unwrapped() {
        let err: CliError = IngestError::config("max_concurrent must be at least 1").into();
        assert_eq!(
            err.to_string(),
            "Configuration error: max_concurrent must be at least 1. Check harvest.toml and HARVEST_* environment variables."
        );
    }
}

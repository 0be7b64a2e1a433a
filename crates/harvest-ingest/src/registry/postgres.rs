use super::{RegistryError, RegistryResult, SourceRegistry};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use harvest_common::types::{RunState, SourceState, SourceStatus};
use sqlx::PgPool;

/// Registry backed by the `source_status` table
#[derive(Debug, Clone)]
pub struct PgSourceRegistry {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct SourceRow {
    name: String,
    status: String,
    run_state: String,
    last_update: Option<DateTime<Utc>>,
}

impl TryFrom<SourceRow> for SourceStatus {
    type Error = RegistryError;

    fn try_from(row: SourceRow) -> Result<Self, Self::Error> {
        let corrupt = |reason: String| RegistryError::Corrupt {
            name: row.name.clone(),
            reason,
        };
        let status = row.status.parse::<SourceState>().map_err(|e| corrupt(e.to_string()))?;
        let run_state = row.run_state.parse::<RunState>().map_err(|e| corrupt(e.to_string()))?;
        Ok(SourceStatus {
            name: row.name,
            status,
            run_state,
            last_update: row.last_update,
        })
    }
}

impl PgSourceRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn expect_row(name: &str, rows_affected: u64) -> RegistryResult<()> {
        if rows_affected == 0 {
            return Err(RegistryError::NotFound(name.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SourceRegistry for PgSourceRegistry {
    async fn get(&self, name: &str) -> RegistryResult<SourceStatus> {
        let row = sqlx::query_as::<_, SourceRow>(
            r#"
            SELECT name, status, run_state, last_update
            FROM source_status
            WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;

        row.try_into()
    }

    async fn list(&self) -> RegistryResult<Vec<SourceStatus>> {
        let rows = sqlx::query_as::<_, SourceRow>(
            r#"
            SELECT name, status, run_state, last_update
            FROM source_status
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SourceStatus::try_from).collect()
    }

    async fn set_status(&self, name: &str, status: SourceState) -> RegistryResult<()> {
        let result = sqlx::query("UPDATE source_status SET status = $2 WHERE name = $1")
            .bind(name)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;

        Self::expect_row(name, result.rows_affected())
    }

    async fn heartbeat(&self, name: &str, at: DateTime<Utc>) -> RegistryResult<()> {
        // GREATEST skips NULL, so the first heartbeat always lands
        sqlx::query(
            r#"
            INSERT INTO source_status (name, status, last_update)
            VALUES ($1, 'enabled', $2)
            ON CONFLICT (name) DO UPDATE
            SET last_update = GREATEST(source_status.last_update, EXCLUDED.last_update)
            "#,
        )
        .bind(name)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn register(&self, name: &str, status: SourceState) -> RegistryResult<SourceStatus> {
        sqlx::query(
            r#"
            INSERT INTO source_status (name, status)
            VALUES ($1, $2)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(name)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        self.get(name).await
    }

    async fn set_run_state(&self, name: &str, state: RunState) -> RegistryResult<()> {
        let result = sqlx::query("UPDATE source_status SET run_state = $2 WHERE name = $1")
            .bind(name)
            .bind(state.as_str())
            .execute(&self.pool)
            .await?;

        Self::expect_row(name, result.rows_affected())
    }
}

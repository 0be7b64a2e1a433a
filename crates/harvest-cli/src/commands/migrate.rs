//! `harvest migrate` command implementation

use crate::context::AppContext;
use crate::error::Result;
use colored::Colorize;
use harvest_ingest::db;

/// Apply pending migrations and check the connection
pub async fn run(ctx: &AppContext) -> Result<()> {
    db::run_migrations(ctx.pool()).await?;
    db::health_check(ctx.pool()).await?;
    println!("{} Database schema is up to date", "✓".green());
    Ok(())
}

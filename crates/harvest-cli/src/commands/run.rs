//! `harvest run|daemon|retry-failed` command implementations

use crate::context::{cancel_on_ctrl_c, AppContext};
use crate::error::Result;
use crate::output;
use std::time::Duration;

/// Harvest the named sources now
pub async fn run(ctx: &AppContext, names: &[String]) -> Result<()> {
    let cancel = cancel_on_ctrl_c();
    let stats = ctx.orchestrator().run_now(names, cancel.clone()).await?;

    print!("{}", output::stats_table(&stats));
    println!("{}", output::run_summary(&stats));
    if cancel.is_cancelled() {
        println!("Run was interrupted; remaining batches were skipped.");
    }
    Ok(())
}

/// Run scheduled sources every interval until Ctrl-C
pub async fn daemon(ctx: &AppContext, interval: Option<u64>) -> Result<()> {
    let interval = interval
        .map(Duration::from_secs)
        .unwrap_or_else(|| ctx.config.schedule_interval());
    if interval.is_zero() {
        return Err(crate::CliError::config("--interval must be positive"));
    }

    println!("Running scheduled sources every {}s (Ctrl-C to stop)", interval.as_secs());
    ctx.orchestrator().run_periodic(interval, cancel_on_ctrl_c()).await?;
    Ok(())
}

/// Re-ingest the failed-record log
pub async fn retry_failed(ctx: &AppContext) -> Result<()> {
    let stats = ctx.orchestrator().retry_failed().await?;
    if stats.items_seen == 0 {
        println!("Failed-record log is empty.");
        return Ok(());
    }
    print!("{}", output::stats_table(&stats));
    println!(
        "Recovered {} of {} records; {} still failing",
        stats.items_saved + stats.items_duplicate + stats.items_updated,
        stats.items_seen,
        stats.items_failed
    );
    Ok(())
}

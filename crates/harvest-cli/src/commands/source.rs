//! `harvest register|enable|disable|schedule` command implementations

use crate::context::AppContext;
use crate::error::Result;
use colored::Colorize;
use harvest_common::types::SourceState;

pub async fn register(ctx: &AppContext, name: &str, status: SourceState) -> Result<()> {
    let row = ctx.control().register(name, status).await?;
    if row.status == status {
        println!("{} Registered source: {} ({})", "✓".green(), row.name, row.status);
    } else {
        println!(
            "{} Source already registered: {} ({})",
            "✓".green(),
            row.name,
            row.status
        );
    }
    Ok(())
}

pub async fn enable(ctx: &AppContext, names: &[String]) -> Result<()> {
    ctx.control().enable(names).await?;
    report(names, SourceState::Enabled);
    Ok(())
}

pub async fn disable(ctx: &AppContext, names: &[String]) -> Result<()> {
    ctx.control().disable(names).await?;
    report(names, SourceState::Disabled);
    Ok(())
}

pub async fn schedule(ctx: &AppContext, names: &[String]) -> Result<()> {
    ctx.control().schedule(names).await?;
    report(names, SourceState::Scheduled);
    Ok(())
}

fn report(names: &[String], status: SourceState) {
    for name in names {
        println!("{} {} -> {}", "✓".green(), name, status);
    }
}

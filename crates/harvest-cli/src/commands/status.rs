//! `harvest status` command implementation

use crate::context::AppContext;
use crate::error::Result;
use crate::output;

/// Show every registered source
pub async fn run(ctx: &AppContext, json: bool) -> Result<()> {
    let sources = ctx.control().status().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&sources)?);
        return Ok(());
    }

    if sources.is_empty() {
        println!("No sources registered.");
        println!("Add [[sources]] to harvest.toml or run 'harvest register <name>'.");
        return Ok(());
    }

    print!("{}", output::status_table(&sources));
    Ok(())
}

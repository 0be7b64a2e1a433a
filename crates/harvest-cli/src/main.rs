//! Harvest CLI - Main entry point

use clap::Parser;
use harvest_cli::commands;
use harvest_cli::context::{hard_cancel, AppContext};
use harvest_cli::{Cli, Commands};
use harvest_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use std::process;
use tracing::error;

#[tokio::main]
async fn main() {
    // .env is optional
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Verbose: debug to console. Otherwise warnings only; LOG_* still wins.
    let level = if cli.verbose { LogLevel::Debug } else { LogLevel::Warn };
    let log_config = LogConfig::builder()
        .level(level)
        .output(LogOutput::Console)
        .log_file_prefix("harvest-cli")
        .build()
        .merge_env();
    let log_config = match log_config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: invalid logging configuration: {e:#}");
            process::exit(2);
        },
    };

    // The CLI works without logging
    let _guard = init_logging(&log_config).ok();

    if let Err(e) = execute_command(&cli).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

/// Execute the CLI command
async fn execute_command(cli: &Cli) -> harvest_cli::Result<()> {
    let mut config = AppContext::load_config(cli.config.as_deref())?;
    if let Commands::Run { hard_cancel: true, .. } = cli.command {
        config = hard_cancel(config);
    }
    let ctx = AppContext::connect(config).await?;

    if !matches!(cli.command, Commands::Migrate) {
        ctx.sync_registry().await?;
    }

    match &cli.command {
        Commands::Migrate => commands::migrate::run(&ctx).await,

        Commands::Status { json } => commands::status::run(&ctx, *json).await,

        Commands::Register { name, status } => {
            commands::source::register(&ctx, name, *status).await
        },

        Commands::Enable { names } => commands::source::enable(&ctx, names).await,

        Commands::Disable { names } => commands::source::disable(&ctx, names).await,

        Commands::Schedule { names } => commands::source::schedule(&ctx, names).await,

        Commands::Run { names, .. } => commands::run::run(&ctx, names).await,

        Commands::Daemon { interval } => commands::run::daemon(&ctx, *interval).await,

        Commands::RetryFailed => commands::run::retry_failed(&ctx).await,
    }
}

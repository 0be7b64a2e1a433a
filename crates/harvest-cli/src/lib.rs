//! Harvest CLI Library
//!
//! Operator commands for the harvesting engine:
//!
//! - **Schema**: apply database migrations (`harvest migrate`)
//! - **Sources**: list, register and switch sources (`harvest status`,
//!   `harvest register`, `harvest enable/disable/schedule`)
//! - **Runs**: harvest sources now (`harvest run`) or on the schedule
//!   (`harvest daemon`)
//! - **Recovery**: re-ingest records the store rejected (`harvest retry-failed`)
#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod commands;
pub mod context;
pub mod error;
pub mod output;

pub use context::AppContext;
pub use error::{CliError, Result};

use clap::{Parser, Subcommand};
use harvest_common::types::SourceState;
use std::path::PathBuf;

/// Harvest - news and legal document harvesting
#[derive(Parser, Debug)]
#[command(name = "harvest")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (defaults to harvest.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Apply database migrations
    Migrate,

    /// Show every source with its status and last update
    Status {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Add a source to the registry if it is not there yet
    Register {
        name: String,

        /// Initial status (enabled, disabled, scheduled)
        #[arg(short, long, default_value = "enabled")]
        status: SourceState,
    },

    /// Allow sources to run
    Enable {
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Stop sources from running
    Disable {
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Hand sources to the periodic scheduler
    Schedule {
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Harvest sources now, one after another
    Run {
        #[arg(required = true)]
        names: Vec<String>,

        /// On Ctrl-C, abort running batches instead of letting them finish
        #[arg(long)]
        hard_cancel: bool,
    },

    /// Run scheduled sources periodically until interrupted
    Daemon {
        /// Seconds between cycles (overrides schedule_interval_secs)
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Re-ingest records from the failed-record log
    RetryFailed,
}

//! CLI command implementations
//!
//! Each subcommand group has its own module.

pub mod migrate;
pub mod run;
pub mod source;
pub mod status;

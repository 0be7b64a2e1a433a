//! Harvest Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the harvest workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`HarvestError`] and the [`Result`] alias
//! - **Logging**: `tracing` subscriber setup driven by [`logging::LogConfig`]
//! - **Types**: work units, batches, records, source status and run counters
//! - **Identity**: url normalization and the `(source, url)` identity key
//!
//! # Example
//!
//! ```no_run
//! use harvest_common::identity::IdentityKey;
//!
//! fn key() -> harvest_common::Result<()> {
//!     let key = IdentityKey::new("lenta", "HTTPS://Lenta.ru/news/1/?utm_source=x")?;
//!     assert_eq!(key.url, "https://lenta.ru/news/1");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod identity;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{HarvestError, Result};

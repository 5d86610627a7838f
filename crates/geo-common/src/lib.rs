//! Geo Common Library
//!
//! Shared error types, logging setup and file helpers for the geo ingestion workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`GeoError`], the [`Result`] alias and the [`ErrorCategory`]
//!   attached to every failure report
//! - **Logging**: [`logging::LogConfig`] and [`logging::init_logging`]
//! - **Files**: line counting and local naming of downloaded resources
//!
//! # Example
//!
//! ```no_run
//! use geo_common::files::count_lines;
//!
//! fn report(path: &str) -> geo_common::Result<()> {
//!     let lines = count_lines(path)?;
//!     tracing::info!(lines, "master file ready");
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod error;
pub mod files;
pub mod logging;

// Re-export commonly used types
pub use error::{ErrorCategory, GeoError, Result};

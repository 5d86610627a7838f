//! Geo Ingest Library
//!
//! Staged bulk ingestion of geographic reference datasets with zero read downtime.
//!
//! # Supported Datasets
//!
//! - **Geonames**: the global gazetteer, one archive per country or `allCountries`
//! - **Geo IP**: IPv4 and IPv6 range to location tables
//!
//! Each run fetches the source archives, decompresses them, merges the partitions
//! into one master file, loads it into a staging table and atomically swaps the
//! staging table in as the live table.
//!
//! # Example
//!
//! ```no_run
//! use geo_ingest::{DatasetKind, IngestConfig, IngestionPipeline};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::load()?;
//!     let pipeline = IngestionPipeline::connect(config).await?;
//!
//!     let report = pipeline.run_dataset(DatasetKind::Geonames).await;
//!     println!("geonames finished in stage {}", report.stage);
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod backend;
pub mod config;
pub mod dataset;
pub mod decompress;
pub mod error;
pub mod fetch;
pub mod load;
pub mod merge;
pub mod pipeline;
pub mod report;
pub mod swap;

pub use config::IngestConfig;
pub use dataset::DatasetKind;
pub use error::{IngestError, Result};
pub use pipeline::{DatasetReport, IngestionPipeline, Stage};

//! Loading the master file into the staging table
//!
//! [`select_loader`] picks one strategy per run: [`BulkLoader`] when the backend
//! offers a native file load and the configuration allows it, otherwise
//! [`BatchedInsertLoader`].

pub mod batched;
pub mod bulk;
pub mod record;

use crate::backend::StorageBackend;
use crate::config::IngestConfig;
use crate::dataset::DatasetKind;
use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

pub use batched::BatchedInsertLoader;
pub use bulk::BulkLoader;

/// Outcome of one load into staging
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    /// Rows the backend reported as written
    pub rows_loaded: u64,
    /// Rows counted in the staging table afterwards
    pub rows_in_staging: u64,
    pub batches: u64,
    pub failed_batches: u64,
    /// Source records that could not be mapped onto the schema
    pub skipped_records: u64,
}

#[async_trait]
pub trait StagingLoader: Send + Sync {
    fn name(&self) -> &'static str;

    /// Load `master` into `table`, which must exist and be empty
    async fn load(&self, kind: DatasetKind, table: &str, master: &Path) -> Result<LoadSummary>;
}

/// Choose the loader for this run from the backend's capability
pub fn select_loader(backend: Arc<dyn StorageBackend>, config: &IngestConfig) -> Box<dyn StagingLoader> {
    if config.bulk_load && backend.supports_bulk_load() {
        Box::new(BulkLoader::new(backend, config.charset.clone()))
    } else {
        Box::new(BatchedInsertLoader::new(
            backend,
            config.batch_size,
            config.strict_batches,
        ))
    }
}

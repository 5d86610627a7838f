//! Promotion of a loaded staging table to live

use crate::backend::StorageBackend;
use crate::error::{IngestError, Result};
use std::sync::Arc;
use tracing::instrument;

pub struct SwapCoordinator {
    backend: Arc<dyn StorageBackend>,
}

impl SwapCoordinator {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Replace `live` with `staging` in one atomic step.
    ///
    /// Only call after a successful load. The previous live table survives any
    /// failure; it is dropped in the same transaction as the rename.
    #[instrument(skip(self))]
    pub async fn promote(&self, staging: &str, live: &str) -> Result<()> {
        if !self.backend.table_exists(staging).await? {
            return Err(IngestError::Swap {
                staging: staging.to_string(),
                live: live.to_string(),
                detail: "staging table does not exist".to_string(),
            });
        }

        self.backend.replace_table(staging, live).await
    }
}

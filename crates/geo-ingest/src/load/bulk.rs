//! Bulk strategy: hand the whole master file to the backend

use super::{LoadSummary, StagingLoader};
use crate::backend::{BulkLoadRequest, StorageBackend};
use crate::dataset::{DatasetKind, FileFormat, CREATED_AT, UPDATED_AT};
use crate::error::{IngestError, Result};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument};

/// Most trailing fields a source may reserve for the timestamp columns
const MAX_RESERVED_FIELDS: usize = 2;

pub struct BulkLoader {
    backend: Arc<dyn StorageBackend>,
    charset: String,
}

impl BulkLoader {
    pub fn new(backend: Arc<dyn StorageBackend>, charset: impl Into<String>) -> Self {
        Self {
            backend,
            charset: charset.into(),
        }
    }
}

/// Count the fields of the first record of `path`; `None` for an empty file
pub fn probe_field_count(path: &Path, format: &FileFormat) -> std::io::Result<Option<usize>> {
    let mut reader = format
        .reader_builder()
        .from_path(path)
        .map_err(std::io::Error::other)?;

    let mut record = csv::ByteRecord::new();
    let found = reader.read_byte_record(&mut record).map_err(std::io::Error::other)?;
    Ok(found.then(|| record.len()))
}

/// Target columns for a file whose records carry `field_count` fields.
///
/// Trailing fields beyond the schema are mapped onto the timestamp columns so
/// the backend can accept them; their values are reset after the load.
pub fn target_columns(kind: DatasetKind, field_count: usize) -> std::result::Result<Vec<&'static str>, String> {
    let mut columns = kind.column_names();
    if field_count < columns.len() {
        return Err(format!(
            "expected at least {} fields per record, found {}",
            columns.len(),
            field_count
        ));
    }

    let reserved = field_count - columns.len();
    if reserved > MAX_RESERVED_FIELDS {
        return Err(format!(
            "expected at most {} fields per record, found {}",
            columns.len() + MAX_RESERVED_FIELDS,
            field_count
        ));
    }

    columns.extend([CREATED_AT, UPDATED_AT].into_iter().take(reserved));
    Ok(columns)
}

#[async_trait]
impl StagingLoader for BulkLoader {
    fn name(&self) -> &'static str {
        "bulk"
    }

    #[instrument(skip(self, master), fields(backend = self.backend.name()))]
    async fn load(&self, kind: DatasetKind, table: &str, master: &Path) -> Result<LoadSummary> {
        let format = kind.format();
        let load_error = |detail: String| IngestError::Load {
            table: table.to_string(),
            detail,
        };

        let field_count = probe_field_count(master, &format)
            .map_err(|e| load_error(format!("cannot read {}: {}", master.display(), e)))?
            .unwrap_or(kind.columns().len());
        let columns = target_columns(kind, field_count).map_err(load_error)?;
        let reset_timestamps = columns.len() > kind.columns().len();

        let request = BulkLoadRequest {
            table,
            path: master,
            format,
            columns,
            charset: &self.charset,
            reset_timestamps,
        };

        let rows_loaded = self.backend.bulk_load(&request).await?;
        let rows_in_staging = self.backend.row_count(table).await?;

        info!(dataset = %kind, rows_loaded, rows_in_staging, "Bulk loaded staging table");

        Ok(LoadSummary {
            rows_loaded,
            rows_in_staging,
            batches: 1,
            ..Default::default()
        })
    }
}

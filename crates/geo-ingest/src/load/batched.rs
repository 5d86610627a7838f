//! Batched-insert strategy
//!
//! A blocking reader task parses the master file and hands full batches over a
//! bounded channel, so at most a few batches are held in memory. Each batch is
//! one insert statement. A failed batch is logged and skipped unless the loader
//! runs in strict mode.

use super::record::{map_record, FieldValue};
use super::{LoadSummary, StagingLoader};
use crate::backend::StorageBackend;
use crate::dataset::{DatasetKind, CREATED_AT, UPDATED_AT};
use crate::error::{IngestError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

/// Batches parsed ahead of the inserts
const BATCH_QUEUE_DEPTH: usize = 2;

struct Batch {
    /// 1-based line of the first record in the batch
    first_line: u64,
    rows: Vec<Vec<FieldValue>>,
}

pub struct BatchedInsertLoader {
    backend: Arc<dyn StorageBackend>,
    batch_size: usize,
    strict: bool,
}

impl BatchedInsertLoader {
    pub fn new(backend: Arc<dyn StorageBackend>, batch_size: usize, strict: bool) -> Self {
        Self {
            backend,
            batch_size: batch_size.max(1),
            strict,
        }
    }
}

/// Parse `path` into batches, returning the number of skipped records
fn read_batches(
    kind: DatasetKind,
    path: PathBuf,
    batch_size: usize,
    sender: mpsc::Sender<Batch>,
) -> std::result::Result<u64, String> {
    let mut reader = kind
        .format()
        .reader_builder()
        .from_path(&path)
        .map_err(|e| format!("cannot open {}: {}", path.display(), e))?;

    let loaded_at = Utc::now().naive_utc();
    let columns = kind.columns();
    let mut skipped = 0u64;
    let mut line = 0u64;
    let mut batch = Batch {
        first_line: 1,
        rows: Vec::with_capacity(batch_size),
    };

    for result in reader.records() {
        line += 1;
        let record = match result {
            Ok(record) => record,
            Err(e) if e.is_io_error() => {
                return Err(format!("cannot read {}: {}", path.display(), e));
            },
            Err(e) => {
                warn!(line, error = %e, "Skipping unreadable record");
                skipped += 1;
                continue;
            },
        };

        match map_record(columns, &record) {
            Ok(mut row) => {
                row.push(FieldValue::Timestamp(Some(loaded_at)));
                row.push(FieldValue::Timestamp(None));
                if batch.rows.is_empty() {
                    batch.first_line = line;
                }
                batch.rows.push(row);
            },
            Err(e) => {
                warn!(line, error = %e, "Skipping malformed record");
                skipped += 1;
                continue;
            },
        }

        if batch.rows.len() == batch_size {
            let full = std::mem::replace(
                &mut batch,
                Batch {
                    first_line: line + 1,
                    rows: Vec::with_capacity(batch_size),
                },
            );
            if sender.blocking_send(full).is_err() {
                // Consumer stopped early (strict mode failure)
                return Ok(skipped);
            }
        }
    }

    if !batch.rows.is_empty() {
        let _ = sender.blocking_send(batch);
    }

    Ok(skipped)
}

#[async_trait]
impl StagingLoader for BatchedInsertLoader {
    fn name(&self) -> &'static str {
        "batched"
    }

    #[instrument(skip(self, master), fields(backend = self.backend.name(), batch_size = self.batch_size))]
    async fn load(&self, kind: DatasetKind, table: &str, master: &Path) -> Result<LoadSummary> {
        let mut columns = kind.column_names();
        columns.extend([CREATED_AT, UPDATED_AT]);

        let (sender, mut receiver) = mpsc::channel(BATCH_QUEUE_DEPTH);
        let path = master.to_path_buf();
        let batch_size = self.batch_size;
        let reader = tokio::task::spawn_blocking(move || read_batches(kind, path, batch_size, sender));

        let mut summary = LoadSummary::default();

        while let Some(batch) = receiver.recv().await {
            summary.batches += 1;
            let size = batch.rows.len();

            match self.backend.insert_batch(table, &columns, &batch.rows).await {
                Ok(inserted) => {
                    summary.rows_loaded += inserted;
                    debug!(batch = summary.batches, rows = inserted, "Inserted batch");
                },
                Err(e) if self.strict => {
                    error!(batch = summary.batches, first_line = batch.first_line, error = %e, "Batch insert failed");
                    return Err(IngestError::Load {
                        table: table.to_string(),
                        detail: format!(
                            "batch {} ({} rows from line {}) failed: {}",
                            summary.batches, size, batch.first_line, e
                        ),
                    });
                },
                Err(e) => {
                    summary.failed_batches += 1;
                    warn!(
                        batch = summary.batches,
                        first_line = batch.first_line,
                        rows = size,
                        error = %e,
                        "Batch insert failed, continuing with next batch"
                    );
                },
            }
        }

        summary.skipped_records = reader
            .await
            .map_err(|e| IngestError::Load {
                table: table.to_string(),
                detail: format!("reader task failed: {}", e),
            })?
            .map_err(|detail| IngestError::Load {
                table: table.to_string(),
                detail,
            })?;

        summary.rows_in_staging = self.backend.row_count(table).await?;

        info!(
            dataset = %kind,
            rows_loaded = summary.rows_loaded,
            batches = summary.batches,
            failed_batches = summary.failed_batches,
            skipped_records = summary.skipped_records,
            "Loaded staging table in batches"
        );

        Ok(summary)
    }
}

//! Storage backends
//!
//! The pipeline talks to the database only through [`StorageBackend`]. Two
//! implementations exist: PostgreSQL, which offers a bulk file load via `COPY`,
//! and SQLite, which only accepts batched inserts.

pub mod postgres;
pub mod sqlite;

use crate::dataset::FileFormat;
use crate::error::{IngestError, Result};
use crate::load::record::FieldValue;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use url::Url;

pub use postgres::PostgresBackend;
pub use sqlite::SqliteBackend;

/// Everything a backend needs to ingest a master file natively
#[derive(Debug, Clone)]
pub struct BulkLoadRequest<'a> {
    pub table: &'a str,
    pub path: &'a Path,
    pub format: FileFormat,
    /// Target columns in file field order; may end with timestamp columns
    /// that absorb reserved trailing fields
    pub columns: Vec<&'a str>,
    pub charset: &'a str,
    /// Assign `created_at = now, updated_at = null` after the load
    pub reset_timestamps: bool,
}

#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Whether [`StorageBackend::bulk_load`] is available
    fn supports_bulk_load(&self) -> bool;

    async fn table_exists(&self, table: &str) -> Result<bool>;

    /// Drop any stale `staging` table and create an empty one with the schema of `live`
    async fn prepare_staging(&self, staging: &str, live: &str) -> Result<()>;

    /// Drop the non-essential indexes of `table`, returning their definitions
    async fn disable_indexes(&self, table: &str) -> Result<Vec<String>>;

    /// Recreate indexes returned by [`StorageBackend::disable_indexes`]
    async fn enable_indexes(&self, table: &str, definitions: &[String]) -> Result<()>;

    /// Load a file in one backend-managed pass, returning the rows loaded
    async fn bulk_load(&self, request: &BulkLoadRequest<'_>) -> Result<u64>;

    /// Insert one batch of rows in a single statement
    async fn insert_batch(&self, table: &str, columns: &[&str], rows: &[Vec<FieldValue>]) -> Result<u64>;

    /// Atomically replace `live` with `staging`
    async fn replace_table(&self, staging: &str, live: &str) -> Result<()>;

    async fn row_count(&self, table: &str) -> Result<u64>;
}

/// Connect to the backend named by the URL scheme
pub async fn connect(url: &str, bulk_load: bool) -> Result<Arc<dyn StorageBackend>> {
    let scheme = url.split_once(':').map(|(scheme, _)| scheme).unwrap_or_default();

    match scheme {
        "postgres" | "postgresql" => {
            Ok(Arc::new(PostgresBackend::connect(url, bulk_load).await?))
        },
        "sqlite" => Ok(Arc::new(SqliteBackend::connect(url).await?)),
        _ => Err(IngestError::Config(format!(
            "Unsupported connection scheme in {}",
            redact(url)
        ))),
    }
}

/// Double-quote an identifier
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quoted, comma separated column list
pub fn column_list(columns: &[&str]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Hide credentials in a connection URL; unparsable input is withheld entirely
fn redact(url: &str) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return "<invalid connection URL>".to_string();
    };
    if !parsed.username().is_empty() {
        let _ = parsed.set_username("***");
    }
    if parsed.password().is_some() {
        let _ = parsed.set_password(None);
    }
    parsed.to_string()
}

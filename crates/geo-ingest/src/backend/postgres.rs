//! PostgreSQL backend
//!
//! The bulk path streams the master file through `COPY ... FROM STDIN` in CSV
//! mode. Place records are tab separated and never quoted, so the quote
//! character is set to a control byte that does not occur in the data.

use super::{column_list, quote_ident, BulkLoadRequest, StorageBackend};
use crate::dataset::{FileFormat, CREATED_AT, UPDATED_AT};
use crate::error::{IngestError, Result};
use crate::load::record::FieldValue;
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::query_builder::Separated;
use sqlx::{Postgres, QueryBuilder};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, instrument};

/// Bytes sent per `COPY` data message
const COPY_BLOCK_SIZE: usize = 64 * 1024;

pub struct PostgresBackend {
    pool: PgPool,
    bulk_load: bool,
}

impl PostgresBackend {
    pub async fn connect(url: &str, bulk_load: bool) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(30))
            .connect(url)
            .await?;
        Ok(Self::new(pool, bulk_load))
    }

    pub fn new(pool: PgPool, bulk_load: bool) -> Self {
        Self { pool, bulk_load }
    }
}

/// Map a MySQL-style charset name onto a PostgreSQL client encoding
pub fn pg_encoding(charset: &str) -> String {
    match charset.to_lowercase().as_str() {
        "utf8" | "utf8mb4" | "utf8mb3" | "utf-8" => "UTF8".to_string(),
        "latin1" | "iso-8859-1" => "LATIN1".to_string(),
        other => other.to_uppercase(),
    }
}

fn byte_literal(byte: u8) -> String {
    match byte {
        b'\t' => "E'\\t'".to_string(),
        b'\'' => "''''".to_string(),
        b if b.is_ascii_graphic() || b == b' ' => format!("'{}'", b as char),
        b => format!("E'\\x{:02X}'", b),
    }
}

/// Build the `COPY` statement for a bulk load.
///
/// `COPY` in CSV mode only splits records on newlines, so any other line
/// terminator is rejected.
pub fn copy_statement(
    table: &str,
    columns: &[&str],
    format: &FileFormat,
    charset: &str,
) -> std::result::Result<String, String> {
    if format.line_terminator != b'\n' {
        return Err(format!(
            "COPY cannot split records on line terminator 0x{:02X}",
            format.line_terminator
        ));
    }
    Ok(format!(
        "COPY {} ({}) FROM STDIN WITH (FORMAT csv, DELIMITER {}, QUOTE {}, ENCODING '{}')",
        quote_ident(table),
        column_list(columns),
        byte_literal(format.delimiter),
        byte_literal(format.quote.unwrap_or(0x01)),
        pg_encoding(charset)
    ))
}

fn push_field(row: &mut Separated<'_, '_, Postgres, &'static str>, value: &FieldValue) {
    match value {
        FieldValue::Text(v) => row.push_bind(v.clone()),
        FieldValue::Integer(v) => row.push_bind(*v),
        FieldValue::Real(v) => row.push_bind(*v),
        FieldValue::Date(v) => row.push_bind(*v),
        FieldValue::Timestamp(v) => row.push_bind(*v),
    };
}

#[async_trait]
impl StorageBackend for PostgresBackend {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn supports_bulk_load(&self) -> bool {
        self.bulk_load
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_schema = current_schema() AND table_name = $1)",
        )
        .bind(table)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn prepare_staging(&self, staging: &str, live: &str) -> Result<()> {
        if !self.table_exists(live).await? {
            return Err(IngestError::Load {
                table: live.to_string(),
                detail: "live table does not exist".to_string(),
            });
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!("DROP TABLE IF EXISTS {}", quote_ident(staging)))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!(
            "CREATE TABLE {} (LIKE {} INCLUDING ALL)",
            quote_ident(staging),
            quote_ident(live)
        ))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        debug!(staging, live, "Created staging table");
        Ok(())
    }

    async fn disable_indexes(&self, table: &str) -> Result<Vec<String>> {
        let indexes: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT i.relname::text, pg_get_indexdef(ix.indexrelid)
            FROM pg_index ix
            JOIN pg_class t ON t.oid = ix.indrelid
            JOIN pg_class i ON i.oid = ix.indexrelid
            JOIN pg_namespace n ON n.oid = t.relnamespace
            WHERE t.relname = $1
              AND n.nspname = current_schema()
              AND NOT ix.indisprimary
              AND NOT ix.indisunique
            ORDER BY i.relname
            "#,
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        for (name, _) in &indexes {
            sqlx::query(&format!("DROP INDEX IF EXISTS {}", quote_ident(name)))
                .execute(&self.pool)
                .await?;
        }

        debug!(table, count = indexes.len(), "Disabled secondary indexes");
        Ok(indexes.into_iter().map(|(_, definition)| definition).collect())
    }

    async fn enable_indexes(&self, table: &str, definitions: &[String]) -> Result<()> {
        for definition in definitions {
            sqlx::query(definition).execute(&self.pool).await?;
        }
        debug!(table, count = definitions.len(), "Rebuilt secondary indexes");
        Ok(())
    }

    #[instrument(skip(self, request), fields(table = request.table))]
    async fn bulk_load(&self, request: &BulkLoadRequest<'_>) -> Result<u64> {
        let table = quote_ident(request.table);
        let load_error = |detail: String| IngestError::Load {
            table: request.table.to_string(),
            detail,
        };

        let mut file = tokio::fs::File::open(request.path)
            .await
            .map_err(|e| load_error(format!("cannot open {}: {}", request.path.display(), e)))?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!(
            "ALTER TABLE {} ALTER COLUMN {} SET DEFAULT now(), ALTER COLUMN {} SET DEFAULT NULL",
            table,
            quote_ident(CREATED_AT),
            quote_ident(UPDATED_AT)
        ))
        .execute(&mut *tx)
        .await?;

        let statement = copy_statement(request.table, &request.columns, &request.format, request.charset)
            .map_err(&load_error)?;
        debug!(%statement, "Starting COPY");

        let mut copy = tx
            .copy_in_raw(&statement)
            .await
            .map_err(|e| load_error(e.to_string()))?;

        let mut block = vec![0u8; COPY_BLOCK_SIZE];
        loop {
            let read = match file.read(&mut block).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    let _ = copy.abort(e.to_string()).await;
                    return Err(load_error(format!("cannot read {}: {}", request.path.display(), e)));
                },
            };
            copy.send(&block[..read])
                .await
                .map_err(|e| load_error(e.to_string()))?;
        }

        let rows = copy.finish().await.map_err(|e| load_error(e.to_string()))?;

        if request.reset_timestamps {
            sqlx::query(&format!(
                "UPDATE {} SET {} = now(), {} = NULL",
                table,
                quote_ident(CREATED_AT),
                quote_ident(UPDATED_AT)
            ))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        info!(rows, "Bulk load finished");
        Ok(rows)
    }

    async fn insert_batch(&self, table: &str, columns: &[&str], rows: &[Vec<FieldValue>]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "INSERT INTO {} ({}) ",
            quote_ident(table),
            column_list(columns)
        ));
        builder.push_values(rows, |mut row, values| {
            for value in values {
                push_field(&mut row, value);
            }
        });

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn replace_table(&self, staging: &str, live: &str) -> Result<()> {
        let swap_error = |detail: String| IngestError::Swap {
            staging: staging.to_string(),
            live: live.to_string(),
            detail,
        };

        if !self.table_exists(staging).await? {
            return Err(swap_error("staging table does not exist".to_string()));
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!("DROP TABLE IF EXISTS {}", quote_ident(live)))
            .execute(&mut *tx)
            .await
            .map_err(|e| swap_error(e.to_string()))?;
        sqlx::query(&format!(
            "ALTER TABLE {} RENAME TO {}",
            quote_ident(staging),
            quote_ident(live)
        ))
        .execute(&mut *tx)
        .await
        .map_err(|e| swap_error(e.to_string()))?;
        tx.commit().await.map_err(|e| swap_error(e.to_string()))?;

        info!(staging, live, "Promoted staging table");
        Ok(())
    }

    async fn row_count(&self, table: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", quote_ident(table)))
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::dataset::DatasetKind;

    #[test]
    fn test_copy_statement_for_places() {
        let statement = copy_statement(
            "geonames_working",
            &["geonameid", "name"],
            &DatasetKind::Geonames.format(),
            "utf8mb4",
        )
        .unwrap();
        assert_eq!(
            statement,
            "COPY \"geonames_working\" (\"geonameid\", \"name\") FROM STDIN WITH (FORMAT csv, DELIMITER E'\\t', QUOTE E'\\x01', ENCODING 'UTF8')"
        );
    }

    #[test]
    fn test_copy_statement_for_ip_ranges() {
        let statement = copy_statement(
            "geonames_geo_ip_working",
            &["ip_start", "isoCountry", "created_at"],
            &DatasetKind::GeoIp.format(),
            "latin1",
        )
        .unwrap();
        assert_eq!(
            statement,
            "COPY \"geonames_geo_ip_working\" (\"ip_start\", \"isoCountry\", \"created_at\") FROM STDIN WITH (FORMAT csv, DELIMITER ',', QUOTE '\"', ENCODING 'LATIN1')"
        );
    }

    #[test]
    fn test_copy_statement_rejects_other_terminators() {
        let format = FileFormat {
            line_terminator: b'\r',
            ..DatasetKind::Geonames.format()
        };
        let err = copy_statement("geonames_working", &["geonameid"], &format, "utf8").unwrap_err();
        assert!(err.contains("0x0D"));
    }

    #[test]
    fn test_pg_encoding() {
        assert_eq!(pg_encoding("utf8mb4"), "UTF8");
        assert_eq!(pg_encoding("UTF8"), "UTF8");
        assert_eq!(pg_encoding("win1252"), "WIN1252");
    }
}

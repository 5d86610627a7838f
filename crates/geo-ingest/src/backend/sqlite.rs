//! SQLite backend (batched inserts only)

use super::{column_list, quote_ident, BulkLoadRequest, StorageBackend};
use crate::error::{IngestError, Result};
use crate::load::record::FieldValue;
use async_trait::async_trait;
use sqlx::query_builder::Separated;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn index_definitions(&self, table: &str) -> Result<Vec<(String, String)>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT name, sql FROM sqlite_master WHERE type = 'index' AND tbl_name = ? AND sql IS NOT NULL ORDER BY name",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

fn push_field(row: &mut Separated<'_, '_, Sqlite, &'static str>, value: &FieldValue) {
    match value {
        FieldValue::Text(v) => row.push_bind(v.clone()),
        FieldValue::Integer(v) => row.push_bind(*v),
        FieldValue::Real(v) => row.push_bind(*v),
        FieldValue::Date(v) => row.push_bind(*v),
        FieldValue::Timestamp(v) => row.push_bind(*v),
    };
}

/// Rewrite a stored `CREATE TABLE` statement to create `table` instead
fn rename_create_statement(sql: &str, table: &str) -> Option<String> {
    let body = &sql[sql.find('(')?..];
    Some(format!("CREATE TABLE {} {}", quote_ident(table), body))
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn supports_bulk_load(&self) -> bool {
        false
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(table)
                .fetch_one(&self.pool)
                .await?;
        Ok(count > 0)
    }

    async fn prepare_staging(&self, staging: &str, live: &str) -> Result<()> {
        let create: Option<String> =
            sqlx::query_scalar("SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(live)
                .fetch_optional(&self.pool)
                .await?;

        let create = create
            .as_deref()
            .and_then(|sql| rename_create_statement(sql, staging))
            .ok_or_else(|| IngestError::Load {
                table: live.to_string(),
                detail: "live table does not exist".to_string(),
            })?;

        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!("DROP TABLE IF EXISTS {}", quote_ident(staging)))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&create).execute(&mut *tx).await?;
        tx.commit().await?;

        debug!(staging, live, "Created staging table");
        Ok(())
    }

    async fn disable_indexes(&self, table: &str) -> Result<Vec<String>> {
        let indexes = self.index_definitions(table).await?;
        for (name, _) in &indexes {
            sqlx::query(&format!("DROP INDEX IF EXISTS {}", quote_ident(name)))
                .execute(&self.pool)
                .await?;
        }
        Ok(indexes.into_iter().map(|(_, sql)| sql).collect())
    }

    async fn enable_indexes(&self, _table: &str, definitions: &[String]) -> Result<()> {
        for definition in definitions {
            sqlx::query(definition).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn bulk_load(&self, request: &BulkLoadRequest<'_>) -> Result<u64> {
        Err(IngestError::Load {
            table: request.table.to_string(),
            detail: "SQLite has no bulk file load facility".to_string(),
        })
    }

    async fn insert_batch(&self, table: &str, columns: &[&str], rows: &[Vec<FieldValue>]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
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

        let live_indexes = self.index_definitions(live).await?;

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
        for (_, definition) in &live_indexes {
            sqlx::query(definition)
                .execute(&mut *tx)
                .await
                .map_err(|e| swap_error(e.to_string()))?;
        }
        tx.commit().await.map_err(|e| swap_error(e.to_string()))?;

        info!(staging, live, indexes = live_indexes.len(), "Promoted staging table");
        Ok(())
    }

    async fn row_count(&self, table: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", quote_ident(table)))
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}

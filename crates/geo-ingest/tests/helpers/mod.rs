//! Test helpers for geo-ingest integration tests
//!
//! - Source file builders for both datasets
//! - SQLite test databases with the live tables in place
//! - Archive builders for fetch tests
//! - A recording backend that offers a bulk file load

#![allow(dead_code)]

use async_trait::async_trait;
use geo_ingest::backend::{BulkLoadRequest, SqliteBackend, StorageBackend};
use geo_ingest::load::record::FieldValue;
use geo_ingest::{DatasetKind, IngestConfig, IngestError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tempfile::TempDir;

pub const PLACES_SCHEMA: &str = r#"
CREATE TABLE geonames (
    geonameid INTEGER PRIMARY KEY,
    name TEXT,
    asciiname TEXT,
    alternatenames TEXT,
    latitude REAL,
    longitude REAL,
    feature_class TEXT,
    feature_code TEXT,
    country_code TEXT,
    cc2 TEXT,
    admin1_code TEXT,
    admin2_code TEXT,
    admin3_code TEXT,
    admin4_code TEXT,
    population INTEGER,
    elevation INTEGER,
    dem INTEGER,
    timezone TEXT,
    modification_date DATE,
    created_at TIMESTAMP,
    updated_at TIMESTAMP
)"#;

pub const PLACES_INDEX: &str = "CREATE INDEX geonames_country_code_idx ON geonames (country_code)";

pub const IP_SCHEMA: &str = r#"
CREATE TABLE geonames_geo_ip (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ip_start TEXT NOT NULL,
    ip_end TEXT NOT NULL,
    "isoCountry" TEXT,
    region TEXT,
    area TEXT,
    city TEXT,
    street TEXT,
    latitude REAL,
    longitude REAL,
    created_at TIMESTAMP,
    updated_at TIMESTAMP
)"#;

/// One tab separated place record
pub fn place_line(id: u64, country: &str) -> String {
    format!(
        "{id}\tPlace {id}\tPlace {id}\tAlt {id},Other {id}\t42.5\t1.5\tP\tPPL\t{country}\t\t02\t\t\t\t{population}\t\t1721\tEurope/Andorra\t2024-02-29\n",
        population = id * 10
    )
}

pub fn place_lines(ids: impl IntoIterator<Item = u64>, country: &str) -> String {
    ids.into_iter().map(|id| place_line(id, country)).collect()
}

/// One comma separated IP range record with the reserved trailing field
pub fn ip_line(start: &str, end: &str, country: &str, city: &str) -> String {
    format!("{start},{end},{country},\"Region, {country}\",,{city},,48.7595,9.16183,\n")
}

/// A temporary storage directory plus SQLite database with the live tables created
pub struct TestEnv {
    pub dir: TempDir,
    pub pool: SqlitePool,
    pub url: String,
}

impl TestEnv {
    pub async fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = dir.path().join("geonames.db");
        let url = format!("sqlite://{}", db_path.display());

        let options = SqliteConnectOptions::from_str(&url)
            .expect("Invalid SQLite URL")
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await
            .expect("Failed to open SQLite database");

        for statement in [PLACES_SCHEMA, PLACES_INDEX, IP_SCHEMA] {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .expect("Failed to create schema");
        }

        std::fs::create_dir_all(dir.path().join("storage").join("places")).expect("mkdir places");
        std::fs::create_dir_all(dir.path().join("storage").join("geo-ip")).expect("mkdir geo-ip");

        Self { dir, pool, url }
    }

    pub fn storage(&self) -> PathBuf {
        self.dir.path().join("storage")
    }

    pub fn dataset_dir(&self, kind: DatasetKind) -> PathBuf {
        self.storage().join(kind.directory())
    }

    pub fn write_partition(&self, kind: DatasetKind, name: &str, content: &str) {
        std::fs::write(self.dataset_dir(kind).join(name), content).expect("Failed to write partition");
    }

    pub fn config(&self) -> IngestConfig {
        IngestConfig::builder()
            .storage_path(self.storage())
            .connection(self.url.clone())
            .bulk_load(false)
            .max_retries(1)
            .build()
    }

    pub async fn backend(&self) -> SqliteBackend {
        SqliteBackend::connect(&self.url)
            .await
            .expect("Failed to connect backend")
    }

    /// Insert a previous generation of place rows into the live table
    pub async fn seed_places(&self, ids: impl IntoIterator<Item = u64>) {
        for id in ids {
            sqlx::query("INSERT INTO geonames (geonameid, name, country_code) VALUES (?, ?, 'OLD')")
                .bind(id as i64)
                .bind(format!("Old {}", id))
                .execute(&self.pool)
                .await
                .expect("Failed to seed live table");
        }
    }

    pub async fn count(&self, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM \"{}\"", table))
            .fetch_one(&self.pool)
            .await
            .expect("Failed to count rows")
    }

    pub async fn table_exists(&self, table: &str) -> bool {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(table)
            .fetch_one(&self.pool)
            .await
            .expect("Failed to query sqlite_master");
        count > 0
    }
}

pub fn zip_bytes(entry: &str, content: &str) -> Vec<u8> {
    let mut buffer = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut buffer);
        writer
            .start_file(entry, zip::write::SimpleFileOptions::default())
            .expect("Failed to start zip entry");
        writer.write_all(content.as_bytes()).expect("Failed to write zip entry");
        writer.finish().expect("Failed to finish zip");
    }
    buffer.into_inner()
}

pub fn gzip_bytes(content: &str) -> Vec<u8> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(content.as_bytes()).expect("Failed to gzip");
    encoder.finish().expect("Failed to finish gzip")
}

pub fn read(path: &Path) -> String {
    std::fs::read_to_string(path).expect("Failed to read file")
}

/// Owned copy of a [`BulkLoadRequest`]
#[derive(Debug, Clone)]
pub struct RecordedBulkLoad {
    pub table: String,
    pub path: PathBuf,
    pub columns: Vec<String>,
    pub charset: String,
    pub reset_timestamps: bool,
}

/// Backend that records every call and loads nothing
#[derive(Default)]
pub struct RecordingBackend {
    pub fail_bulk_load: bool,
    pub bulk_loads: Mutex<Vec<RecordedBulkLoad>>,
    pub replaced: Mutex<Vec<(String, String)>>,
    pub batches: AtomicU64,
    rows: AtomicU64,
}

impl RecordingBackend {
    pub fn failing() -> Self {
        Self {
            fail_bulk_load: true,
            ..Default::default()
        }
    }

    pub fn bulk_loads(&self) -> Vec<RecordedBulkLoad> {
        self.bulk_loads.lock().unwrap().clone()
    }

    pub fn replaced(&self) -> Vec<(String, String)> {
        self.replaced.lock().unwrap().clone()
    }
}

#[async_trait]
impl StorageBackend for RecordingBackend {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn supports_bulk_load(&self) -> bool {
        true
    }

    async fn table_exists(&self, _table: &str) -> geo_ingest::Result<bool> {
        Ok(true)
    }

    async fn prepare_staging(&self, _staging: &str, _live: &str) -> geo_ingest::Result<()> {
        self.rows.store(0, Ordering::SeqCst);
        Ok(())
    }

    async fn disable_indexes(&self, _table: &str) -> geo_ingest::Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn enable_indexes(&self, _table: &str, _definitions: &[String]) -> geo_ingest::Result<()> {
        Ok(())
    }

    async fn bulk_load(&self, request: &BulkLoadRequest<'_>) -> geo_ingest::Result<u64> {
        self.bulk_loads.lock().unwrap().push(RecordedBulkLoad {
            table: request.table.to_string(),
            path: request.path.to_path_buf(),
            columns: request.columns.iter().map(|c| c.to_string()).collect(),
            charset: request.charset.to_string(),
            reset_timestamps: request.reset_timestamps,
        });
        if self.fail_bulk_load {
            return Err(IngestError::Load {
                table: request.table.to_string(),
                detail: "extra data after last expected column".to_string(),
            });
        }
        let rows = read(request.path).lines().count() as u64;
        self.rows.store(rows, Ordering::SeqCst);
        Ok(rows)
    }

    async fn insert_batch(&self, _table: &str, _columns: &[&str], rows: &[Vec<FieldValue>]) -> geo_ingest::Result<u64> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        Ok(rows.len() as u64)
    }

    async fn replace_table(&self, staging: &str, live: &str) -> geo_ingest::Result<()> {
        self.replaced.lock().unwrap().push((staging.to_string(), live.to_string()));
        Ok(())
    }

    async fn row_count(&self, _table: &str) -> geo_ingest::Result<u64> {
        Ok(self.rows.load(Ordering::SeqCst))
    }
}

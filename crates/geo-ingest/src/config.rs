//! Ingestion configuration
//!
//! An explicit [`IngestConfig`] is handed to the pipeline constructor. It can be
//! assembled with the builder (tests, embedding) or loaded from the environment
//! (`.env` is honoured) with [`IngestConfig::load`].

use crate::dataset::DatasetKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_STORAGE_PATH: &str = "./storage/geonames";
pub const DEFAULT_CONNECTION: &str = "sqlite://geonames.db";
pub const DEFAULT_CHARSET: &str = "utf8mb4";
pub const DEFAULT_BATCH_SIZE: usize = 500;
pub const DEFAULT_GEONAMES_URL: &str = "https://download.geonames.org/export/dump";
pub const DEFAULT_GEO_IP_URL: &str = "https://github.com/sapics/ip-location-db/raw/main/dbip-city";
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 4;

/// Upper bound on rows per insert statement; keeps a batch of the widest
/// dataset under SQLite's bind parameter limit.
pub const MAX_BATCH_SIZE: usize = 1500;

/// Small country selection used by `--test` runs
pub const TEST_COUNTRIES: [&str; 3] = ["BS", "YU", "UZ"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Directory for archives, partitions and master files
    pub storage_path: PathBuf,

    /// Database connection URL
    pub connection: String,

    /// Source file character set, forwarded to the bulk loader
    pub charset: String,

    /// Rows per insert statement on the batched path
    pub batch_size: usize,

    /// Use the backend's bulk file load when it offers one
    pub bulk_load: bool,

    /// Treat a failed insert batch as fatal instead of logging and continuing
    pub strict_batches: bool,

    /// Prefix for live and staging table names
    pub table_prefix: String,

    /// Country codes to fetch for the place dataset; `*` selects all
    pub countries: Vec<String>,

    pub geonames_base_url: String,
    pub geo_ip_base_url: String,

    /// HTTP timeout in seconds
    pub timeout_secs: u64,

    /// Download attempts per resource
    pub max_retries: u32,

    pub max_concurrent_downloads: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            storage_path: PathBuf::from(DEFAULT_STORAGE_PATH),
            connection: DEFAULT_CONNECTION.to_string(),
            charset: DEFAULT_CHARSET.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            bulk_load: true,
            strict_batches: false,
            table_prefix: String::new(),
            countries: vec!["*".to_string()],
            geonames_base_url: DEFAULT_GEONAMES_URL.to_string(),
            geo_ip_base_url: DEFAULT_GEO_IP_URL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            max_concurrent_downloads: DEFAULT_MAX_CONCURRENT_DOWNLOADS,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

impl IngestConfig {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_env();
        config.validate().map_err(anyhow::Error::msg)?;

        Ok(config)
    }

    /// Read every `GEO_*` variable plus `DATABASE_URL`, falling back to defaults.
    /// Unparsable values fall back as well.
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            storage_path: std::env::var("GEO_STORAGE_PATH")
                .map(PathBuf::from)
                .unwrap_or(default.storage_path),
            connection: std::env::var("DATABASE_URL").unwrap_or(default.connection),
            charset: std::env::var("GEO_CHARSET").unwrap_or(default.charset),
            batch_size: env_or("GEO_BATCH_SIZE", default.batch_size),
            bulk_load: env_or("GEO_BULK_LOAD", default.bulk_load),
            strict_batches: env_or("GEO_STRICT_BATCHES", default.strict_batches),
            table_prefix: std::env::var("GEO_TABLE_PREFIX").unwrap_or(default.table_prefix),
            countries: std::env::var("GEO_COUNTRIES")
                .map(|s| parse_countries(&s))
                .unwrap_or(default.countries),
            geonames_base_url: std::env::var("GEO_GEONAMES_URL")
                .unwrap_or(default.geonames_base_url),
            geo_ip_base_url: std::env::var("GEO_IP_URL").unwrap_or(default.geo_ip_base_url),
            timeout_secs: env_or("GEO_HTTP_TIMEOUT", default.timeout_secs),
            max_retries: env_or("GEO_HTTP_MAX_RETRIES", default.max_retries),
            max_concurrent_downloads: env_or(
                "GEO_MAX_CONCURRENT_DOWNLOADS",
                default.max_concurrent_downloads,
            ),
        }
    }

    pub fn builder() -> IngestConfigBuilder {
        IngestConfigBuilder::default()
    }

    /// Whether the place dataset is fetched as the single all-countries archive
    pub fn all_countries(&self) -> bool {
        self.countries.iter().any(|c| c == "*")
    }

    /// Restrict the place dataset to [`TEST_COUNTRIES`]
    pub fn with_test_countries(mut self) -> Self {
        self.countries = TEST_COUNTRIES.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Directory holding one dataset's files
    pub fn dataset_dir(&self, kind: DatasetKind) -> PathBuf {
        self.storage_path.join(kind.directory())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.storage_path.as_os_str().is_empty() {
            return Err("Storage path cannot be empty".to_string());
        }

        if self.connection.trim().is_empty() {
            return Err("Connection cannot be empty".to_string());
        }

        if self.batch_size == 0 {
            return Err("Batch size must be greater than 0".to_string());
        }

        if self.batch_size > MAX_BATCH_SIZE {
            return Err(format!(
                "Batch size {} exceeds the maximum of {}",
                self.batch_size, MAX_BATCH_SIZE
            ));
        }

        if self.timeout_secs == 0 {
            return Err("Timeout must be greater than 0".to_string());
        }

        if self.max_retries == 0 {
            return Err("Max retries must be greater than 0".to_string());
        }

        if self.max_concurrent_downloads == 0 {
            return Err("Max concurrent downloads must be greater than 0".to_string());
        }

        if self.countries.is_empty() {
            return Err("Country list cannot be empty".to_string());
        }

        if let Some(bad) = self.countries.iter().find(|c| !is_country_selector(c)) {
            return Err(format!("Invalid country code: {}", bad));
        }

        Ok(())
    }
}

fn parse_countries(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn is_country_selector(code: &str) -> bool {
    code == "*" || (code.len() == 2 && code.bytes().all(|b| b.is_ascii_uppercase()))
}

/// Builder for IngestConfig
#[derive(Debug, Default)]
pub struct IngestConfigBuilder {
    config: IngestConfig,
}

impl IngestConfigBuilder {
    pub fn storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.storage_path = path.into();
        self
    }

    pub fn connection(mut self, connection: impl Into<String>) -> Self {
        self.config.connection = connection.into();
        self
    }

    pub fn charset(mut self, charset: impl Into<String>) -> Self {
        self.config.charset = charset.into();
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    pub fn bulk_load(mut self, enabled: bool) -> Self {
        self.config.bulk_load = enabled;
        self
    }

    pub fn strict_batches(mut self, strict: bool) -> Self {
        self.config.strict_batches = strict;
        self
    }

    pub fn table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.table_prefix = prefix.into();
        self
    }

    pub fn countries(mut self, countries: Vec<String>) -> Self {
        self.config.countries = countries;
        self
    }

    pub fn geonames_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.geonames_base_url = url.into();
        self
    }

    pub fn geo_ip_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.geo_ip_base_url = url.into();
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.config.timeout_secs = secs;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    pub fn max_concurrent_downloads(mut self, max: usize) -> Self {
        self.config.max_concurrent_downloads = max;
        self
    }

    pub fn build(self) -> IngestConfig {
        self.config
    }
}

//! Error taxonomy for the ingestion pipeline

use crate::pipeline::Stage;
use geo_common::ErrorCategory;
use std::path::PathBuf;

/// Result type for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Errors raised by the pipeline stages.
///
/// Every variant carries the resource, file, or table it concerns so a failed run
/// can be diagnosed from the report alone.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Fetch error for {resource}: {source}")]
    Fetch {
        resource: String,
        #[source]
        source: FetchFailure,
    },

    #[error("Decompression error for {}: {source}", path.display())]
    Decompression {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Merge error for {}: {source}", path.display())]
    Merge {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Load error for table {table}: {detail}")]
    Load { table: String, detail: String },

    #[error("Swap error promoting {staging} to {live}: {detail}")]
    Swap {
        staging: String,
        live: String,
        detail: String,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Illegal stage transition from {from} to {to}")]
    Stage { from: Stage, to: Stage },
}

/// Why a single remote resource could not be fetched
#[derive(Debug, thiserror::Error)]
pub enum FetchFailure {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server responded with {0}")]
    Status(reqwest::StatusCode),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("downloaded file is empty")]
    Empty,
}

impl IngestError {
    pub fn fetch(resource: impl Into<String>, source: impl Into<FetchFailure>) -> Self {
        IngestError::Fetch {
            resource: resource.into(),
            source: source.into(),
        }
    }

    pub fn decompression(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IngestError::Decompression {
            path: path.into(),
            source,
        }
    }

    pub fn merge(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IngestError::Merge {
            path: path.into(),
            source,
        }
    }

    /// Failure category reported to the sink
    pub fn category(&self) -> ErrorCategory {
        match self {
            IngestError::Fetch { .. } => ErrorCategory::Remote,
            IngestError::Decompression { .. }
            | IngestError::Merge { .. }
            | IngestError::Config(_)
            | IngestError::Stage { .. } => ErrorCategory::Local,
            IngestError::Load { .. } | IngestError::Swap { .. } | IngestError::Database(_) => {
                ErrorCategory::Database
            },
        }
    }

    /// The resource, file, or table the error is about
    pub fn subject(&self) -> String {
        match self {
            IngestError::Fetch { resource, .. } => resource.clone(),
            IngestError::Decompression { path, .. } | IngestError::Merge { path, .. } => {
                path.display().to_string()
            },
            IngestError::Load { table, .. } => table.clone(),
            IngestError::Swap { staging, .. } => staging.clone(),
            IngestError::Database(_) | IngestError::Config(_) | IngestError::Stage { .. } => {
                String::new()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        let fetch = IngestError::fetch("https://example.org/AD.zip", FetchFailure::Empty);
        assert_eq!(fetch.category(), ErrorCategory::Remote);
        assert_eq!(fetch.subject(), "https://example.org/AD.zip");

        let merge = IngestError::merge(
            "/tmp/AD.txt",
            std::io::Error::new(std::io::ErrorKind::WriteZero, "short write"),
        );
        assert_eq!(merge.category(), ErrorCategory::Local);
        assert!(merge.to_string().contains("/tmp/AD.txt"));

        let swap = IngestError::Swap {
            staging: "geonames_working".into(),
            live: "geonames".into(),
            detail: "rename rejected".into(),
        };
        assert_eq!(swap.category(), ErrorCategory::Database);
    }
}

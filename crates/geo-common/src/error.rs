//! Error types shared by the geo crates

use std::fmt;
use thiserror::Error;

/// Result type alias for shared helpers
pub type Result<T> = std::result::Result<T, GeoError>;

/// Error type for the shared helpers
#[derive(Error, Debug)]
pub enum GeoError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Where a failure originated, as recorded in failure reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The remote source (unreachable host, bad status, truncated body)
    Remote,
    /// The local filesystem (archives, partitions, master file)
    Local,
    /// The storage backend
    Database,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Remote => "remote",
            ErrorCategory::Local => "local",
            ErrorCategory::Database => "database",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

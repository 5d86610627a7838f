//! Retrieval of remote archives into local storage

use crate::config::IngestConfig;
use crate::error::{FetchFailure, IngestError, Result};
use futures::{stream, StreamExt, TryStreamExt};
use reqwest::{Client, StatusCode};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument, warn};

/// One archive now present in local storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedArchive {
    pub url: String,
    pub path: PathBuf,
    pub bytes: u64,
}

/// HTTP fetcher with retry and bounded concurrency
pub struct ArchiveFetcher {
    client: Client,
    max_retries: u32,
    max_concurrent: usize,
}

impl ArchiveFetcher {
    pub fn new(config: &IngestConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("geo-ingest/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| IngestError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            max_retries: config.max_retries.max(1),
            max_concurrent: config.max_concurrent_downloads.max(1),
        })
    }

    /// Fetch every resource into `dir`. All must succeed; the first failure is returned.
    pub async fn fetch_all(&self, urls: &[String], dir: &Path) -> Result<Vec<FetchedArchive>> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| IngestError::fetch(dir.display().to_string(), e))?;

        stream::iter(urls.iter().map(|url| self.fetch(url, dir)))
            .buffer_unordered(self.max_concurrent)
            .try_collect()
            .await
    }

    /// Fetch one resource into `dir` under the last segment of its URL
    #[instrument(skip(self, dir))]
    pub async fn fetch(&self, url: &str, dir: &Path) -> Result<FetchedArchive> {
        let name = geo_common::files::local_file_name(url).map_err(|e| {
            IngestError::fetch(url, std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))
        })?;
        let path = dir.join(&name);

        let bytes = self
            .download_with_retry(url, &path)
            .await
            .map_err(|source| IngestError::fetch(url, source))?;

        info!(file = %name, bytes, "Downloaded archive");
        Ok(FetchedArchive {
            url: url.to_string(),
            path,
            bytes,
        })
    }

    async fn download_with_retry(&self, url: &str, dest: &Path) -> std::result::Result<u64, FetchFailure> {
        let mut attempt = 1;

        loop {
            match self.download(url, dest).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) if attempt < self.max_retries && is_retryable(&e) => {
                    warn!("Download attempt {}/{} failed: {}", attempt, self.max_retries, e);
                    // Exponential backoff: 2^attempt seconds
                    let backoff_secs = 2u64.pow(attempt);
                    info!("Retrying in {} seconds...", backoff_secs);
                    tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                    attempt += 1;
                },
                Err(e) => return Err(e),
            }
        }
    }

    /// Stream the body to `{dest}.part`, then move it into place
    async fn download(&self, url: &str, dest: &Path) -> std::result::Result<u64, FetchFailure> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(FetchFailure::Status(response.status()));
        }

        let partial = PartialDownload::new(partial_path(dest));
        let mut file = tokio::fs::File::create(partial.path()).await?;
        let mut written = 0u64;
        let mut body = response.bytes_stream();

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        drop(file);

        if written == 0 {
            return Err(FetchFailure::Empty);
        }

        tokio::fs::rename(partial.path(), dest).await?;
        partial.keep();
        Ok(written)
    }
}

/// Removes the partial file when dropped unless the download completed.
///
/// Also covers downloads cancelled mid-stream when a sibling fetch fails.
struct PartialDownload {
    path: PathBuf,
    keep: bool,
}

impl PartialDownload {
    fn new(path: PathBuf) -> Self {
        Self { path, keep: false }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn keep(mut self) {
        self.keep = true;
    }
}

impl Drop for PartialDownload {
    fn drop(&mut self) {
        if !self.keep {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

/// Client errors other than timeouts and throttling will not go away on retry
fn is_retryable(failure: &FetchFailure) -> bool {
    match failure {
        FetchFailure::Status(status) => {
            !status.is_client_error()
                || *status == StatusCode::REQUEST_TIMEOUT
                || *status == StatusCode::TOO_MANY_REQUESTS
        },
        FetchFailure::Http(_) | FetchFailure::Io(_) | FetchFailure::Empty => true,
    }
}

//! Orchestration of one dataset run
//!
//! ```text
//! Idle -> Fetching -> Decompressing -> Merging -> Loading -> Swapping -> Done
//!                          (any non-terminal stage) -> Failed
//! ```
//!
//! Stages only move forward. Local runs start at `Merging` from partitions
//! already on disk. Any failure ends the run before the swap, leaving the live
//! table as it was.

use crate::backend::{self, StorageBackend};
use crate::config::IngestConfig;
use crate::dataset::DatasetKind;
use crate::decompress::Decompressor;
use crate::error::{IngestError, Result};
use crate::fetch::ArchiveFetcher;
use crate::load::{select_loader, LoadSummary};
use crate::merge::{list_partition_files, FileMerger, MasterFile};
use crate::report::{FailureReport, ReportSink, StepSummary, TracingSink};
use crate::swap::SwapCoordinator;
use futures::future::try_join_all;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Stage {
    Idle,
    Fetching,
    Decompressing,
    Merging,
    Loading,
    Swapping,
    Done,
    Failed,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Idle => "idle",
            Stage::Fetching => "fetching",
            Stage::Decompressing => "decompressing",
            Stage::Merging => "merging",
            Stage::Loading => "loading",
            Stage::Swapping => "swapping",
            Stage::Done => "done",
            Stage::Failed => "failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current stage of a run; rejects moves that are not strictly forward
#[derive(Debug)]
pub struct StageTracker {
    stage: Stage,
}

impl Default for StageTracker {
    fn default() -> Self {
        Self { stage: Stage::Idle }
    }
}

impl StageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn advance(&mut self, to: Stage) -> Result<()> {
        let allowed = match to {
            Stage::Failed => !self.stage.is_terminal(),
            _ => !self.stage.is_terminal() && to > self.stage,
        };
        if !allowed {
            return Err(IngestError::Stage {
                from: self.stage,
                to,
            });
        }
        self.stage = to;
        Ok(())
    }

    /// Move to `Failed` unless already terminal
    pub fn fail(&mut self) {
        if !self.stage.is_terminal() {
            self.stage = Stage::Failed;
        }
    }
}

/// Result of one dataset run
#[derive(Debug)]
pub struct DatasetReport {
    pub dataset: DatasetKind,
    /// `Done` on success, `Failed` otherwise
    pub stage: Stage,
    /// Stage the run was in when it failed
    pub failed_at: Option<Stage>,
    pub master_lines: Option<u64>,
    pub summary: Option<LoadSummary>,
    /// Whether the staging rows matched the master lines less skipped records
    pub row_count_matches: Option<bool>,
    pub error: Option<IngestError>,
    pub elapsed: Duration,
}

impl DatasetReport {
    pub fn is_success(&self) -> bool {
        self.stage == Stage::Done
    }
}

#[derive(Default)]
struct RunState {
    master_lines: Option<u64>,
    summary: Option<LoadSummary>,
    row_count_matches: Option<bool>,
}

/// Runs the staged ingestion for the configured datasets
pub struct IngestionPipeline {
    config: IngestConfig,
    backend: Arc<dyn StorageBackend>,
    sink: Arc<dyn ReportSink>,
}

impl IngestionPipeline {
    pub fn new(config: IngestConfig, backend: Arc<dyn StorageBackend>) -> Result<Self> {
        config.validate().map_err(IngestError::Config)?;
        Ok(Self {
            config,
            backend,
            sink: Arc::new(TracingSink),
        })
    }

    /// Build a pipeline on the backend named by `config.connection`
    pub async fn connect(config: IngestConfig) -> Result<Self> {
        config.validate().map_err(IngestError::Config)?;
        let backend = backend::connect(&config.connection, config.bulk_load).await?;
        Self::new(config, backend)
    }

    pub fn with_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Fetch, decompress, merge, load and swap one dataset
    pub async fn run_dataset(&self, kind: DatasetKind) -> DatasetReport {
        self.run(kind, true).await
    }

    /// Merge, load and swap from partitions already in the dataset directory
    pub async fn run_local(&self, kind: DatasetKind) -> DatasetReport {
        self.run(kind, false).await
    }

    /// Run both datasets one after the other. A failure in one does not stop the other.
    pub async fn run_all(&self, fetch: bool) -> Vec<DatasetReport> {
        let mut reports = Vec::with_capacity(DatasetKind::ALL.len());
        for kind in DatasetKind::ALL {
            reports.push(self.run(kind, fetch).await);
        }
        reports
    }

    #[instrument(skip(self), fields(dataset = %kind))]
    async fn run(&self, kind: DatasetKind, fetch: bool) -> DatasetReport {
        let started = Instant::now();
        let mut tracker = StageTracker::new();
        let mut state = RunState::default();

        let outcome = self.execute(kind, fetch, &mut tracker, &mut state).await;

        let (failed_at, error) = match outcome {
            Ok(()) => {
                info!(elapsed_ms = started.elapsed().as_millis() as u64, "Dataset ingested");
                (None, None)
            },
            Err(e) => {
                let failed_at = tracker.stage();
                tracker.fail();
                self.sink.failure(&FailureReport {
                    dataset: kind,
                    stage: failed_at,
                    resource: e.subject(),
                    detail: e.to_string(),
                    category: e.category(),
                });
                (Some(failed_at), Some(e))
            },
        };

        DatasetReport {
            dataset: kind,
            stage: tracker.stage(),
            failed_at,
            master_lines: state.master_lines,
            summary: state.summary,
            row_count_matches: state.row_count_matches,
            error,
            elapsed: started.elapsed(),
        }
    }

    async fn execute(
        &self,
        kind: DatasetKind,
        fetch: bool,
        tracker: &mut StageTracker,
        state: &mut RunState,
    ) -> Result<()> {
        let dir = self.config.dataset_dir(kind);
        let live = kind.live_table(&self.config.table_prefix);
        let staging = kind.staging_table(&self.config.table_prefix);

        if fetch {
            tracker.advance(Stage::Fetching)?;
            let step = Instant::now();
            remove_stale_partitions(kind, &dir).await?;
            let fetcher = ArchiveFetcher::new(&self.config)?;
            let archives = fetcher.fetch_all(&kind.source_urls(&self.config), &dir).await?;
            self.step(kind, Stage::Fetching, Some(archives.iter().map(|a| a.bytes).sum()), None, step);

            tracker.advance(Stage::Decompressing)?;
            let step = Instant::now();
            let outputs = try_join_all(
                archives
                    .into_iter()
                    .map(|archive| Decompressor::decompress_async(archive.path)),
            )
            .await?;
            let bytes = outputs
                .iter()
                .filter_map(|path| std::fs::metadata(path).ok())
                .map(|m| m.len())
                .sum();
            self.step(kind, Stage::Decompressing, Some(bytes), None, step);
        }

        tracker.advance(Stage::Merging)?;
        let step = Instant::now();
        let merger = FileMerger::new(kind, dir.clone());
        let master = tokio::task::spawn_blocking(move || {
            let mut master = merger.merge()?;
            master.line_count()?;
            Ok::<_, IngestError>(master)
        })
        .await
        .map_err(|e| IngestError::merge(&dir, std::io::Error::other(e)))??;
        state.master_lines = master.lines;
        self.step(kind, Stage::Merging, Some(master.size()), master.lines, step);

        tracker.advance(Stage::Loading)?;
        let step = Instant::now();
        let summary = self.load(kind, &staging, &live, &master).await?;
        state.row_count_matches = verify_row_count(kind, &master, &summary);
        let rows = summary.rows_in_staging;
        state.summary = Some(summary);
        self.step(kind, Stage::Loading, None, Some(rows), step);

        tracker.advance(Stage::Swapping)?;
        let step = Instant::now();
        SwapCoordinator::new(self.backend.clone())
            .promote(&staging, &live)
            .await?;
        self.step(kind, Stage::Swapping, None, None, step);

        tracker.advance(Stage::Done)
    }

    async fn load(&self, kind: DatasetKind, staging: &str, live: &str, master: &MasterFile) -> Result<LoadSummary> {
        self.backend.prepare_staging(staging, live).await?;
        let indexes = self.backend.disable_indexes(staging).await?;

        let loader = select_loader(self.backend.clone(), &self.config);
        info!(
            dataset = %kind,
            loader = loader.name(),
            backend = self.backend.name(),
            staging,
            "Loading staging table"
        );
        let summary = loader.load(kind, staging, &master.path).await?;

        self.backend.enable_indexes(staging, &indexes).await?;
        Ok(summary)
    }

    fn step(&self, dataset: DatasetKind, stage: Stage, bytes: Option<u64>, lines: Option<u64>, started: Instant) {
        self.sink.step_completed(&StepSummary {
            dataset,
            stage,
            bytes,
            lines,
            elapsed: started.elapsed(),
        });
    }
}

/// Partitions left over from an earlier run would otherwise be merged again
async fn remove_stale_partitions(kind: DatasetKind, dir: &std::path::Path) -> Result<()> {
    if !tokio::fs::try_exists(dir).await.unwrap_or(false) {
        return Ok(());
    }
    for partition in list_partition_files(dir, kind)? {
        tokio::fs::remove_file(&partition.path)
            .await
            .map_err(|e| IngestError::merge(&partition.path, e))?;
    }
    Ok(())
}

/// Compare the staging row count with the master line count when it is known.
///
/// A mismatch is logged, not fatal: failed batches are already accounted for.
fn verify_row_count(kind: DatasetKind, master: &MasterFile, summary: &LoadSummary) -> Option<bool> {
    let lines = master.lines?;
    let expected = lines.saturating_sub(summary.skipped_records);
    let matches = summary.rows_in_staging == expected;
    if !matches {
        warn!(
            dataset = %kind,
            lines,
            expected,
            rows = summary.rows_in_staging,
            failed_batches = summary.failed_batches,
            skipped_records = summary.skipped_records,
            "Staging row count differs from master file"
        );
    }
    Some(matches)
}

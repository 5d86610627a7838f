//! Progress and error reporting
//!
//! The pipeline sends failure reports and per-stage summaries to a
//! [`ReportSink`]. [`TracingSink`] writes them to the log; [`MemorySink`]
//! keeps them for inspection.

use crate::dataset::DatasetKind;
use crate::pipeline::Stage;
use geo_common::ErrorCategory;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{error, info};

/// A fatal failure of one dataset run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReport {
    pub dataset: DatasetKind,
    pub stage: Stage,
    /// Resource URL, file path or table name; may be empty
    pub resource: String,
    pub detail: String,
    pub category: ErrorCategory,
}

/// A completed stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepSummary {
    pub dataset: DatasetKind,
    pub stage: Stage,
    pub bytes: Option<u64>,
    pub lines: Option<u64>,
    pub elapsed: Duration,
}

pub trait ReportSink: Send + Sync {
    fn failure(&self, report: &FailureReport);
    fn step_completed(&self, summary: &StepSummary);
}

/// Logs reports through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ReportSink for TracingSink {
    fn failure(&self, report: &FailureReport) {
        error!(
            dataset = %report.dataset,
            stage = %report.stage,
            resource = %report.resource,
            category = %report.category,
            detail = %report.detail,
            "Ingestion failed"
        );
    }

    fn step_completed(&self, summary: &StepSummary) {
        info!(
            dataset = %summary.dataset,
            stage = %summary.stage,
            bytes = summary.bytes,
            lines = summary.lines,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Stage completed"
        );
    }
}

/// Collects reports in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    failures: Mutex<Vec<FailureReport>>,
    steps: Mutex<Vec<StepSummary>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failures(&self) -> Vec<FailureReport> {
        self.failures.lock().map(|f| f.clone()).unwrap_or_default()
    }

    pub fn steps(&self) -> Vec<StepSummary> {
        self.steps.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl ReportSink for MemorySink {
    fn failure(&self, report: &FailureReport) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.push(report.clone());
        }
    }

    fn step_completed(&self, summary: &StepSummary) {
        if let Ok(mut steps) = self.steps.lock() {
            steps.push(summary.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_records() {
        let sink = MemorySink::new();
        sink.step_completed(&StepSummary {
            dataset: DatasetKind::Geonames,
            stage: Stage::Merging,
            bytes: None,
            lines: Some(150),
            elapsed: Duration::from_millis(12),
        });
        sink.failure(&FailureReport {
            dataset: DatasetKind::GeoIp,
            stage: Stage::Fetching,
            resource: "https://example.org/dbip-city-ipv4.csv.gz".into(),
            detail: "server responded with 404 Not Found".into(),
            category: ErrorCategory::Remote,
        });

        assert_eq!(sink.steps().len(), 1);
        assert_eq!(sink.steps()[0].lines, Some(150));
        assert_eq!(sink.failures()[0].category, ErrorCategory::Remote);
    }
}

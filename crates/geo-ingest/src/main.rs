//! Geo Ingest - geographic dataset ingestion tool

use anyhow::Result;
use clap::Parser;
use geo_common::logging::{init_logging, LogConfig, LogLevel};
use geo_ingest::{DatasetKind, DatasetReport, IngestConfig, IngestionPipeline};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "geo-ingest")]
#[command(author, version, about = "Geographic dataset ingestion tool")]
struct Cli {
    /// Dataset to ingest
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Database connection URL (overrides DATABASE_URL)
    #[arg(short, long)]
    connection: Option<String>,

    /// Storage directory for downloads and master files (overrides GEO_STORAGE_PATH)
    #[arg(short, long)]
    storage: Option<PathBuf>,
}

#[derive(Parser, Debug)]
enum Command {
    /// Ingest the place gazetteer
    Geonames {
        /// Only ingest a small set of countries
        #[arg(long)]
        test: bool,

        /// Use partitions already in the storage directory
        #[arg(long)]
        skip_download: bool,
    },

    /// Ingest the IP range table
    GeoIp {
        /// Use partitions already in the storage directory
        #[arg(long)]
        skip_download: bool,
    },

    /// Ingest both datasets
    All {
        /// Use partitions already in the storage directory
        #[arg(long)]
        skip_download: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over flags
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("geo-ingest")
        .build()
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    let mut config = IngestConfig::load()?;
    if let Some(connection) = cli.connection {
        config.connection = connection;
    }
    if let Some(storage) = cli.storage {
        config.storage_path = storage;
    }

    let reports = match cli.command {
        Command::Geonames {
            test,
            skip_download,
        } => {
            if test {
                config = config.with_test_countries();
            }
            let pipeline = IngestionPipeline::connect(config).await?;
            vec![run(&pipeline, DatasetKind::Geonames, skip_download).await]
        },
        Command::GeoIp { skip_download } => {
            let pipeline = IngestionPipeline::connect(config).await?;
            vec![run(&pipeline, DatasetKind::GeoIp, skip_download).await]
        },
        Command::All { skip_download } => {
            let pipeline = IngestionPipeline::connect(config).await?;
            pipeline.run_all(!skip_download).await
        },
    };

    let mut failed = false;
    for report in &reports {
        match &report.error {
            None => info!(
                dataset = %report.dataset,
                rows = report.summary.as_ref().map(|s| s.rows_in_staging),
                elapsed_secs = report.elapsed.as_secs(),
                "Dataset ingested"
            ),
            Some(e) => {
                failed = true;
                error!(
                    dataset = %report.dataset,
                    stage = ?report.failed_at,
                    error = %e,
                    "Dataset ingestion failed"
                );
            },
        }
    }

    if failed {
        Ok(ExitCode::FAILURE)
    } else {
        info!("Ingestion complete");
        Ok(ExitCode::SUCCESS)
    }
}

async fn run(pipeline: &IngestionPipeline, kind: DatasetKind, skip_download: bool) -> DatasetReport {
    if skip_download {
        pipeline.run_local(kind).await
    } else {
        pipeline.run_dataset(kind).await
    }
}

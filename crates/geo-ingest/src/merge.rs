//! Partition discovery and merging into the master file

use crate::dataset::DatasetKind;
use crate::error::{IngestError, Result};
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

const IO_BUFFER_SIZE: usize = 64 * 1024;

/// A local text file holding one partition of a dataset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionFile {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
}

/// The canonical file handed to the loader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterFile {
    pub path: PathBuf,
    /// Known after a real merge; `None` after the marker rename until counted
    pub lines: Option<u64>,
}

impl MasterFile {
    /// Line count, scanning the file once if it is not known yet
    pub fn line_count(&mut self) -> Result<u64> {
        if let Some(lines) = self.lines {
            return Ok(lines);
        }
        let lines = geo_common::files::count_lines(&self.path).map_err(|e| match e {
            geo_common::GeoError::Io(source) => IngestError::merge(&self.path, source),
            other => IngestError::merge(&self.path, io::Error::other(other.to_string())),
        })?;
        self.lines = Some(lines);
        Ok(lines)
    }

    pub fn size(&self) -> u64 {
        fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }
}

/// List the files of `dir` that take part in the merge, sorted by name
pub fn list_partition_files(dir: &Path, kind: DatasetKind) -> Result<Vec<PartitionFile>> {
    let entries = fs::read_dir(dir).map_err(|e| IngestError::merge(dir, e))?;

    let mut partitions = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| IngestError::merge(dir, e))?;
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if !kind.is_partition_file(&name) {
            continue;
        }
        let metadata = entry.metadata().map_err(|e| IngestError::merge(entry.path(), e))?;
        if !metadata.is_file() {
            continue;
        }
        partitions.push(PartitionFile {
            name,
            path: entry.path(),
            size: metadata.len(),
        });
    }

    partitions.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(partitions)
}

/// Combines the partitions of one dataset directory into its master file
pub struct FileMerger {
    kind: DatasetKind,
    dir: PathBuf,
}

impl FileMerger {
    pub fn new(kind: DatasetKind, dir: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            dir: dir.into(),
        }
    }

    pub fn master_path(&self) -> PathBuf {
        self.dir.join(self.kind.master_file_name())
    }

    /// Produce the master file.
    ///
    /// When the complete-dataset marker is present it is renamed to the master
    /// path and every other partition is ignored. Otherwise all partitions are
    /// concatenated in listing order. A partition whose last line has no
    /// terminator gets one, so the next partition starts on its own line.
    #[instrument(skip(self), fields(dataset = %self.kind))]
    pub fn merge(&self) -> Result<MasterFile> {
        let partitions = list_partition_files(&self.dir, self.kind)?;
        let master_path = self.master_path();

        if let Some(marker) = self.kind.marker_file_name() {
            if let Some(complete) = partitions.iter().find(|p| p.name == marker) {
                info!(file = %complete.name, bytes = complete.size, "Using complete dataset file as master");
                fs::rename(&complete.path, &master_path)
                    .map_err(|e| IngestError::merge(&complete.path, e))?;
                return Ok(MasterFile {
                    path: master_path,
                    lines: None,
                });
            }
        }

        if partitions.is_empty() {
            return Err(IngestError::merge(
                &self.dir,
                io::Error::new(io::ErrorKind::NotFound, "no partition files to merge"),
            ));
        }

        let master = File::create(&master_path).map_err(|e| IngestError::merge(&master_path, e))?;
        let mut writer = BufWriter::with_capacity(IO_BUFFER_SIZE, master);
        let mut total_lines = 0u64;

        for partition in &partitions {
            let lines = append_partition(&partition.path, &master_path, &mut writer)?;
            debug!(file = %partition.name, lines, "Appended partition");
            total_lines += lines;
        }

        writer.flush().map_err(|e| IngestError::merge(&master_path, e))?;

        info!(
            partitions = partitions.len(),
            lines = total_lines,
            "Merged partitions into master file"
        );

        Ok(MasterFile {
            path: master_path,
            lines: Some(total_lines),
        })
    }
}

fn append_partition(path: &Path, master_path: &Path, writer: &mut impl Write) -> Result<u64> {
    let file = File::open(path).map_err(|e| IngestError::merge(path, e))?;
    let mut reader = BufReader::with_capacity(IO_BUFFER_SIZE, file);
    let mut line = Vec::with_capacity(1024);
    let mut lines = 0u64;

    loop {
        line.clear();
        let read = reader
            .read_until(b'\n', &mut line)
            .map_err(|e| IngestError::merge(path, e))?;
        if read == 0 {
            break;
        }
        if line.last() != Some(&b'\n') {
            line.push(b'\n');
        }
        writer
            .write_all(&line)
            .map_err(|e| IngestError::merge(master_path, e))?;
        lines += 1;
    }

    Ok(lines)
}

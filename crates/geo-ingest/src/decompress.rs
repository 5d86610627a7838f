//! Streaming decompression of downloaded archives
//!
//! # Supported Formats
//!
//! - **Gzip** (`.gz`): `dbip-city-ipv4.csv.gz` -> `dbip-city-ipv4.csv`
//! - **Zip** (`.zip`): `AD.zip` -> `AD.txt`, the entry of the same stem
//!
//! Data is copied in fixed-size blocks, never buffered whole. The archive is
//! deleted once its output is complete; a failed run removes the partial output.

use crate::error::{IngestError, Result};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Block size for streaming copies
pub const BLOCK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveKind {
    Gzip,
    Zip,
}

/// Expands archives next to themselves
pub struct Decompressor;

impl Decompressor {
    /// Archive kind and output path from the archive name, `None` for unsupported extensions
    fn classify(archive: &Path) -> Option<(ArchiveKind, PathBuf)> {
        let name = archive.file_name()?.to_str()?;
        if let Some(stem) = name.strip_suffix(".gz") {
            return Some((ArchiveKind::Gzip, archive.with_file_name(stem)));
        }
        if let Some(stem) = name.strip_suffix(".zip") {
            return Some((ArchiveKind::Zip, archive.with_file_name(format!("{}.txt", stem))));
        }
        None
    }

    /// Decompress `archive` and delete it, returning the plain-text output path
    pub fn decompress(archive: &Path) -> Result<PathBuf> {
        let (kind, output) = Self::classify(archive).ok_or_else(|| {
            IngestError::decompression(
                archive,
                io::Error::new(io::ErrorKind::InvalidInput, "unsupported archive extension"),
            )
        })?;

        let written = match kind {
            ArchiveKind::Gzip => expand_gzip(archive, &output),
            ArchiveKind::Zip => expand_zip(archive, &output),
        };

        let written = match written {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = fs::remove_file(&output);
                return Err(IngestError::decompression(archive, e));
            },
        };

        fs::remove_file(archive).map_err(|e| IngestError::decompression(archive, e))?;

        info!(
            archive = %archive.display(),
            output = %output.display(),
            bytes = written,
            "Decompressed archive"
        );
        Ok(output)
    }

    /// [`Decompressor::decompress`] on the blocking thread pool
    pub async fn decompress_async(archive: PathBuf) -> Result<PathBuf> {
        let path = archive.clone();
        tokio::task::spawn_blocking(move || Self::decompress(&archive))
            .await
            .map_err(|e| IngestError::decompression(path, io::Error::other(e)))?
    }
}

fn expand_gzip(archive: &Path, output: &Path) -> io::Result<u64> {
    let decoder = GzDecoder::new(File::open(archive)?);
    copy_blocks(decoder, File::create(output)?)
}

fn expand_zip(archive: &Path, output: &Path) -> io::Result<u64> {
    let mut zip = zip::ZipArchive::new(File::open(archive)?).map_err(io::Error::other)?;

    let entry_name = output
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid output name"))?
        .to_string();

    let entry = zip.by_name(&entry_name).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("archive has no entry {}: {}", entry_name, e),
        )
    })?;
    debug!(entry = %entry_name, size = entry.size(), "Extracting zip entry");

    copy_blocks(entry, File::create(output)?)
}

fn copy_blocks(mut reader: impl Read, mut writer: impl Write) -> io::Result<u64> {
    let mut block = vec![0u8; BLOCK_SIZE];
    let mut total = 0u64;

    loop {
        let read = match reader.read(&mut block) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        writer.write_all(&block[..read])?;
        total += read as u64;
    }

    writer.flush()?;
    Ok(total)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::TempDir;

    fn gzip_file(path: &Path, content: &[u8]) {
        let mut encoder = GzEncoder::new(File::create(path).unwrap(), Compression::default());
        encoder.write_all(content).unwrap();
        encoder.finish().unwrap();
    }

    fn zip_file(path: &Path, entries: &[(&str, &[u8])]) {
        let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
        for (name, content) in entries {
            writer
                .start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn test_classify() {
        assert_eq!(
            Decompressor::classify(Path::new("/s/dbip-city-ipv6.csv.gz")),
            Some((ArchiveKind::Gzip, PathBuf::from("/s/dbip-city-ipv6.csv")))
        );
        assert_eq!(
            Decompressor::classify(Path::new("/s/allCountries.zip")),
            Some((ArchiveKind::Zip, PathBuf::from("/s/allCountries.txt")))
        );
        assert_eq!(Decompressor::classify(Path::new("/s/AD.tar")), None);
    }

    #[test]
    fn test_gzip_larger_than_one_block() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("dbip-city-ipv4.csv.gz");
        let content: String = (0..20_000)
            .map(|i| format!("10.0.{}.0,10.0.{}.255,DE,,,,,48.7,9.1,\n", i % 256, i % 256))
            .collect();
        assert!(content.len() > BLOCK_SIZE);
        gzip_file(&archive, content.as_bytes());

        let output = Decompressor::decompress(&archive).unwrap();

        assert_eq!(fs::read_to_string(&output).unwrap(), content);
        assert!(!archive.exists());
    }

    #[test]
    fn test_zip_picks_matching_entry() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("AD.zip");
        zip_file(
            &archive,
            &[("readme.txt", b"about"), ("AD.txt", b"3039154\tEl Tarter\n")],
        );

        let output = Decompressor::decompress(&archive).unwrap();

        assert_eq!(output, dir.path().join("AD.txt"));
        assert_eq!(fs::read_to_string(&output).unwrap(), "3039154\tEl Tarter\n");
        assert!(!archive.exists());
    }

    #[test]
    fn test_corrupt_archive_keeps_source_and_no_output() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("broken.csv.gz");
        fs::write(&archive, b"definitely not gzip").unwrap();

        let err = Decompressor::decompress(&archive).unwrap_err();

        match err {
            IngestError::Decompression { path, .. } => assert_eq!(path, archive),
            other => panic!("unexpected error: {other}"),
        }
        assert!(archive.exists());
        assert!(!dir.path().join("broken.csv").exists());
    }

    #[test]
    fn test_zip_without_expected_entry() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("AD.zip");
        zip_file(&archive, &[("readme.txt", b"about")]);

        assert!(Decompressor::decompress(&archive).is_err());
        assert!(!dir.path().join("AD.txt").exists());
    }

    #[tokio::test]
    async fn test_decompress_async() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("dbip-city-ipv6.csv.gz");
        gzip_file(&archive, b"::1,::ff,US,,,,,1.0,2.0,\n");

        let output = Decompressor::decompress_async(archive).await.unwrap();
        assert!(output.ends_with("dbip-city-ipv6.csv"));
    }
}

//! File helpers used around the staged ingestion

use crate::error::{GeoError, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use url::Url;

/// Count the lines of a text file without loading it into memory.
///
/// A final line without a trailing newline still counts as a line.
pub fn count_lines(path: impl AsRef<Path>) -> Result<u64> {
    let file = File::open(path)?;
    let mut reader = BufReader::with_capacity(64 * 1024, file);
    let mut lines = 0u64;
    let mut last_byte = None;

    loop {
        let buffer = reader.fill_buf()?;
        if buffer.is_empty() {
            break;
        }
        lines += buffer.iter().filter(|&&b| b == b'\n').count() as u64;
        last_byte = buffer.last().copied();
        let consumed = buffer.len();
        reader.consume(consumed);
    }

    if matches!(last_byte, Some(b) if b != b'\n') {
        lines += 1;
    }

    Ok(lines)
}

/// Derive the local file name for a remote resource from the last path segment of its URL.
///
/// Query strings and fragments are ignored.
pub fn local_file_name(url: &str) -> Result<String> {
    let parsed = Url::parse(url).map_err(|e| GeoError::Parse(format!("Invalid URL {}: {}", url, e)))?;

    match parsed.path_segments().and_then(|mut segments| segments.next_back()) {
        Some(name) if !name.is_empty() => Ok(name.to_string()),
        _ => Err(GeoError::Parse(format!("No file name in URL: {}", url))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_count_lines_terminated() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "a\nb\nc\n").unwrap();
        assert_eq!(count_lines(file.path()).unwrap(), 3);
    }

    #[test]
    fn test_count_lines_unterminated_tail() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "a\nb").unwrap();
        assert_eq!(count_lines(file.path()).unwrap(), 2);
    }

    #[test]
    fn test_count_lines_empty() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert_eq!(count_lines(file.path()).unwrap(), 0);
    }

    #[test]
    fn test_local_file_name() {
        assert_eq!(
            local_file_name("https://download.geonames.org/export/dump/AD.zip").unwrap(),
            "AD.zip"
        );
        assert_eq!(
            local_file_name("https://example.org/dbip-city-ipv4.csv.gz?raw=true").unwrap(),
            "dbip-city-ipv4.csv.gz"
        );
        assert_eq!(
            local_file_name("https://example.org/export/dump/AD.zip#latest").unwrap(),
            "AD.zip"
        );
        assert!(local_file_name("https://example.org").is_err());
        assert!(local_file_name("https://example.org/export/").is_err());
        assert!(local_file_name("not a url").is_err());
    }
}

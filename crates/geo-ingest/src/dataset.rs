//! Dataset definitions: table names, column schemas, file layouts and source locations

use crate::config::IngestConfig;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

#[allow(clippy::expect_used)]
static PLACE_PARTITION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]{2}\.txt$").expect("valid partition pattern"));

#[allow(clippy::expect_used)]
static IP_PARTITION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^dbip-city-ipv[46]\.csv$").expect("valid partition pattern"));

/// Timestamp column assigned at load time, never read from the source
pub const CREATED_AT: &str = "created_at";
/// Timestamp column left null at load time
pub const UPDATED_AT: &str = "updated_at";

/// The two independently ingested datasets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DatasetKind {
    /// Global gazetteer of place records
    Geonames,
    /// IPv4 + IPv6 range to location table
    GeoIp,
}

/// Value type of a source column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
    Real,
    /// `YYYY-MM-DD`
    Date,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnType,
}

const fn col(name: &'static str, kind: ColumnType) -> Column {
    Column { name, kind }
}

const PLACE_COLUMNS: [Column; 19] = [
    col("geonameid", ColumnType::Integer),
    col("name", ColumnType::Text),
    col("asciiname", ColumnType::Text),
    col("alternatenames", ColumnType::Text),
    col("latitude", ColumnType::Real),
    col("longitude", ColumnType::Real),
    col("feature_class", ColumnType::Text),
    col("feature_code", ColumnType::Text),
    col("country_code", ColumnType::Text),
    col("cc2", ColumnType::Text),
    col("admin1_code", ColumnType::Text),
    col("admin2_code", ColumnType::Text),
    col("admin3_code", ColumnType::Text),
    col("admin4_code", ColumnType::Text),
    col("population", ColumnType::Integer),
    col("elevation", ColumnType::Integer),
    col("dem", ColumnType::Integer),
    col("timezone", ColumnType::Text),
    col("modification_date", ColumnType::Date),
];

const IP_RANGE_COLUMNS: [Column; 9] = [
    col("ip_start", ColumnType::Text),
    col("ip_end", ColumnType::Text),
    col("isoCountry", ColumnType::Text),
    col("region", ColumnType::Text),
    col("area", ColumnType::Text),
    col("city", ColumnType::Text),
    col("street", ColumnType::Text),
    col("latitude", ColumnType::Real),
    col("longitude", ColumnType::Real),
];

/// Physical layout of a delimited text file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileFormat {
    pub delimiter: u8,
    /// Optional enclosing quote; `None` means fields are never quoted
    pub quote: Option<u8>,
    pub line_terminator: u8,
}

impl FileFormat {
    /// CSV reader settings for this layout; a `\n` terminator also accepts `\r\n`
    pub fn reader_builder(&self) -> csv::ReaderBuilder {
        let terminator = match self.line_terminator {
            b'\n' => csv::Terminator::CRLF,
            other => csv::Terminator::Any(other),
        };
        let mut builder = csv::ReaderBuilder::new();
        builder
            .has_headers(false)
            .flexible(true)
            .delimiter(self.delimiter)
            .terminator(terminator)
            .quoting(self.quote.is_some())
            .quote(self.quote.unwrap_or(b'"'));
        builder
    }
}

impl DatasetKind {
    pub const ALL: [DatasetKind; 2] = [DatasetKind::Geonames, DatasetKind::GeoIp];

    pub fn name(self) -> &'static str {
        match self {
            DatasetKind::Geonames => "geonames",
            DatasetKind::GeoIp => "geo-ip",
        }
    }

    /// Subdirectory of the storage path holding this dataset's files
    pub fn directory(self) -> &'static str {
        match self {
            DatasetKind::Geonames => "places",
            DatasetKind::GeoIp => "geo-ip",
        }
    }

    pub fn live_table(self, prefix: &str) -> String {
        match self {
            DatasetKind::Geonames => format!("{}geonames", prefix),
            DatasetKind::GeoIp => format!("{}geonames_geo_ip", prefix),
        }
    }

    pub fn staging_table(self, prefix: &str) -> String {
        format!("{}_working", self.live_table(prefix))
    }

    pub fn master_file_name(self) -> &'static str {
        match self {
            DatasetKind::Geonames => "master.txt",
            DatasetKind::GeoIp => "dbip-city-master.csv",
        }
    }

    /// Name of the "complete dataset" file that replaces merging when present
    pub fn marker_file_name(self) -> Option<&'static str> {
        match self {
            DatasetKind::Geonames => Some("allCountries.txt"),
            DatasetKind::GeoIp => None,
        }
    }

    /// Whether a file in the dataset directory takes part in the merge
    pub fn is_partition_file(self, name: &str) -> bool {
        if self.marker_file_name() == Some(name) {
            return true;
        }
        match self {
            DatasetKind::Geonames => PLACE_PARTITION.is_match(name),
            DatasetKind::GeoIp => IP_PARTITION.is_match(name),
        }
    }

    pub fn format(self) -> FileFormat {
        match self {
            DatasetKind::Geonames => FileFormat {
                delimiter: b'\t',
                quote: None,
                line_terminator: b'\n',
            },
            DatasetKind::GeoIp => FileFormat {
                delimiter: b',',
                quote: Some(b'"'),
                line_terminator: b'\n',
            },
        }
    }

    /// Source columns in file order, timestamps excluded
    pub fn columns(self) -> &'static [Column] {
        match self {
            DatasetKind::Geonames => &PLACE_COLUMNS,
            DatasetKind::GeoIp => &IP_RANGE_COLUMNS,
        }
    }

    pub fn column_names(self) -> Vec<&'static str> {
        self.columns().iter().map(|c| c.name).collect()
    }

    /// Remote archives for one run.
    ///
    /// Places come as one zip per selected country, or a single `allCountries.zip`
    /// when every country is selected. IP ranges always come as two gzip archives.
    pub fn source_urls(self, config: &IngestConfig) -> Vec<String> {
        match self {
            DatasetKind::Geonames => {
                let base = config.geonames_base_url.trim_end_matches('/');
                if config.all_countries() {
                    vec![format!("{}/allCountries.zip", base)]
                } else {
                    config
                        .countries
                        .iter()
                        .map(|code| format!("{}/{}.zip", base, code))
                        .collect()
                }
            },
            DatasetKind::GeoIp => {
                let base = config.geo_ip_base_url.trim_end_matches('/');
                vec![
                    format!("{}/dbip-city-ipv4.csv.gz", base),
                    format!("{}/dbip-city-ipv6.csv.gz", base),
                ]
            },
        }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for DatasetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "geonames" | "places" => Ok(DatasetKind::Geonames),
            "geo-ip" | "geoip" | "ip" => Ok(DatasetKind::GeoIp),
            _ => Err(format!("Unknown dataset: {}", s)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_builder_honours_terminator() {
        let format = FileFormat {
            delimiter: b',',
            quote: None,
            line_terminator: b';',
        };
        let mut reader = format.reader_builder().from_reader("a,b;c,d;".as_bytes());
        let records: Vec<csv::StringRecord> = reader.records().collect::<std::result::Result<_, _>>().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(&records[1][0], "c");

        let mut reader = DatasetKind::Geonames
            .format()
            .reader_builder()
            .from_reader("1\t\"quoted\r\n2\tplain\n".as_bytes());
        let records: Vec<csv::StringRecord> = reader.records().collect::<std::result::Result<_, _>>().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(&records[0][1], "\"quoted");
    }

    #[test]
    fn test_place_partition_predicate() {
        let kind = DatasetKind::Geonames;
        assert!(kind.is_partition_file("AA.txt"));
        assert!(kind.is_partition_file("DE.txt"));
        assert!(kind.is_partition_file("allCountries.txt"));

        assert!(!kind.is_partition_file("master.txt"));
        assert!(!kind.is_partition_file("de.txt"));
        assert!(!kind.is_partition_file("DEU.txt"));
        assert!(!kind.is_partition_file("DE.zip"));
        assert!(!kind.is_partition_file("readme.txt"));
        assert!(!kind.is_partition_file("DE.txt.bak"));
    }

    #[test]
    fn test_ip_partition_predicate() {
        let kind = DatasetKind::GeoIp;
        assert!(kind.is_partition_file("dbip-city-ipv4.csv"));
        assert!(kind.is_partition_file("dbip-city-ipv6.csv"));
        assert!(!kind.is_partition_file("dbip-city-ipv4.csv.gz"));
        assert!(!kind.is_partition_file("dbip-city-master.csv"));
        assert!(!kind.is_partition_file("AA.txt"));
    }

    #[test]
    fn test_table_names() {
        assert_eq!(DatasetKind::Geonames.live_table(""), "geonames");
        assert_eq!(DatasetKind::Geonames.staging_table(""), "geonames_working");
        assert_eq!(DatasetKind::GeoIp.live_table("app_"), "app_geonames_geo_ip");
        assert_eq!(DatasetKind::GeoIp.staging_table("app_"), "app_geonames_geo_ip_working");
    }

    #[test]
    fn test_schemas() {
        assert_eq!(DatasetKind::Geonames.columns().len(), 19);
        assert_eq!(DatasetKind::GeoIp.columns().len(), 9);
        assert_eq!(DatasetKind::Geonames.column_names()[18], "modification_date");
        assert_eq!(DatasetKind::GeoIp.column_names()[2], "isoCountry");
    }

    #[test]
    fn test_source_urls() {
        let config = IngestConfig::builder()
            .geonames_base_url("https://dump.example.org/export/")
            .geo_ip_base_url("https://ip.example.org/dbip-city")
            .build();
        assert_eq!(
            DatasetKind::Geonames.source_urls(&config),
            vec!["https://dump.example.org/export/allCountries.zip"]
        );
        assert_eq!(DatasetKind::GeoIp.source_urls(&config).len(), 2);

        let config = IngestConfig::builder()
            .geonames_base_url("https://dump.example.org/export")
            .countries(vec!["BS".into(), "UZ".into()])
            .build();
        assert_eq!(
            DatasetKind::Geonames.source_urls(&config),
            vec![
                "https://dump.example.org/export/BS.zip",
                "https://dump.example.org/export/UZ.zip"
            ]
        );
    }

    #[test]
    fn test_from_str() {
        assert_eq!("geonames".parse::<DatasetKind>().unwrap(), DatasetKind::Geonames);
        assert_eq!("geo-ip".parse::<DatasetKind>().unwrap(), DatasetKind::GeoIp);
        assert!("weather".parse::<DatasetKind>().is_err());
    }
}

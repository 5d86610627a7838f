//! Mapping of positional source fields onto typed column values

use crate::dataset::{Column, ColumnType};
use chrono::{NaiveDate, NaiveDateTime};
use csv::StringRecord;

/// A typed, possibly null, column value.
///
/// Nulls keep their type so backends with strict typing can bind them.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(Option<String>),
    Integer(Option<i64>),
    Real(Option<f64>),
    Date(Option<NaiveDate>),
    Timestamp(Option<NaiveDateTime>),
}

/// Why a source record could not be mapped
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RecordError {
    #[error("expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },

    #[error("unexpected value in trailing field {index}: {value:?}")]
    TrailingField { index: usize, value: String },

    #[error("invalid {kind} value for {column}: {value:?}")]
    InvalidValue {
        column: &'static str,
        kind: &'static str,
        value: String,
    },
}

/// Map one record onto `columns` by position.
///
/// Empty fields become typed nulls. Fields beyond the schema are accepted only
/// when empty (the trailing slots some sources reserve for timestamps).
pub fn map_record(columns: &[Column], record: &StringRecord) -> Result<Vec<FieldValue>, RecordError> {
    if record.len() < columns.len() {
        return Err(RecordError::FieldCount {
            expected: columns.len(),
            found: record.len(),
        });
    }

    if let Some((index, value)) = record
        .iter()
        .enumerate()
        .skip(columns.len())
        .find(|(_, v)| !v.is_empty())
    {
        return Err(RecordError::TrailingField {
            index,
            value: value.to_string(),
        });
    }

    columns
        .iter()
        .zip(record.iter())
        .map(|(column, raw)| parse_field(column, raw))
        .collect()
}

fn parse_field(column: &Column, raw: &str) -> Result<FieldValue, RecordError> {
    let raw = raw.trim_end_matches('\r');
    let invalid = |kind: &'static str| RecordError::InvalidValue {
        column: column.name,
        kind,
        value: raw.to_string(),
    };

    if raw.is_empty() {
        return Ok(match column.kind {
            ColumnType::Text => FieldValue::Text(None),
            ColumnType::Integer => FieldValue::Integer(None),
            ColumnType::Real => FieldValue::Real(None),
            ColumnType::Date => FieldValue::Date(None),
        });
    }

    match column.kind {
        ColumnType::Text => Ok(FieldValue::Text(Some(raw.to_string()))),
        ColumnType::Integer => raw
            .trim()
            .parse()
            .map(|v| FieldValue::Integer(Some(v)))
            .map_err(|_| invalid("integer")),
        ColumnType::Real => raw
            .trim()
            .parse()
            .map(|v| FieldValue::Real(Some(v)))
            .map_err(|_| invalid("real")),
        ColumnType::Date => NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
            .map(|v| FieldValue::Date(Some(v)))
            .map_err(|_| invalid("date")),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::dataset::DatasetKind;

    fn tab_record(line: &str) -> StringRecord {
        StringRecord::from(line.split('\t').collect::<Vec<_>>())
    }

    #[test]
    fn test_place_record() {
        let line = "3039154\tEl Tarter\tEl Tarter\tAnsalonga,Ehl'-Tarter\t42.57952\t1.65362\tP\tPPL\tAD\t\t02\t\t\t\t1052\t\t1721\tEurope/Andorra\t2012-11-03";
        let values = map_record(DatasetKind::Geonames.columns(), &tab_record(line)).unwrap();

        assert_eq!(values.len(), 19);
        assert_eq!(values[0], FieldValue::Integer(Some(3039154)));
        assert_eq!(values[1], FieldValue::Text(Some("El Tarter".into())));
        assert_eq!(values[4], FieldValue::Real(Some(42.57952)));
        assert_eq!(values[9], FieldValue::Text(None));
        assert_eq!(values[14], FieldValue::Integer(Some(1052)));
        assert_eq!(values[15], FieldValue::Integer(None));
        assert_eq!(
            values[18],
            FieldValue::Date(Some(NaiveDate::from_ymd_opt(2012, 11, 3).unwrap()))
        );
    }

    #[test]
    fn test_ip_record_with_reserved_trailing_field() {
        let record = StringRecord::from(vec![
            "81.3.16.0", "81.3.16.239", "DE", "Baden-Wurttemberg", "", "Stuttgart (Sud)", "",
            "48.7595", "9.16183", "",
        ]);
        let values = map_record(DatasetKind::GeoIp.columns(), &record).unwrap();

        assert_eq!(values.len(), 9);
        assert_eq!(values[2], FieldValue::Text(Some("DE".into())));
        assert_eq!(values[4], FieldValue::Text(None));
        assert_eq!(values[8], FieldValue::Real(Some(9.16183)));
    }

    #[test]
    fn test_rejects_short_record() {
        let err = map_record(DatasetKind::Geonames.columns(), &tab_record("1\tname")).unwrap_err();
        assert_eq!(
            err,
            RecordError::FieldCount {
                expected: 19,
                found: 2
            }
        );
    }

    #[test]
    fn test_rejects_non_empty_trailing_field() {
        let record = StringRecord::from(vec!["a", "b", "DE", "", "", "", "", "1", "2", "extra"]);
        assert!(matches!(
            map_record(DatasetKind::GeoIp.columns(), &record),
            Err(RecordError::TrailingField { index: 9, .. })
        ));
    }

    #[test]
    fn test_rejects_bad_number() {
        let mut fields = vec![""; 19];
        fields[0] = "not-a-number";
        let err = map_record(DatasetKind::Geonames.columns(), &StringRecord::from(fields)).unwrap_err();
        assert!(matches!(err, RecordError::InvalidValue { column: "geonameid", .. }));
    }
}

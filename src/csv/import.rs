//! CSV table loading
//!
//! A loadable file needs a `timestamp` header (case-insensitive) and at
//! least one recognized series column. Rows whose timestamp does not parse
//! are dropped with a warning; everything that survives is sorted ascending
//! by timestamp so replay is chronological regardless of on-disk row order.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, TelemvisError};
use crate::types::{Sample, SeriesId};

/// Unit of the timestamp column in an imported file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TimestampUnit {
    /// Milliseconds (the default)
    #[default]
    #[serde(rename = "ms")]
    Milliseconds,
    /// Seconds, converted to milliseconds on ingest
    #[serde(rename = "s")]
    Seconds,
}

impl TimestampUnit {
    /// Normalize a raw timestamp value to milliseconds
    pub fn to_millis(&self, raw: f64) -> f64 {
        match self {
            TimestampUnit::Milliseconds => raw,
            TimestampUnit::Seconds => raw * 1000.0,
        }
    }
}

impl std::fmt::Display for TimestampUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimestampUnit::Milliseconds => write!(f, "ms"),
            TimestampUnit::Seconds => write!(f, "s"),
        }
    }
}

/// A parsed, validated CSV table
#[derive(Debug, Clone)]
pub struct CsvTable {
    /// Recognized series, in header order — the available set for replay
    pub series: Vec<SeriesId>,
    /// Data rows, sorted ascending by timestamp (milliseconds)
    pub rows: Vec<Sample>,
}

impl CsvTable {
    /// Number of data rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check whether the table holds no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Duration covered by the table, in milliseconds
    pub fn duration_ms(&self) -> f64 {
        match (self.rows.first(), self.rows.last()) {
            (Some(first), Some(last)) => last.timestamp_ms - first.timestamp_ms,
            _ => 0.0,
        }
    }
}

/// Parse CSV text into a validated table.
///
/// Rejected outright (load refused, not partially accepted) when the header
/// is missing, no `timestamp` column exists, no recognized series column
/// exists, or no data row survives parsing.
pub fn parse_csv(text: &str, unit: TimestampUnit) -> Result<CsvTable> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| TelemvisError::CsvValidation(format!("unreadable header row: {}", e)))?
        .clone();

    let mut timestamp_col = None;
    let mut series_cols: Vec<(usize, SeriesId)> = Vec::new();
    for (i, header) in headers.iter().enumerate() {
        let name = header.trim().trim_matches('"');
        if name.eq_ignore_ascii_case("timestamp") {
            if timestamp_col.is_none() {
                timestamp_col = Some(i);
            }
        } else if let Some(series) = SeriesId::from_name(name) {
            if !series_cols.iter().any(|(_, s)| *s == series) {
                series_cols.push((i, series));
            }
        }
    }

    let Some(timestamp_col) = timestamp_col else {
        return Err(TelemvisError::CsvValidation(
            "missing 'timestamp' column".to_string(),
        ));
    };
    if series_cols.is_empty() {
        return Err(TelemvisError::CsvValidation(
            "no recognized data columns".to_string(),
        ));
    }

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("skipping unreadable row {}: {}", line + 2, e);
                continue;
            }
        };
        let raw_ts = record.get(timestamp_col).unwrap_or("");
        let Some(raw_ts) = parse_cell(raw_ts) else {
            tracing::warn!(
                "skipping row {}: invalid timestamp {:?}",
                line + 2,
                record.get(timestamp_col)
            );
            continue;
        };
        let mut sample = Sample::new(unit.to_millis(raw_ts));
        for (col, series) in &series_cols {
            sample.set(*series, record.get(*col).and_then(parse_cell));
        }
        rows.push(sample);
    }

    if rows.is_empty() {
        return Err(TelemvisError::CsvValidation(
            "no valid data rows".to_string(),
        ));
    }

    rows.sort_by(|a, b| a.timestamp_ms.total_cmp(&b.timestamp_ms));

    Ok(CsvTable {
        series: series_cols.into_iter().map(|(_, s)| s).collect(),
        rows,
    })
}

/// Load and parse a CSV file from disk
pub fn load_csv_file(path: &Path, unit: TimestampUnit) -> Result<CsvTable> {
    let text = std::fs::read_to_string(path)?;
    parse_csv(&text, unit)
}

fn parse_cell(cell: &str) -> Option<f64> {
    let cell = cell.trim();
    if cell.is_empty() {
        return None;
    }
    cell.parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_sorted_by_timestamp() {
        let table = parse_csv(
            "timestamp,pressure\n5,1.5\n1,1.1\n3,1.3\n",
            TimestampUnit::Milliseconds,
        )
        .unwrap();
        let order: Vec<f64> = table.rows.iter().map(|r| r.timestamp_ms).collect();
        assert_eq!(order, vec![1.0, 3.0, 5.0]);
    }

    #[test]
    fn test_missing_timestamp_header_rejected() {
        let err = parse_csv("time,pressure\n1,2\n", TimestampUnit::Milliseconds);
        assert!(matches!(err, Err(TelemvisError::CsvValidation(_))));
    }

    #[test]
    fn test_no_recognized_columns_rejected() {
        let err = parse_csv("timestamp,altitude\n1,2\n", TimestampUnit::Milliseconds);
        assert!(matches!(err, Err(TelemvisError::CsvValidation(_))));
    }

    #[test]
    fn test_empty_file_rejected() {
        assert!(parse_csv("", TimestampUnit::Milliseconds).is_err());
        assert!(parse_csv("timestamp,pressure\n", TimestampUnit::Milliseconds).is_err());
    }

    #[test]
    fn test_header_is_case_insensitive() {
        let table = parse_csv(
            "Timestamp,PRESSURE\n1,1013\n",
            TimestampUnit::Milliseconds,
        )
        .unwrap();
        assert_eq!(table.series, vec![SeriesId::Pressure]);
    }

    #[test]
    fn test_seconds_unit_converted_on_ingest() {
        let table = parse_csv("timestamp,thrust\n2.5,10\n", TimestampUnit::Seconds).unwrap();
        assert_eq!(table.rows[0].timestamp_ms, 2500.0);
    }

    #[test]
    fn test_bad_timestamp_row_dropped_rest_kept() {
        let table = parse_csv(
            "timestamp,thrust\n1,10\nbogus,20\n3,30\n",
            TimestampUnit::Milliseconds,
        )
        .unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows[1].value(SeriesId::Thrust), Some(30.0));
    }

    #[test]
    fn test_empty_cell_is_none_not_failure() {
        let table = parse_csv(
            "timestamp,pressure,thrust\n1,,10\n2,1013,abc\n",
            TimestampUnit::Milliseconds,
        )
        .unwrap();
        assert_eq!(table.rows[0].value(SeriesId::Pressure), None);
        assert_eq!(table.rows[0].value(SeriesId::Thrust), Some(10.0));
        assert_eq!(table.rows[1].value(SeriesId::Thrust), None);
    }

    #[test]
    fn test_short_row_pads_missing_columns() {
        let table = parse_csv(
            "timestamp,pressure,thrust\n1,1013\n",
            TimestampUnit::Milliseconds,
        )
        .unwrap();
        assert_eq!(table.rows[0].value(SeriesId::Thrust), None);
    }

    #[test]
    fn test_flight_series_recognized() {
        let table = parse_csv(
            "timestamp,acc_x,acc_y,acc_z\n1,0.1,0.2,9.8\n",
            TimestampUnit::Milliseconds,
        )
        .unwrap();
        assert_eq!(
            table.series,
            vec![SeriesId::AccX, SeriesId::AccY, SeriesId::AccZ]
        );
    }
}

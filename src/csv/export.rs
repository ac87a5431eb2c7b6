//! CSV export of the session log
//!
//! The header row is `timestamp,<series...>` for the active series set; a
//! `None` value renders as an empty field. Filenames carry the source mode
//! and a UTC timestamp so consecutive sessions never clobber each other.

use chrono::{DateTime, Utc};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::types::{Sample, SeriesId};

/// Write samples as CSV to any writer
pub fn export_samples<W: Write>(
    writer: W,
    series: &[SeriesId],
    samples: &[Sample],
) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);

    let mut header = vec!["timestamp".to_string()];
    header.extend(series.iter().map(|s| s.name().to_string()));
    csv_writer.write_record(&header)?;

    for sample in samples {
        let mut record = vec![format_value(sample.timestamp_ms)];
        for s in series {
            record.push(sample.value(*s).map(format_value).unwrap_or_default());
        }
        csv_writer.write_record(&record)?;
    }
    csv_writer.flush()?;
    Ok(())
}

/// Build the export filename for a source mode at a point in time
pub fn export_filename(mode_label: &str, now: DateTime<Utc>) -> String {
    format!("{}-log-{}.csv", mode_label, now.format("%Y-%m-%d_%H-%M-%S"))
}

/// Export samples into a directory, returning the written path
pub fn export_to_dir(
    dir: &Path,
    mode_label: &str,
    series: &[SeriesId],
    samples: &[Sample],
) -> Result<PathBuf> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
    }
    let path = dir.join(export_filename(mode_label, Utc::now()));
    let file = std::fs::File::create(&path)?;
    export_samples(file, series, samples)?;
    tracing::info!("exported {} samples to {}", samples.len(), path.display());
    Ok(path)
}

fn format_value(value: f64) -> String {
    // f64 Display keeps the shortest round-trippable form (1000.5 -> "1000.5",
    // 1000.0 -> "1000")
    format!("{}", value)
}

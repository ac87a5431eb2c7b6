//! CSV import and export
//!
//! Import turns an uploaded CSV file into a validated, timestamp-sorted
//! table ready for replay; export writes the session log back out with the
//! active series as columns. Exporting a buffer and re-importing the file
//! reproduces the same `(timestamp, values)` rows.

pub mod export;
pub mod import;

pub use export::{export_filename, export_samples, export_to_dir};
pub use import::{load_csv_file, parse_csv, CsvTable, TimestampUnit};

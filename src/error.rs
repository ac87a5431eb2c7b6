//! Error handling for telemvis
//!
//! This module defines the crate-wide error type and a Result alias used
//! throughout the library.

use thiserror::Error;

/// Main error type for telemvis operations
#[derive(Error, Debug)]
pub enum TelemvisError {
    /// Errors from the underlying serial port
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Errors related to CSV import/export
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A loaded CSV file failed validation (missing header, no data columns)
    #[error("CSV validation failed: {0}")]
    CsvValidation(String),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors related to channel communication
    #[error("Channel error: {0}")]
    Channel(String),

    /// A guaranteed command was rejected because another is in flight
    #[error("Command conflict: {0} is already in flight")]
    CommandInFlight(String),

    /// The requested operation needs an open connection
    #[error("Not connected")]
    NotConnected,

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<TelemvisError>,
    },
}

impl TelemvisError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        TelemvisError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Result type alias for telemvis operations
pub type Result<T> = std::result::Result<T, TelemvisError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TelemvisError::Config("missing export directory".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: missing export directory"
        );
    }

    #[test]
    fn test_error_with_context() {
        let err = TelemvisError::NotConnected;
        let with_ctx = err.with_context("Failed to send ARM");
        assert!(with_ctx.to_string().contains("Failed to send ARM"));
        assert!(with_ctx.to_string().contains("Not connected"));
    }

    #[test]
    fn test_command_conflict_display() {
        let err = TelemvisError::CommandInFlight("AT+SEND=42,3,ARM".to_string());
        assert!(err.to_string().contains("already in flight"));
    }
}

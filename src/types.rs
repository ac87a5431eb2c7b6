//! Core data types for telemvis
//!
//! This module contains the fundamental data structures used throughout
//! the crate for representing telemetry series, samples, and statistics.
//!
//! # Main Types
//!
//! - [`SeriesId`] - The closed vocabulary of telemetry channels (pressure,
//!   thrust, temperature, plus the flight-mode IMU axes)
//! - [`Sample`] - A single timestamped observation across all series
//! - [`TelemetryBuffer`] - Parallel time-indexed column storage driving plots
//! - [`StatsTracker`] / [`RunningMax`] - O(1) per-sample running statistics
//!
//! # Missing Values
//!
//! A value that is absent or unparsable in an input record is carried as
//! `None` in its series slot, never dropped from the row shape: every active
//! series contributes exactly one entry per appended sample, so the buffer
//! columns always stay aligned with the shared time column.

use serde::{Deserialize, Serialize};

/// One named scalar channel of telemetry.
///
/// Wire names (CSV headers, config keys) use the snake_case form, e.g.
/// `acc_x` for [`SeriesId::AccX`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesId {
    Pressure,
    Thrust,
    Temperature,
    AccX,
    AccY,
    AccZ,
    GyroX,
    GyroY,
    GyroZ,
}

impl SeriesId {
    /// Number of series in the vocabulary
    pub const COUNT: usize = 9;

    /// All series, in canonical order
    pub fn all() -> &'static [SeriesId] {
        &[
            SeriesId::Pressure,
            SeriesId::Thrust,
            SeriesId::Temperature,
            SeriesId::AccX,
            SeriesId::AccY,
            SeriesId::AccZ,
            SeriesId::GyroX,
            SeriesId::GyroY,
            SeriesId::GyroZ,
        ]
    }

    /// The legacy stat/thumbnail trio shared by the bench-test modes
    pub fn legacy() -> &'static [SeriesId] {
        &[SeriesId::Pressure, SeriesId::Thrust, SeriesId::Temperature]
    }

    /// Stable wire name used in CSV headers and configuration
    pub fn name(&self) -> &'static str {
        match self {
            SeriesId::Pressure => "pressure",
            SeriesId::Thrust => "thrust",
            SeriesId::Temperature => "temperature",
            SeriesId::AccX => "acc_x",
            SeriesId::AccY => "acc_y",
            SeriesId::AccZ => "acc_z",
            SeriesId::GyroX => "gyro_x",
            SeriesId::GyroY => "gyro_y",
            SeriesId::GyroZ => "gyro_z",
        }
    }

    /// Parse a wire name (case-insensitive)
    pub fn from_name(name: &str) -> Option<SeriesId> {
        let name = name.trim().to_ascii_lowercase();
        SeriesId::all().iter().copied().find(|s| s.name() == name)
    }

    /// Unit label for display
    pub fn unit(&self) -> &'static str {
        match self {
            SeriesId::Pressure => "hPa",
            SeriesId::Thrust => "N",
            SeriesId::Temperature => "°C",
            SeriesId::AccX | SeriesId::AccY | SeriesId::AccZ => "m/s²",
            SeriesId::GyroX | SeriesId::GyroY | SeriesId::GyroZ => "°/s",
        }
    }

    #[inline]
    pub(crate) fn index(&self) -> usize {
        *self as usize
    }
}

impl std::fmt::Display for SeriesId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A single timestamped observation across all series.
///
/// The timestamp is always in milliseconds, regardless of the source; unit
/// normalization to seconds happens once, at buffer append.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Timestamp in milliseconds. Always numeric and non-NaN: a record whose
    /// timestamp does not parse never becomes a `Sample`.
    pub timestamp_ms: f64,
    values: [Option<f64>; SeriesId::COUNT],
}

impl Sample {
    /// Create an empty sample at the given timestamp
    pub fn new(timestamp_ms: f64) -> Self {
        debug_assert!(!timestamp_ms.is_nan());
        Self {
            timestamp_ms,
            values: [None; SeriesId::COUNT],
        }
    }

    /// Builder-style value assignment
    pub fn with_value(mut self, series: SeriesId, value: f64) -> Self {
        self.values[series.index()] = Some(value);
        self
    }

    /// Set a series slot (including back to `None`)
    pub fn set(&mut self, series: SeriesId, value: Option<f64>) {
        self.values[series.index()] = value;
    }

    /// Get the value for a series, `None` if missing/unparsable
    pub fn value(&self, series: SeriesId) -> Option<f64> {
        self.values[series.index()]
    }

    /// Timestamp normalized to seconds
    pub fn time_secs(&self) -> f64 {
        self.timestamp_ms / 1000.0
    }
}

/// Time-indexed parallel column storage for the active series set.
///
/// `time[i]` corresponds to `column(s)[i]` for every active series `s`.
/// Created empty at session start, appended during the session, and fully
/// replaced by [`TelemetryBuffer::clear`] on restart.
#[derive(Debug, Clone)]
pub struct TelemetryBuffer {
    series: Vec<SeriesId>,
    time: Vec<f64>,
    columns: Vec<Vec<Option<f64>>>,
}

impl TelemetryBuffer {
    /// Create an empty buffer for the given active series set
    pub fn new(series: &[SeriesId]) -> Self {
        Self {
            series: series.to_vec(),
            time: Vec::new(),
            columns: vec![Vec::new(); series.len()],
        }
    }

    /// The active series set, in display order
    pub fn series(&self) -> &[SeriesId] {
        &self.series
    }

    /// Append one sample, normalizing its timestamp to seconds.
    ///
    /// Live device clocks may glitch backwards; a non-increasing timestamp is
    /// accepted and logged rather than rejected.
    pub fn append(&mut self, sample: &Sample) {
        let t = sample.time_secs();
        if let Some(&last) = self.time.last() {
            if t <= last {
                tracing::debug!("non-increasing timestamp {:.3}s after {:.3}s", t, last);
            }
        }
        self.time.push(t);
        for (i, series) in self.series.iter().enumerate() {
            self.columns[i].push(sample.value(*series));
        }
    }

    /// The shared time column, in seconds
    pub fn time(&self) -> &[f64] {
        &self.time
    }

    /// The value column for a series, if it is in the active set
    pub fn column(&self, series: SeriesId) -> Option<&[Option<f64>]> {
        self.series
            .iter()
            .position(|s| *s == series)
            .map(|i| self.columns[i].as_slice())
    }

    /// Number of appended samples
    pub fn len(&self) -> usize {
        self.time.len()
    }

    /// Check whether the buffer holds no samples
    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// First and last time in seconds
    pub fn time_range(&self) -> Option<(f64, f64)> {
        match (self.time.first(), self.time.last()) {
            (Some(first), Some(last)) => Some((*first, *last)),
            _ => None,
        }
    }

    /// Replace all storage with fresh empty columns (same active set)
    pub fn clear(&mut self) {
        self.time = Vec::new();
        self.columns = vec![Vec::new(); self.series.len()];
    }
}

/// Session-lifetime running maximum for one series
#[derive(Debug, Clone, Copy)]
pub struct RunningMax {
    /// Largest value observed so far
    pub value: f64,
    /// Time (seconds) at which the maximum was observed
    pub at_secs: Option<f64>,
}

impl Default for RunningMax {
    fn default() -> Self {
        Self {
            value: f64::NEG_INFINITY,
            at_secs: None,
        }
    }
}

impl RunningMax {
    /// Record an observation; returns true if it set a new maximum.
    ///
    /// The stored maximum is replaced only on strict excess, so it is
    /// monotonic non-decreasing within a session.
    pub fn observe(&mut self, value: f64, t_secs: f64) -> bool {
        if value > self.value {
            self.value = value;
            self.at_secs = Some(t_secs);
            true
        } else {
            false
        }
    }

    /// Whether any observation has been recorded
    pub fn is_set(&self) -> bool {
        self.at_secs.is_some()
    }
}

/// Running maximum and current value per series, O(1) per sample.
///
/// No windowing: maxima are session-lifetime and reset only on explicit
/// restart.
#[derive(Debug, Clone, Default)]
pub struct StatsTracker {
    current: [Option<f64>; SeriesId::COUNT],
    max: [RunningMax; SeriesId::COUNT],
}

impl StatsTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one sample into the statistics. The current value updates for
    /// every present series regardless of whether it set a new maximum.
    pub fn observe(&mut self, sample: &Sample) {
        let t = sample.time_secs();
        for series in SeriesId::all() {
            if let Some(value) = sample.value(*series) {
                self.current[series.index()] = Some(value);
                self.max[series.index()].observe(value, t);
            }
        }
    }

    /// Latest observed value for a series
    pub fn current(&self, series: SeriesId) -> Option<f64> {
        self.current[series.index()]
    }

    /// Running maximum for a series
    pub fn max(&self, series: SeriesId) -> RunningMax {
        self.max[series.index()]
    }

    /// Reset all statistics (session restart)
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// USB identity of a serial device, used for silent auto-reconnect.
///
/// Persisted on successful connect and cleared on explicit user reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// USB vendor ID
    pub vendor_id: u16,
    /// USB product ID
    pub product_id: u16,
}

impl DeviceIdentity {
    /// Create an identity from a VID/PID pair
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }
}

impl std::fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

/// Connection lifecycle of the serial session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    /// No channel open
    #[default]
    Disconnected,
    /// Opening the channel
    Connecting,
    /// Channel open and streaming
    Connected,
    /// Orderly teardown in progress
    Disconnecting,
    /// Polling for the remembered device identity
    Reconnecting,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "Disconnected"),
            ConnectionStatus::Connecting => write!(f, "Connecting..."),
            ConnectionStatus::Connected => write!(f, "Connected"),
            ConnectionStatus::Disconnecting => write!(f, "Disconnecting..."),
            ConnectionStatus::Reconnecting => write!(f, "Reconnecting..."),
        }
    }
}

/// Counters describing the current ingest session
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    /// Samples decoded and logged
    pub samples_decoded: u64,
    /// Lines skipped by the decoder (echoes, malformed rows)
    pub lines_skipped: u64,
    /// Messages dropped due to channel backpressure
    pub dropped_messages: u64,
    /// Command transmissions (including retries)
    pub commands_sent: u64,
    /// Reconnect polls attempted since the last disconnect
    pub reconnect_attempts: u32,
}

//! Per-mode record decoding
//!
//! Each telemetry source speaks its own line grammar:
//!
//! - **Motor test**: records wrapped in a LoRa radio envelope
//!   (`+RCV=<id>,<len>,<payload...>,<rssi>,<snr>`); the payload is either an
//!   FSM state token or `timestamp,thrust,pressure`. Command echoes
//!   (`AT+SEND...`, `OK`) are suppressed.
//! - **Hydrostatic test / generic**: plain delimited rows mapped onto a
//!   user-selected column assignment, plus `STATE,<name>` and `PING` control
//!   framing.
//! - **Rocket flight**: delimited rows whose column groups (pressure,
//!   acceleration, gyroscope) follow the flight configuration.
//!
//! A value field that is empty or non-numeric decodes to `None` for that
//! series only; a timestamp that does not parse invalidates the whole line.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TelemvisError};
use crate::types::{Sample, SeriesId};

/// Finite vocabulary of flight-computer FSM states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FsmState {
    Safe,
    Armed,
    Launched,
    Boot,
    Failure,
}

impl FsmState {
    /// Wire token as transmitted by the flight computer
    pub fn token(&self) -> &'static str {
        match self {
            FsmState::Safe => "SAFE",
            FsmState::Armed => "ARMED",
            FsmState::Launched => "LAUNCHED",
            FsmState::Boot => "BOOT",
            FsmState::Failure => "FAILURE",
        }
    }

    /// Parse a wire token (exact, uppercase)
    pub fn from_token(token: &str) -> Option<FsmState> {
        match token {
            "SAFE" => Some(FsmState::Safe),
            "ARMED" => Some(FsmState::Armed),
            "LAUNCHED" => Some(FsmState::Launched),
            "BOOT" => Some(FsmState::Boot),
            "FAILURE" => Some(FsmState::Failure),
            _ => None,
        }
    }
}

impl std::fmt::Display for FsmState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.token())
    }
}

/// Result of decoding one record
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// A plottable telemetry sample
    Sample(Sample),
    /// A flight-computer state transition
    State(FsmState),
    /// A keep-alive probe expecting a `PONG` reply
    Ping,
}

/// Column-group selection for the rocket flight mode
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlightConfig {
    /// One pressure column after the timestamp
    pub pressure: bool,
    /// Three accelerometer columns (x, y, z)
    pub acceleration: bool,
    /// Three gyroscope columns (x, y, z)
    pub gyroscope: bool,
    /// Field delimiter
    pub delimiter: char,
}

impl Default for FlightConfig {
    fn default() -> Self {
        Self {
            pressure: false,
            acceleration: false,
            gyroscope: false,
            delimiter: ',',
        }
    }
}

impl FlightConfig {
    /// Whether at least one column group is enabled
    pub fn any_selected(&self) -> bool {
        self.pressure || self.acceleration || self.gyroscope
    }

    /// Columns a well-formed record carries, timestamp included
    pub fn expected_columns(&self) -> usize {
        1 + if self.pressure { 1 } else { 0 }
            + if self.acceleration { 3 } else { 0 }
            + if self.gyroscope { 3 } else { 0 }
    }

    /// The series this configuration produces, in record order
    pub fn active_series(&self) -> Vec<SeriesId> {
        let mut series = Vec::new();
        if self.pressure {
            series.push(SeriesId::Pressure);
        }
        if self.acceleration {
            series.extend([SeriesId::AccX, SeriesId::AccY, SeriesId::AccZ]);
        }
        if self.gyroscope {
            series.extend([SeriesId::GyroX, SeriesId::GyroY, SeriesId::GyroZ]);
        }
        series
    }
}

/// A telemetry source variant, carrying its own tokenization and framing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceMode {
    /// Motor test stand over the LoRa radio envelope
    MotorTest,
    /// Hydrostatic pressure test with user-selected column mapping
    HydrostaticTest { columns: Vec<SeriesId> },
    /// In-flight telemetry with configurable column groups
    RocketFlight(FlightConfig),
    /// Any delimited stream with a user-selected column mapping
    Generic { delimiter: char, columns: Vec<SeriesId> },
}

impl SourceMode {
    /// Build a hydrostatic-test mode, rejecting duplicate column assignments
    pub fn hydrostatic_test(columns: Vec<SeriesId>) -> Result<SourceMode> {
        validate_columns(&columns)?;
        Ok(SourceMode::HydrostaticTest { columns })
    }

    /// Build a generic delimited mode, rejecting duplicate column assignments
    pub fn generic(delimiter: char, columns: Vec<SeriesId>) -> Result<SourceMode> {
        validate_columns(&columns)?;
        Ok(SourceMode::Generic { delimiter, columns })
    }

    /// Short identifier used in export filenames and log lines
    pub fn label(&self) -> &'static str {
        match self {
            SourceMode::MotorTest => "motor_test",
            SourceMode::HydrostaticTest { .. } => "hydrostatic_test",
            SourceMode::RocketFlight(_) => "rocket_flight",
            SourceMode::Generic { .. } => "generic",
        }
    }

    /// The active series set for this mode, in display order
    pub fn active_series(&self) -> Vec<SeriesId> {
        match self {
            SourceMode::MotorTest => vec![SeriesId::Thrust, SeriesId::Pressure],
            SourceMode::HydrostaticTest { columns } => columns.clone(),
            SourceMode::RocketFlight(config) => config.active_series(),
            SourceMode::Generic { columns, .. } => columns.clone(),
        }
    }

    /// Whether this mode expects the stream-start handshake on connect
    pub fn needs_stream_start(&self) -> bool {
        matches!(
            self,
            SourceMode::HydrostaticTest { .. } | SourceMode::Generic { .. }
        )
    }

    /// Decode one reassembled line.
    ///
    /// Returns `None` for command echoes, handshake noise, and rows the mode
    /// grammar cannot make sense of.
    pub fn decode(&self, raw: &str) -> Option<Decoded> {
        // Radio links pass through stray control bytes; keep printable ASCII only.
        let line: String = raw.chars().filter(|c| (' '..='~').contains(c)).collect();
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        match self {
            SourceMode::MotorTest => decode_motor_test(line),
            SourceMode::HydrostaticTest { columns } => decode_delimited(line, ',', columns),
            SourceMode::Generic { delimiter, columns } => {
                decode_delimited(line, *delimiter, columns)
            }
            SourceMode::RocketFlight(config) => decode_flight(line, config),
        }
    }
}

fn validate_columns(columns: &[SeriesId]) -> Result<()> {
    for (i, series) in columns.iter().enumerate() {
        if columns[..i].contains(series) {
            return Err(TelemvisError::Config(format!(
                "series '{}' is mapped to more than one column",
                series
            )));
        }
    }
    Ok(())
}

/// Parse a value field: empty or non-numeric yields `None`, not a row failure
fn parse_field(field: &str) -> Option<f64> {
    let field = field.trim();
    if field.is_empty() {
        return None;
    }
    field.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn decode_motor_test(line: &str) -> Option<Decoded> {
    // Our own transmissions are echoed back by the radio module.
    if line.starts_with("AT+SEND") || line == "OK" {
        return None;
    }

    if !line.starts_with("+RCV=") {
        tracing::trace!("motor test: unrecognized line: {line}");
        return None;
    }

    let parts: Vec<&str> = line.split(',').collect();
    // +RCV=<id>,<len>,<payload...>,<rssi>,<snr>
    if parts.len() < 5 {
        tracing::warn!("ignoring short +RCV message: {line}");
        return None;
    }
    let payload = parts[2..parts.len() - 2].join(",");
    let payload = payload.trim();

    if let Some(state) = FsmState::from_token(payload) {
        return Some(Decoded::State(state));
    }

    let fields: Vec<&str> = payload.split(',').collect();
    if fields.len() != 3 {
        tracing::warn!("unexpected motor test payload shape: {payload}");
        return None;
    }
    let Some(timestamp_ms) = parse_field(fields[0]) else {
        tracing::warn!("motor test payload with bad timestamp: {payload}");
        return None;
    };
    let mut sample = Sample::new(timestamp_ms);
    sample.set(SeriesId::Thrust, parse_field(fields[1]));
    sample.set(SeriesId::Pressure, parse_field(fields[2]));
    Some(Decoded::Sample(sample))
}

fn decode_delimited(line: &str, delimiter: char, columns: &[SeriesId]) -> Option<Decoded> {
    if let Some(name) = line.strip_prefix("STATE,") {
        match FsmState::from_token(name.trim()) {
            Some(state) => return Some(Decoded::State(state)),
            None => {
                tracing::warn!("unknown state token: {name}");
                return None;
            }
        }
    }
    if line == "PING" {
        return Some(Decoded::Ping);
    }

    let cols: Vec<&str> = line.split(delimiter).collect();
    let Some(timestamp_ms) = parse_field(cols[0]) else {
        tracing::warn!("row with bad timestamp '{}': {line}", cols[0]);
        return None;
    };
    let mut sample = Sample::new(timestamp_ms);
    for (i, series) in columns.iter().enumerate() {
        sample.set(*series, cols.get(i + 1).copied().and_then(parse_field));
    }
    Some(Decoded::Sample(sample))
}

fn decode_flight(line: &str, config: &FlightConfig) -> Option<Decoded> {
    let cols: Vec<&str> = line.split(config.delimiter).collect();
    let Some(timestamp_ms) = parse_field(cols[0]) else {
        tracing::warn!("flight row with bad timestamp '{}': {line}", cols[0]);
        return None;
    };
    if cols.len() < config.expected_columns() {
        // Parse as far as the row goes; trailing fields stay None.
        tracing::warn!(
            "flight row has {} columns, expected {}: {line}",
            cols.len(),
            config.expected_columns()
        );
    }

    let mut sample = Sample::new(timestamp_ms);
    let mut next = 1usize;

    if config.pressure {
        sample.set(SeriesId::Pressure, cols.get(next).copied().and_then(parse_field));
        next += 1;
    }
    if config.acceleration {
        for series in [SeriesId::AccX, SeriesId::AccY, SeriesId::AccZ] {
            sample.set(series, cols.get(next).copied().and_then(parse_field));
            next += 1;
        }
    }
    if config.gyroscope {
        for series in [SeriesId::GyroX, SeriesId::GyroY, SeriesId::GyroZ] {
            sample.set(series, cols.get(next).copied().and_then(parse_field));
            next += 1;
        }
    }
    Some(Decoded::Sample(sample))
}

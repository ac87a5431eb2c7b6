//! Configuration for telemvis
//!
//! Two layers of persisted state, both under the platform data directory:
//!
//! - `config.toml` — [`AppConfig`], the tunable per-mode settings (baud
//!   rates, window widths, retry tuning, tick intervals). Observed device
//!   variants disagree on several of these (5 s vs. 20 s sliding windows,
//!   which FSM states restart the plot), so they are named configuration
//!   rather than constants.
//! - `state.json` — [`AppState`], the remembered serial device identity
//!   driving silent auto-reconnect. Written on successful connect, cleared
//!   on explicit user reset.
//!
//! # App Data Location
//!
//! - **Linux**: `~/.local/share/telemvis/`
//! - **macOS**: `~/Library/Application Support/telemvis/`
//! - **Windows**: `%APPDATA%\telemvis\`

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::csv::TimestampUnit;
use crate::error::{Result, TelemvisError};
use crate::protocol::{FsmState, SourceMode};
use crate::types::DeviceIdentity;

/// Application identifier for data directories
pub const APP_ID: &str = "telemvis";

/// App state filename
pub const APP_STATE_FILE: &str = "state.json";

/// Config filename
pub const CONFIG_FILE: &str = "config.toml";

/// Default flush tick interval: how often buffered lines are decoded and
/// batched into one plot update
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 50;

/// Default reconnect poll interval
pub const DEFAULT_RECONNECT_POLL_MS: u64 = 2000;

/// Default synthetic source cadence
pub const DEFAULT_SYNTHETIC_INTERVAL_MS: u64 = 100;

/// How long a command-timeout status stays visible before auto-clearing
pub const DEFAULT_STATUS_EXPIRY_MS: u64 = 4000;

/// Get the application data directory path
pub fn app_data_dir() -> Option<PathBuf> {
    dirs_next::data_dir().map(|p| p.join(APP_ID))
}

/// Ensure the app data directory exists
pub fn ensure_app_data_dir() -> Result<PathBuf> {
    let dir = app_data_dir().ok_or_else(|| {
        TelemvisError::Config("Could not determine app data directory".to_string())
    })?;
    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| {
            TelemvisError::Config(format!("Failed to create app data directory: {}", e))
        })?;
    }
    Ok(dir)
}

/// Line terminator appended to outgoing commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineEnding {
    /// `\r\n` — expected by the LoRa radio firmware
    CrLf,
    /// `\n`
    Lf,
}

impl LineEnding {
    /// The terminator bytes
    pub fn as_str(&self) -> &'static str {
        match self {
            LineEnding::CrLf => "\r\n",
            LineEnding::Lf => "\n",
        }
    }
}

/// Tuning for the guaranteed-command retry loop
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Base delay before the first retry
    pub base_delay_ms: u64,
    /// Total transmissions before the command is abandoned
    pub max_attempts: u32,
    /// Jitter fraction added on top of each backoff delay (0.2 = up to 20%)
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            max_attempts: 5,
            jitter: 0.2,
        }
    }
}

impl RetryConfig {
    /// Base delay as a [`Duration`]
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

/// Per-mode serial channel settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialModeConfig {
    /// Fixed baud rate for this mode's device
    pub baud_rate: u32,
    /// Sliding window width in seconds while the session is live
    pub window_secs: f64,
    /// Command line terminator expected by the firmware
    pub line_ending: LineEnding,
    /// FSM states whose arrival restarts the plot (fresh window at the
    /// physical state transition)
    pub restart_states: Vec<FsmState>,
    /// Destination address used in the radio send envelope
    pub radio_dest_id: u32,
}

impl Default for SerialModeConfig {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            window_secs: 20.0,
            line_ending: LineEnding::Lf,
            restart_states: Vec::new(),
            radio_dest_id: 42,
        }
    }
}

impl SerialModeConfig {
    fn motor_test() -> Self {
        Self {
            baud_rate: 115_200,
            line_ending: LineEnding::CrLf,
            restart_states: vec![FsmState::Armed, FsmState::Launched],
            ..Default::default()
        }
    }

    fn hydrostatic_test() -> Self {
        Self::default()
    }

    fn rocket_flight() -> Self {
        Self {
            baud_rate: 115_200,
            ..Default::default()
        }
    }
}

/// Synthetic source settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    /// Sample generation cadence
    pub interval_ms: u64,
    /// Sliding window width in seconds
    pub window_secs: f64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_SYNTHETIC_INTERVAL_MS,
            window_secs: 5.0,
        }
    }
}

/// Application configuration, persisted as TOML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Flush tick interval in milliseconds
    pub flush_interval_ms: u64,
    /// Reconnect poll interval in milliseconds
    pub reconnect_poll_ms: u64,
    /// Error-status auto-expiry in milliseconds
    pub status_expiry_ms: u64,
    /// Directory for exported CSV files (export is skipped when unset and
    /// no data directory can be determined)
    pub export_dir: Option<PathBuf>,
    /// Unit of the timestamp column when importing CSV
    pub timestamp_unit: TimestampUnit,
    /// Guaranteed-command retry tuning
    pub retry: RetryConfig,
    /// Motor test stand settings
    pub motor_test: SerialModeConfig,
    /// Hydrostatic test settings
    pub hydrostatic_test: SerialModeConfig,
    /// Rocket flight settings
    pub rocket_flight: SerialModeConfig,
    /// Generic delimited-stream settings
    pub generic: SerialModeConfig,
    /// Synthetic source settings
    pub synthetic: SyntheticConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            reconnect_poll_ms: DEFAULT_RECONNECT_POLL_MS,
            status_expiry_ms: DEFAULT_STATUS_EXPIRY_MS,
            export_dir: None,
            timestamp_unit: TimestampUnit::Milliseconds,
            retry: RetryConfig::default(),
            motor_test: SerialModeConfig::motor_test(),
            hydrostatic_test: SerialModeConfig::hydrostatic_test(),
            rocket_flight: SerialModeConfig::rocket_flight(),
            generic: SerialModeConfig::default(),
            synthetic: SyntheticConfig::default(),
        }
    }
}

impl AppConfig {
    /// The serial settings section for a source mode
    pub fn serial_config(&self, mode: &SourceMode) -> &SerialModeConfig {
        match mode {
            SourceMode::MotorTest => &self.motor_test,
            SourceMode::HydrostaticTest { .. } => &self.hydrostatic_test,
            SourceMode::RocketFlight(_) => &self.rocket_flight,
            SourceMode::Generic { .. } => &self.generic,
        }
    }

    /// Flush tick interval as a [`Duration`]
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// Reconnect poll interval as a [`Duration`]
    pub fn reconnect_poll(&self) -> Duration {
        Duration::from_millis(self.reconnect_poll_ms)
    }

    /// Error-status expiry as a [`Duration`]
    pub fn status_expiry(&self) -> Duration {
        Duration::from_millis(self.status_expiry_ms)
    }

    /// Directory exports land in: the configured one, else the data directory
    pub fn resolved_export_dir(&self) -> Option<PathBuf> {
        self.export_dir.clone().or_else(app_data_dir)
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TelemvisError::Config(format!("Failed to read config: {}", e)))?;
        toml::from_str(&content)
            .map_err(|e| TelemvisError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Save configuration as TOML
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| TelemvisError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)
            .map_err(|e| TelemvisError::Config(format!("Failed to write config: {}", e)))
    }

    /// Load from the default location, falling back to defaults on any error
    pub fn load_or_default() -> Self {
        let Some(path) = app_data_dir().map(|p| p.join(CONFIG_FILE)) else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        Self::load(&path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }
}

/// Persistent application state (the remembered device identity)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppState {
    /// Version for future migration support
    #[serde(default = "default_app_state_version")]
    pub version: u32,

    /// Identity of the last successfully opened serial device
    #[serde(default)]
    pub last_device: Option<DeviceIdentity>,

    /// Mode of the last serial session, so auto-reconnect restores the
    /// right decoder
    #[serde(default)]
    pub last_mode: Option<SourceMode>,
}

fn default_app_state_version() -> u32 {
    1
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            version: 1,
            last_device: None,
            last_mode: None,
        }
    }
}

impl AppState {
    /// Path of the state file in the app data directory
    pub fn default_path() -> Option<PathBuf> {
        app_data_dir().map(|p| p.join(APP_STATE_FILE))
    }

    /// Load state from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| TelemvisError::Config(format!("Failed to read app state: {}", e)))?;
        serde_json::from_str(&content)
            .map_err(|e| TelemvisError::Config(format!("Failed to parse app state: {}", e)))
    }

    /// Load from the default location, returning defaults on any error
    pub fn load_or_default() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };
        Self::load(&path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load app state, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save state to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    TelemvisError::Config(format!("Failed to create state directory: {}", e))
                })?;
            }
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| TelemvisError::Config(format!("Failed to serialize app state: {}", e)))?;
        std::fs::write(path, content)
            .map_err(|e| TelemvisError::Config(format!("Failed to write app state: {}", e)))
    }

    /// Save to the default location, logging rather than failing
    pub fn save_or_log(&self) {
        let Some(path) = Self::default_path() else {
            return;
        };
        if let Err(e) = self.save(&path) {
            tracing::warn!("Failed to persist app state: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_round_trips_through_toml() {
        let config = AppConfig::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let parsed: AppConfig = toml::from_str("flush_interval_ms = 25\n").unwrap();
        assert_eq!(parsed.flush_interval_ms, 25);
        assert_eq!(parsed.reconnect_poll_ms, DEFAULT_RECONNECT_POLL_MS);
        assert_eq!(parsed.motor_test.baud_rate, 115_200);
    }

    #[test]
    fn test_mode_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.motor_test.line_ending, LineEnding::CrLf);
        assert_eq!(
            config.motor_test.restart_states,
            vec![FsmState::Armed, FsmState::Launched]
        );
        assert_eq!(config.hydrostatic_test.baud_rate, 9600);
        assert_eq!(config.synthetic.window_secs, 5.0);
        assert_eq!(config.motor_test.window_secs, 20.0);
    }

    #[test]
    fn test_serial_config_selection() {
        let config = AppConfig::default();
        let mode = SourceMode::RocketFlight(crate::protocol::FlightConfig::default());
        assert_eq!(config.serial_config(&mode).baud_rate, 115_200);
        assert_eq!(
            config.serial_config(&SourceMode::MotorTest).line_ending,
            LineEnding::CrLf
        );
    }

    #[test]
    fn test_app_state_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut state = AppState::default();
        state.last_device = Some(DeviceIdentity::new(0x1a86, 0x7523));
        state.last_mode = Some(SourceMode::MotorTest);
        state.save(&path).unwrap();

        let loaded = AppState::load(&path).unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn test_app_state_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(state, AppState::default());
    }
}

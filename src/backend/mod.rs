//! Ingest backend
//!
//! All telemetry ingestion runs in a dedicated worker thread so chart
//! rendering never blocks on serial I/O. The worker communicates with the
//! owning thread over crossbeam channels:
//!
//! - [`BackendCommand`] - requests sent to the worker (connect, replay,
//!   arm/disarm/launch, export, ...)
//! - [`BackendMessage`] - everything the worker publishes (sample batches,
//!   connection status, FSM transitions, command outcomes)
//! - [`FrontendHandle`] - the owning thread's end of both channels
//! - [`TelemetryBackend`] - entry point that builds the channel pair and
//!   runs the worker
//!
//! # Example
//!
//! ```ignore
//! use telemvis::backend::{BackendCommand, TelemetryBackend};
//! use telemvis::config::{AppConfig, AppState};
//! use telemvis::protocol::SourceMode;
//!
//! let (backend, frontend) = TelemetryBackend::new(AppConfig::default(), AppState::default());
//! std::thread::spawn(move || backend.run());
//!
//! frontend.connect(SourceMode::MotorTest, Some("/dev/ttyUSB0".into()));
//! for msg in frontend.drain() {
//!     // feed into a SessionContext
//! }
//! ```

#[cfg(any(test, feature = "mock-link"))]
pub mod mock_link;
pub mod transport;
pub mod worker;

#[cfg(any(test, feature = "mock-link"))]
pub use mock_link::{MockLink, MockLinkHandle};
pub use transport::{find_matching, list_ports, match_identity, PortEntry, SerialLink, SerialPortLink};
pub use worker::SessionWorker;

use crossbeam_channel::{bounded, Receiver, Sender};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::config::{AppConfig, AppState};
use crate::csv::CsvTable;
use crate::protocol::{FsmState, SourceMode};
use crate::render::WindowPolicy;
use crate::types::{ConnectionStatus, Sample, SeriesId, SessionStats, StatsTracker};

/// Message sent from the owning thread to the worker
#[derive(Debug, Clone)]
pub enum BackendCommand {
    /// Open a serial session in the given mode. With no port name, the
    /// remembered device identity is matched against the visible ports.
    Connect {
        mode: SourceMode,
        port: Option<String>,
    },
    /// Start the synthetic random source
    StartSynthetic,
    /// Start replaying a loaded CSV table
    StartReplay(CsvTable),
    /// Pause CSV replay
    PauseReplay,
    /// Resume CSV replay from where it paused
    ResumeReplay,
    /// Clear session data and start the current source's plot over
    Restart,
    /// Full teardown: auto-export, close the channel, forget the remembered
    /// device, settle disconnected
    Reset,
    /// Send the guaranteed ARM command (motor test)
    Arm,
    /// Send the guaranteed DISARM command (motor test)
    Disarm,
    /// Send the guaranteed LAUNCH command (motor test)
    Launch,
    /// Send an arbitrary guaranteed command
    SendGuaranteed {
        command: String,
        expected: FsmState,
    },
    /// Export the session log now
    ExportNow,
    /// Stop the worker
    Shutdown,
}

/// Message published by the worker
#[derive(Debug, Clone)]
pub enum BackendMessage {
    /// Connection lifecycle changed
    ConnectionStatus(ConnectionStatus),
    /// Opening or reading the channel failed
    ConnectionError(String),
    /// A new plotting session began; carries what the frontend needs to
    /// build its session context
    SessionStarted {
        label: String,
        series: Vec<SeriesId>,
        window: WindowPolicy,
    },
    /// One flush worth of decoded samples, in arrival order
    DataBatch(Vec<Sample>),
    /// The plot buffer was restarted (manual restart or restart-on-arm)
    BufferCleared,
    /// Statistics after a flush
    Stats(StatsTracker),
    /// Ingest counters
    Counters(SessionStats),
    /// The flight computer reported a state
    FsmStateChanged(FsmState),
    /// A guaranteed command was acknowledged
    CommandAcked { command: String, state: FsmState },
    /// A guaranteed command exhausted its attempts. The error status
    /// auto-expires: a later [`BackendMessage::ConnectionStatus`] restores
    /// the plain connected display.
    CommandTimedOut {
        command: String,
        expected: FsmState,
    },
    /// A command could not be dispatched (conflict, not connected)
    CommandRejected(String),
    /// CSV replay drained its last record
    ReplayFinished,
    /// The session log was exported
    Exported(PathBuf),
    /// Export was attempted and failed
    ExportFailed(String),
    /// The session ended; the frontend should apply the full-range window.
    /// `reconnecting` says whether identity polling is now running.
    SessionEnded { reconnecting: bool },
    /// The worker is shutting down
    Shutdown,
}

/// The owning thread's handle to the worker
pub struct FrontendHandle {
    /// Receiver for worker messages
    pub receiver: Receiver<BackendMessage>,
    /// Sender for commands to the worker
    pub command_sender: Sender<BackendCommand>,
}

impl FrontendHandle {
    /// Try to receive a message without blocking
    pub fn try_recv(&self) -> Option<BackendMessage> {
        self.receiver.try_recv().ok()
    }

    /// Receive all pending messages
    pub fn drain(&self) -> Vec<BackendMessage> {
        let mut messages = Vec::new();
        while let Ok(msg) = self.receiver.try_recv() {
            messages.push(msg);
        }
        messages
    }

    /// Send a command to the worker
    pub fn send_command(&self, cmd: BackendCommand) -> bool {
        self.command_sender.send(cmd).is_ok()
    }

    /// Request a serial session
    pub fn connect(&self, mode: SourceMode, port: Option<String>) {
        let _ = self
            .command_sender
            .send(BackendCommand::Connect { mode, port });
    }

    /// Start the synthetic source
    pub fn start_synthetic(&self) {
        let _ = self.command_sender.send(BackendCommand::StartSynthetic);
    }

    /// Start CSV replay
    pub fn start_replay(&self, table: CsvTable) {
        let _ = self.command_sender.send(BackendCommand::StartReplay(table));
    }

    /// Pause CSV replay
    pub fn pause_replay(&self) {
        let _ = self.command_sender.send(BackendCommand::PauseReplay);
    }

    /// Resume CSV replay
    pub fn resume_replay(&self) {
        let _ = self.command_sender.send(BackendCommand::ResumeReplay);
    }

    /// Restart the current plot
    pub fn restart(&self) {
        let _ = self.command_sender.send(BackendCommand::Restart);
    }

    /// Full reset
    pub fn reset(&self) {
        let _ = self.command_sender.send(BackendCommand::Reset);
    }

    /// Arm the flight computer
    pub fn arm(&self) {
        let _ = self.command_sender.send(BackendCommand::Arm);
    }

    /// Disarm the flight computer
    pub fn disarm(&self) {
        let _ = self.command_sender.send(BackendCommand::Disarm);
    }

    /// Start the launch sequence
    pub fn launch(&self) {
        let _ = self.command_sender.send(BackendCommand::Launch);
    }

    /// Export the session log now
    pub fn export_now(&self) {
        let _ = self.command_sender.send(BackendCommand::ExportNow);
    }

    /// Request shutdown
    pub fn shutdown(&self) {
        let _ = self.command_sender.send(BackendCommand::Shutdown);
    }
}

/// The ingest backend that runs in a separate thread
pub struct TelemetryBackend {
    config: AppConfig,
    app_state: AppState,
    command_receiver: Receiver<BackendCommand>,
    message_sender: Sender<BackendMessage>,
    running: Arc<AtomicBool>,
}

impl TelemetryBackend {
    /// Create a backend with its communication channels
    pub fn new(config: AppConfig, app_state: AppState) -> (Self, FrontendHandle) {
        let (cmd_tx, cmd_rx) = bounded(256);
        // Bounded for backpressure: if the owning thread stalls, data
        // batches are dropped and counted rather than piling up.
        let (msg_tx, msg_rx) = bounded(10_000);

        let backend = Self {
            config,
            app_state,
            command_receiver: cmd_rx,
            message_sender: msg_tx,
            running: Arc::new(AtomicBool::new(true)),
        };
        let frontend = FrontendHandle {
            receiver: msg_rx,
            command_sender: cmd_tx,
        };
        (backend, frontend)
    }

    /// Run the worker loop until shutdown
    pub fn run(self) {
        let mut worker = SessionWorker::new(
            self.config,
            self.app_state,
            self.command_receiver,
            self.message_sender,
            self.running,
        );
        worker.run();
    }

    /// Get a handle to stop the backend
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn test_backend_creation() {
        let (backend, frontend) = TelemetryBackend::new(AppConfig::default(), AppState::default());
        assert!(backend.running.load(Ordering::SeqCst));
        assert!(frontend.send_command(BackendCommand::Shutdown));
    }

    #[test]
    fn test_handle_commands_enqueue() {
        let (_backend, frontend) = TelemetryBackend::new(AppConfig::default(), AppState::default());
        frontend.start_synthetic();
        frontend.restart();
        frontend.arm();
        frontend.reset();
        frontend.shutdown();
        // Nothing consumed them yet; the queue holds all five
        let mut count = 0;
        while _backend.command_receiver.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, 5);
    }
}

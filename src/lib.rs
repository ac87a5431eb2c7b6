//! # telemvis: rocket test telemetry visualizer
//!
//! A real-time telemetry pipeline for rocket motor and flight test data. It
//! normalizes three source families — live serial streaming, CSV replay, and
//! a synthetic generator — into one time-indexed multi-series buffer, drives
//! chart surfaces with a windowing policy, and layers a guaranteed-command
//! retry machine (arm/disarm/launch) over the half-duplex radio link.
//!
//! ## Architecture
//!
//! - **Backend**: one worker thread owns the serial link, line reassembly,
//!   decoding, the session log, statistics, command retries, and reconnect
//!   polling
//! - **Frontend side**: a [`session::SessionContext`] per plotting session
//!   holds the plot buffer and the render scheduler, fed by draining worker
//!   messages
//! - **Charts**: external; anything implementing [`render::ChartSurface`]
//!   can be attached
//! - **Communication**: crossbeam channels for thread-safe transfer
//!
//! ## Example
//!
//! ```ignore
//! use telemvis::backend::TelemetryBackend;
//! use telemvis::config::{AppConfig, AppState};
//! use telemvis::protocol::SourceMode;
//! use telemvis::session::SessionContext;
//!
//! let (backend, frontend) = TelemetryBackend::new(AppConfig::default(), AppState::default());
//! std::thread::spawn(move || backend.run());
//!
//! frontend.connect(SourceMode::MotorTest, Some("/dev/ttyUSB0".into()));
//!
//! let mut session: Option<SessionContext> = None;
//! loop {
//!     for msg in frontend.drain() {
//!         if let Some(ctx) = SessionContext::for_message(&msg) {
//!             session = Some(ctx);
//!         }
//!         if let Some(ctx) = session.as_mut() {
//!             ctx.apply(&msg);
//!         }
//!     }
//!     if let Some(ctx) = session.as_mut() {
//!         ctx.render();
//!     }
//!     // ... frame pacing
//! }
//! ```

pub mod backend;
pub mod command;
pub mod config;
pub mod csv;
pub mod error;
pub mod protocol;
pub mod render;
pub mod session;
pub mod types;

// Re-export commonly used types
pub use backend::{BackendCommand, BackendMessage, FrontendHandle, TelemetryBackend};
pub use config::{AppConfig, AppState};
pub use error::{Result, TelemvisError};
pub use protocol::{Decoded, FsmState, SourceMode};
pub use session::SessionContext;
pub use types::{Sample, SeriesId, TelemetryBuffer};

//! Serial protocol handling
//!
//! This module turns the raw serial byte stream into typed telemetry:
//!
//! - [`LineAssembler`] - reassembles newline-terminated records across
//!   arbitrary chunk boundaries
//! - [`SourceMode`] - the tagged source variant, each carrying its own
//!   tokenization and framing
//! - [`Decoded`] - the decoder output: a plottable [`crate::types::Sample`],
//!   a flight-computer state transition, or a handshake probe
//!
//! Parsing-level problems never propagate as errors: a malformed record is
//! skipped with a diagnostic and ingestion continues.

pub mod decoder;
pub mod line;

pub use decoder::{Decoded, FlightConfig, FsmState, SourceMode};
pub use line::LineAssembler;

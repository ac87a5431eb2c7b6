//! Session-side components
//!
//! - [`PlaybackClock`] - paces CSV replay against recorded timestamps
//! - [`SyntheticSource`] - the random waveform generator
//! - [`SessionContext`] - the frontend-side state for one plotting session
//!   (buffer, statistics snapshot, render scheduler), created on mode entry
//!   and torn down on mode exit

pub mod context;
pub mod player;
pub mod synthetic;

pub use context::SessionContext;
pub use player::{PlaybackClock, PlaybackState};
pub use synthetic::SyntheticSource;

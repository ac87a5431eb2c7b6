//! Synthetic telemetry source
//!
//! Generates plausible bench-test waveforms (slow sine/cosine drifts with a
//! little noise) on the legacy pressure/thrust/temperature trio. Timestamps
//! are elapsed milliseconds since the source started, which keeps exported
//! logs consistent with the serial modes.

use rand::Rng;
use std::time::Instant;

use crate::types::{Sample, SeriesId};

/// Random waveform generator for the demo/random mode
#[derive(Debug)]
pub struct SyntheticSource {
    started_at: Instant,
}

impl SyntheticSource {
    /// Start generating from `now`
    pub fn new(now: Instant) -> Self {
        Self { started_at: now }
    }

    /// The series this source produces
    pub fn active_series() -> &'static [SeriesId] {
        SeriesId::legacy()
    }

    /// Re-base elapsed time to zero (plot restart)
    pub fn restart(&mut self, now: Instant) {
        self.started_at = now;
    }

    /// Produce the sample for the given instant
    pub fn sample_at(&self, now: Instant) -> Sample {
        let mut rng = rand::thread_rng();
        let t = now.saturating_duration_since(self.started_at).as_secs_f64();

        let pressure = 1013.0 + (t).sin() * 10.0 + (rng.gen::<f64>() - 0.5) * 5.0;
        let thrust = 25.0 + (t * 0.5).cos() * 20.0 + (rng.gen::<f64>() - 0.5) * 5.0;
        let temperature = 40.0 + (t * 0.2).sin() * 15.0 + (rng.gen::<f64>() - 0.5) * 3.0;

        Sample::new(t * 1000.0)
            .with_value(SeriesId::Pressure, pressure)
            .with_value(SeriesId::Thrust, thrust)
            .with_value(SeriesId::Temperature, temperature)
    }
}

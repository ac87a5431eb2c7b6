//! Chart driving and window policy
//!
//! The chart widget itself is an external collaborator: anything that can
//! accept `(time[], values[]...)` column slices and an x-axis window
//! implements [`ChartSurface`]. This module owns what gets pushed where and
//! how the visible window moves:
//!
//! - **Sliding** — live sources scroll a fixed-width window anchored to the
//!   latest sample.
//! - **Replay** — CSV playback grows the window from the first sample, with
//!   10% padding past the last.
//! - **Full range** — once a session ends, the whole collected buffer is
//!   shown once more with padding, overriding the in-session policy, so a
//!   completed test run is reviewable in full rather than left scrolled to
//!   its last few seconds.
//!
//! Layout follows the active series set: one main chart for a single series,
//! two side-by-side for two or more, with further series relegated to
//! thumbnails. Clicking a thumbnail swaps its series into the first main
//! slot.

use crate::types::{SeriesId, TelemetryBuffer};

/// An x-axis window applied to chart surfaces
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleWindow {
    pub min: f64,
    pub max: f64,
}

/// Windowing policy for the active source
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WindowPolicy {
    /// Fixed-width window anchored to the latest sample (live serial,
    /// synthetic). The width is per-mode configuration.
    Sliding { width_secs: f64 },
    /// Growing window from the first sample, padded past the last (replay)
    Replay,
    /// The entire buffer with padding (post-session review)
    FullRange,
}

/// Compute the window a policy yields for a time column, if any.
///
/// Sliding needs two points to be meaningful; replay needs one.
pub fn compute_window(policy: WindowPolicy, time: &[f64]) -> Option<ScaleWindow> {
    match policy {
        WindowPolicy::Sliding { width_secs } => {
            if time.len() < 2 {
                return None;
            }
            let last = *time.last().unwrap();
            Some(ScaleWindow {
                min: (last - width_secs).max(0.0),
                max: last,
            })
        }
        WindowPolicy::Replay => {
            let (first, last) = (*time.first()?, *time.last()?);
            Some(ScaleWindow {
                min: first,
                max: last + padding(last - first),
            })
        }
        WindowPolicy::FullRange => {
            if time.is_empty() {
                return None;
            }
            // Live buffers tolerate clock glitches, so scan for the true extent.
            let min = time.iter().copied().fold(f64::INFINITY, f64::min);
            let max = time.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            Some(ScaleWindow {
                min,
                max: max + padding(max - min),
            })
        }
    }
}

fn padding(duration: f64) -> f64 {
    if duration > 0.0 {
        duration * 0.1
    } else {
        1.0
    }
}

/// The opaque chart renderer
pub trait ChartSurface {
    /// Replace the surface's data with the given time column and one value
    /// column per plotted series
    fn set_data(&mut self, time: &[f64], columns: &[(SeriesId, &[Option<f64>])]);

    /// Apply an x-axis window
    fn set_scale(&mut self, window: ScaleWindow);
}

/// How many main charts the active series set calls for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartLayout {
    /// Exactly one active series: one full-width chart
    Single,
    /// Two or more: two charts side by side, the rest thumbnail-only
    SideBySide,
}

impl ChartLayout {
    /// Pick the layout for an active series count
    pub fn for_series_count(count: usize) -> ChartLayout {
        if count <= 1 {
            ChartLayout::Single
        } else {
            ChartLayout::SideBySide
        }
    }

    /// The series groups assigned to main slots, in order
    pub fn main_slots(active: &[SeriesId]) -> Vec<Vec<SeriesId>> {
        match active {
            [] => Vec::new(),
            [only] => vec![vec![*only]],
            [first, second, ..] => vec![vec![*first], vec![*second]],
        }
    }
}

struct MainChart {
    series: Vec<SeriesId>,
    surface: Box<dyn ChartSurface>,
}

struct Thumbnail {
    series: SeriesId,
    surface: Box<dyn ChartSurface>,
}

/// Pushes buffer snapshots into the attached chart surfaces and keeps their
/// x-axis windows in line with the active policy.
pub struct RenderScheduler {
    policy: WindowPolicy,
    main: Vec<MainChart>,
    thumbnails: Vec<Thumbnail>,
    finalized: bool,
}

impl RenderScheduler {
    /// Create a scheduler with no attached surfaces
    pub fn new(policy: WindowPolicy) -> Self {
        Self {
            policy,
            main: Vec::new(),
            thumbnails: Vec::new(),
            finalized: false,
        }
    }

    /// Attach a main chart slot plotting the given series group
    pub fn attach_main(&mut self, series: Vec<SeriesId>, surface: Box<dyn ChartSurface>) {
        self.main.push(MainChart { series, surface });
    }

    /// Attach a thumbnail slot for a single series
    pub fn attach_thumbnail(&mut self, series: SeriesId, surface: Box<dyn ChartSurface>) {
        self.thumbnails.push(Thumbnail { series, surface });
    }

    /// The series shown in the main slots (for thumbnail highlighting)
    pub fn main_series(&self) -> Vec<SeriesId> {
        self.main.iter().flat_map(|m| m.series.clone()).collect()
    }

    /// Swap a series into the first main slot (tabbed single-chart
    /// presentation). No-op if it is already shown there.
    pub fn swap_main(&mut self, series: SeriesId) {
        let Some(first) = self.main.first_mut() else {
            return;
        };
        if first.series == [series] {
            return;
        }
        first.series = vec![series];
    }

    /// Push the current buffer into every surface and re-window.
    ///
    /// `running` reflects whether the session is still live; after the
    /// session has been finalized, or while it is not running, the window is
    /// left untouched.
    pub fn tick(&mut self, buffer: &TelemetryBuffer, running: bool) {
        let time = buffer.time();
        for slot in &mut self.main {
            push_columns(slot.surface.as_mut(), &slot.series, buffer);
        }
        for thumb in &mut self.thumbnails {
            push_columns(thumb.surface.as_mut(), &[thumb.series], buffer);
        }

        if !running || self.finalized {
            return;
        }
        if let Some(window) = compute_window(self.policy, time) {
            self.apply_scale(window);
        }
    }

    /// Recompute the window once over the whole buffer after the session
    /// ends, overriding the in-session policy.
    pub fn finalize(&mut self, buffer: &TelemetryBuffer) {
        if let Some(window) = compute_window(WindowPolicy::FullRange, buffer.time()) {
            self.apply_scale(window);
        }
        self.finalized = true;
    }

    /// Whether the post-session window has been applied
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    fn apply_scale(&mut self, window: ScaleWindow) {
        for slot in &mut self.main {
            slot.surface.set_scale(window);
        }
        for thumb in &mut self.thumbnails {
            thumb.surface.set_scale(window);
        }
    }
}

fn push_columns(surface: &mut dyn ChartSurface, series: &[SeriesId], buffer: &TelemetryBuffer) {
    let columns: Vec<(SeriesId, &[Option<f64>])> = series
        .iter()
        .filter_map(|s| buffer.column(*s).map(|col| (*s, col)))
        .collect();
    surface.set_data(buffer.time(), &columns);
}

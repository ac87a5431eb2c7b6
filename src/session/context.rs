//! Frontend-side session state
//!
//! One [`SessionContext`] exists per plotting session, created when the
//! worker announces [`BackendMessage::SessionStarted`] and torn down when
//! the mode exits. It owns the plot-facing buffer and the render scheduler;
//! the owning thread drains worker messages into it and then calls
//! [`SessionContext::render`], so a flush is always applied in full before
//! the render pass that observes it.

use std::path::PathBuf;

use crate::backend::BackendMessage;
use crate::protocol::FsmState;
use crate::render::{ChartLayout, ChartSurface, RenderScheduler, WindowPolicy};
use crate::types::{ConnectionStatus, SeriesId, SessionStats, StatsTracker, TelemetryBuffer};

/// State for one plotting session
pub struct SessionContext {
    /// Source label (`motor_test`, `csv`, ...)
    pub label: String,
    /// Active series set, in display order
    pub series: Vec<SeriesId>,
    /// The plot buffer
    pub buffer: TelemetryBuffer,
    /// Chart slots and window policy
    pub scheduler: RenderScheduler,
    /// Latest statistics snapshot from the worker
    pub stats: Option<StatsTracker>,
    /// Latest ingest counters
    pub counters: Option<SessionStats>,
    /// Last reported flight-computer state
    pub fsm_state: Option<FsmState>,
    /// Connection status display
    pub status: ConnectionStatus,
    /// User-visible error, cleared when a plain connected status arrives
    pub last_error: Option<String>,
    /// Where the last export landed
    pub last_export: Option<PathBuf>,
    running: bool,
}

impl SessionContext {
    /// Create a context for a newly announced session
    pub fn new(label: impl Into<String>, series: Vec<SeriesId>, window: WindowPolicy) -> Self {
        let buffer = TelemetryBuffer::new(&series);
        Self {
            label: label.into(),
            series,
            buffer,
            scheduler: RenderScheduler::new(window),
            stats: None,
            counters: None,
            fsm_state: None,
            status: ConnectionStatus::Disconnected,
            last_error: None,
            last_export: None,
            running: true,
        }
    }

    /// Build a context from a [`BackendMessage::SessionStarted`], if that is
    /// what the message is
    pub fn for_message(msg: &BackendMessage) -> Option<Self> {
        match msg {
            BackendMessage::SessionStarted {
                label,
                series,
                window,
            } => Some(Self::new(label.clone(), series.clone(), *window)),
            _ => None,
        }
    }

    /// Attach chart surfaces in the standard layout: IMU axis groups share
    /// a chart each (flight mode); otherwise one main chart per series for
    /// the first two, with the legacy trio as thumbnails.
    pub fn attach_default_layout(&mut self, mut make: impl FnMut() -> Box<dyn ChartSurface>) {
        let groups = slot_groups(&self.series);
        let flight = groups.iter().any(|g| g.len() > 1);
        if flight {
            for group in groups {
                self.scheduler.attach_main(group, make());
            }
        } else {
            for slot in ChartLayout::main_slots(&self.series) {
                self.scheduler.attach_main(slot, make());
            }
            for series in SeriesId::legacy() {
                self.scheduler.attach_thumbnail(*series, make());
            }
        }
    }

    /// Whether the session is still live (windows keep moving)
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Fold one worker message into the session state
    pub fn apply(&mut self, msg: &BackendMessage) {
        match msg {
            BackendMessage::ConnectionStatus(status) => {
                self.status = *status;
                if *status == ConnectionStatus::Connected {
                    self.last_error = None;
                }
            }
            BackendMessage::ConnectionError(error) => {
                self.last_error = Some(error.clone());
            }
            BackendMessage::DataBatch(samples) => {
                for sample in samples {
                    self.buffer.append(sample);
                }
            }
            BackendMessage::BufferCleared => {
                self.buffer.clear();
                self.stats = None;
            }
            BackendMessage::Stats(stats) => self.stats = Some(stats.clone()),
            BackendMessage::Counters(counters) => self.counters = Some(counters.clone()),
            BackendMessage::FsmStateChanged(state) => self.fsm_state = Some(*state),
            BackendMessage::CommandAcked { .. } => self.last_error = None,
            BackendMessage::CommandTimedOut { expected, .. } => {
                self.last_error = Some(format!("Error: Command for {} timed out.", expected));
            }
            BackendMessage::CommandRejected(reason) => {
                self.last_error = Some(reason.clone());
            }
            BackendMessage::ReplayFinished => {
                // The replay window stays where it grew to.
                self.running = false;
            }
            BackendMessage::SessionEnded { .. } => {
                self.running = false;
                self.scheduler.finalize(&self.buffer);
            }
            BackendMessage::Exported(path) => self.last_export = Some(path.clone()),
            BackendMessage::ExportFailed(reason) => self.last_error = Some(reason.clone()),
            BackendMessage::SessionStarted { .. } | BackendMessage::Shutdown => {}
        }
    }

    /// Push the current buffer into the chart surfaces
    pub fn render(&mut self) {
        self.scheduler.tick(&self.buffer, self.running);
    }
}

/// Group the active series into chart slots: the accelerometer and
/// gyroscope axes share one chart each, everything else plots alone.
fn slot_groups(series: &[SeriesId]) -> Vec<Vec<SeriesId>> {
    const ACC: [SeriesId; 3] = [SeriesId::AccX, SeriesId::AccY, SeriesId::AccZ];
    const GYRO: [SeriesId; 3] = [SeriesId::GyroX, SeriesId::GyroY, SeriesId::GyroZ];

    let mut groups: Vec<Vec<SeriesId>> = Vec::new();
    let mut acc_done = false;
    let mut gyro_done = false;
    for s in series {
        if ACC.contains(s) {
            if !acc_done {
                acc_done = true;
                groups.push(series.iter().copied().filter(|x| ACC.contains(x)).collect());
            }
        } else if GYRO.contains(s) {
            if !gyro_done {
                gyro_done = true;
                groups.push(series.iter().copied().filter(|x| GYRO.contains(x)).collect());
            }
        } else {
            groups.push(vec![*s]);
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::ScaleWindow;
    use crate::types::Sample;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Probe {
        scales: Vec<ScaleWindow>,
        pushes: usize,
    }

    struct ProbeSurface(Rc<RefCell<Probe>>);

    impl ChartSurface for ProbeSurface {
        fn set_data(&mut self, _time: &[f64], _columns: &[(SeriesId, &[Option<f64>])]) {
            self.0.borrow_mut().pushes += 1;
        }
        fn set_scale(&mut self, window: ScaleWindow) {
            self.0.borrow_mut().scales.push(window);
        }
    }

    fn batch(times_ms: &[f64]) -> BackendMessage {
        BackendMessage::DataBatch(
            times_ms
                .iter()
                .map(|t| Sample::new(*t).with_value(SeriesId::Thrust, 1.0))
                .collect(),
        )
    }

    #[test]
    fn test_batches_append_and_clear() {
        let mut ctx = SessionContext::new(
            "motor_test",
            vec![SeriesId::Thrust, SeriesId::Pressure],
            WindowPolicy::Sliding { width_secs: 20.0 },
        );
        ctx.apply(&batch(&[1000.0, 2000.0]));
        assert_eq!(ctx.buffer.len(), 2);

        ctx.apply(&BackendMessage::BufferCleared);
        assert!(ctx.buffer.is_empty());
        assert_eq!(ctx.buffer.series().len(), 2);
    }

    #[test]
    fn test_session_end_finalizes_window() {
        let probe = Rc::new(RefCell::new(Probe::default()));
        let mut ctx = SessionContext::new(
            "motor_test",
            vec![SeriesId::Thrust],
            WindowPolicy::Sliding { width_secs: 20.0 },
        );
        ctx.scheduler
            .attach_main(vec![SeriesId::Thrust], Box::new(ProbeSurface(probe.clone())));

        ctx.apply(&batch(&[0.0, 50_000.0]));
        ctx.apply(&BackendMessage::SessionEnded {
            reconnecting: false,
        });
        assert!(!ctx.is_running());

        let scales = probe.borrow().scales.clone();
        let last = scales.last().copied().unwrap();
        // Full collected range with 10% padding, not the 20s sliding window
        assert_eq!(last.min, 0.0);
        assert!((last.max - 55.0).abs() < 1e-9);
    }

    #[test]
    fn test_error_display_lifecycle() {
        let mut ctx = SessionContext::new(
            "motor_test",
            vec![SeriesId::Thrust],
            WindowPolicy::Sliding { width_secs: 20.0 },
        );
        ctx.apply(&BackendMessage::CommandTimedOut {
            command: "AT+SEND=42,3,ARM".to_string(),
            expected: FsmState::Armed,
        });
        assert!(ctx.last_error.as_deref().unwrap().contains("ARMED"));

        // The worker re-sends the plain status when the display expires
        ctx.apply(&BackendMessage::ConnectionStatus(
            ConnectionStatus::Connected,
        ));
        assert!(ctx.last_error.is_none());
    }

    #[test]
    fn test_slot_groups_for_flight_series() {
        let groups = slot_groups(&[
            SeriesId::Pressure,
            SeriesId::AccX,
            SeriesId::AccY,
            SeriesId::AccZ,
            SeriesId::GyroX,
            SeriesId::GyroY,
            SeriesId::GyroZ,
        ]);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0], vec![SeriesId::Pressure]);
        assert_eq!(groups[1].len(), 3);
        assert_eq!(groups[2][0], SeriesId::GyroX);
    }

    #[test]
    fn test_default_layout_counts() {
        // Bench mode: two mains + three thumbnails
        let mut ctx = SessionContext::new(
            "random",
            SeriesId::legacy().to_vec(),
            WindowPolicy::Sliding { width_secs: 5.0 },
        );
        let mut made = 0;
        ctx.attach_default_layout(|| {
            made += 1;
            Box::new(ProbeSurface(Rc::new(RefCell::new(Probe::default()))))
        });
        assert_eq!(made, 5);

        // Flight mode: one chart per group, no thumbnails
        let mut ctx = SessionContext::new(
            "rocket_flight",
            vec![
                SeriesId::Pressure,
                SeriesId::AccX,
                SeriesId::AccY,
                SeriesId::AccZ,
            ],
            WindowPolicy::Sliding { width_secs: 20.0 },
        );
        let mut made = 0;
        ctx.attach_default_layout(|| {
            made += 1;
            Box::new(ProbeSurface(Rc::new(RefCell::new(Probe::default()))))
        });
        assert_eq!(made, 2);
    }

    #[test]
    fn test_replay_finish_stops_running_without_finalize() {
        let probe = Rc::new(RefCell::new(Probe::default()));
        let mut ctx =
            SessionContext::new("csv", vec![SeriesId::Thrust], WindowPolicy::Replay);
        ctx.scheduler
            .attach_main(vec![SeriesId::Thrust], Box::new(ProbeSurface(probe.clone())));

        ctx.apply(&batch(&[0.0, 1000.0]));
        ctx.apply(&BackendMessage::ReplayFinished);
        assert!(!ctx.is_running());
        // No full-range override for a finished replay
        assert!(probe.borrow().scales.is_empty());
    }
}

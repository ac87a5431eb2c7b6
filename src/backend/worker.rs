//! Session worker thread
//!
//! One loop owns the whole ingest side of a session: the serial link (or the
//! synthetic/replay source standing in for it), line reassembly, decoding,
//! the session sample log, running statistics, guaranteed-command retries,
//! and reconnect polling.
//!
//! # Timing model
//!
//! The loop multiplexes a handful of deadlines rather than real timers:
//! serial reads are bounded by the port timeout, the flush tick (default
//! 50 ms) decodes everything buffered since the last tick in arrival order
//! and publishes it as one batch, and command retries / reconnect polls /
//! status expiry fire when their instants come due. Every deadline lives in
//! a field that teardown clears, so no timer outlives the session that
//! created it.
//!
//! # Cleanup
//!
//! All exits from a live session funnel through one teardown path: stop
//! reading, discard the partial line, drop the port handle, auto-export a
//! non-empty session log, and only then decide between reconnect polling
//! (unintentional disconnect with a remembered device) and settling
//! disconnected (explicit reset, which also forgets the device). Each step
//! tolerates already-closed resources.

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::command::{arm_command, disarm_command, launch_command, CommandDispatcher, CommandEvent};
use crate::config::{AppConfig, AppState};
use crate::csv::{export_to_dir, CsvTable};
use crate::protocol::{Decoded, FsmState, LineAssembler, SourceMode};
use crate::render::WindowPolicy;
use crate::session::{PlaybackClock, SyntheticSource};
use crate::types::{ConnectionStatus, Sample, SeriesId, SessionStats, StatsTracker};

use super::transport::{self, SerialLink, SerialPortLink};
use super::{BackendCommand, BackendMessage};

/// How often ingest counters are published
const COUNTERS_INTERVAL: Duration = Duration::from_millis(500);

/// Loop sleep when no serial read timeout is pacing the worker
const IDLE_SLEEP: Duration = Duration::from_millis(2);

/// The active data source
enum Source {
    Idle,
    Serial {
        link: Box<dyn SerialLink>,
        mode: SourceMode,
        assembler: LineAssembler,
        pending_lines: Vec<String>,
    },
    Synthetic {
        source: SyntheticSource,
        next_tick_at: Instant,
    },
    Replay {
        clock: PlaybackClock,
        finished_reported: bool,
    },
}

/// Why a session is being torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TeardownKind {
    /// A different source is about to start
    SwitchSource,
    /// Explicit user reset: forget the device, no reconnect
    Reset,
    /// Worker shutdown
    Shutdown,
    /// The channel failed underneath us: reconnect if we remember a device
    LinkFailure,
}

struct Reconnect {
    mode: SourceMode,
    next_poll_at: Instant,
}

/// The worker that runs the ingest loop
pub struct SessionWorker {
    config: AppConfig,
    app_state: AppState,
    /// Where the device identity persists; `None` disables persistence
    state_path: Option<PathBuf>,
    command_rx: Receiver<BackendCommand>,
    message_tx: Sender<BackendMessage>,
    running: Arc<AtomicBool>,

    source: Source,
    status: ConnectionStatus,
    session_label: String,
    active_series: Vec<SeriesId>,
    /// Every decoded sample of the session, for export
    session_log: Vec<Sample>,
    /// Samples produced by synthetic/replay sources awaiting the next flush
    pending_samples: Vec<Sample>,
    stats: StatsTracker,
    counters: SessionStats,
    dispatcher: CommandDispatcher,

    next_flush_at: Instant,
    last_counters_at: Instant,
    reconnect: Option<Reconnect>,
    /// When set, the plain connection status is re-sent to clear an
    /// auto-expiring error display
    status_refresh_at: Option<Instant>,
}

impl SessionWorker {
    /// Create a worker
    pub fn new(
        config: AppConfig,
        app_state: AppState,
        command_rx: Receiver<BackendCommand>,
        message_tx: Sender<BackendMessage>,
        running: Arc<AtomicBool>,
    ) -> Self {
        let dispatcher = CommandDispatcher::new(config.retry);
        let now = Instant::now();
        Self {
            config,
            app_state,
            state_path: AppState::default_path(),
            command_rx,
            message_tx,
            running,
            source: Source::Idle,
            status: ConnectionStatus::Disconnected,
            session_label: String::new(),
            active_series: Vec::new(),
            session_log: Vec::new(),
            pending_samples: Vec::new(),
            stats: StatsTracker::new(),
            counters: SessionStats::default(),
            dispatcher,
            next_flush_at: now,
            last_counters_at: now,
            reconnect: None,
            status_refresh_at: None,
        }
    }

    /// Run the main worker loop
    pub fn run(&mut self) {
        tracing::info!("session worker started");

        // A device remembered from a previous run drives a silent
        // auto-reconnect attempt at startup.
        if self.app_state.last_device.is_some() {
            if let Some(mode) = self.app_state.last_mode.clone() {
                tracing::info!("found remembered device, polling for it");
                self.reconnect = Some(Reconnect {
                    mode,
                    next_poll_at: Instant::now(),
                });
                self.set_status(ConnectionStatus::Reconnecting);
            }
        }

        while self.running.load(Ordering::SeqCst) {
            self.process_commands();
            self.pump_source();
            self.tick(Instant::now());
            self.idle_wait();
        }

        self.teardown(TeardownKind::Shutdown);
        let _ = self.message_tx.send(BackendMessage::Shutdown);
        tracing::info!("session worker stopped");
    }

    /// Process pending commands from the owning thread
    fn process_commands(&mut self) {
        loop {
            match self.command_rx.try_recv() {
                Ok(cmd) => self.handle_command(cmd),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.running.store(false, Ordering::SeqCst);
                    break;
                }
            }
        }
    }

    fn handle_command(&mut self, cmd: BackendCommand) {
        let now = Instant::now();
        match cmd {
            BackendCommand::Connect { mode, port } => self.open_serial(mode, port),
            BackendCommand::StartSynthetic => self.start_synthetic(now),
            BackendCommand::StartReplay(table) => self.start_replay(table, now),
            BackendCommand::PauseReplay => {
                if let Source::Replay { clock, .. } = &mut self.source {
                    clock.pause();
                }
            }
            BackendCommand::ResumeReplay => {
                if let Source::Replay { clock, .. } = &mut self.source {
                    clock.resume(now);
                }
            }
            BackendCommand::Restart => self.restart_current(now),
            BackendCommand::Reset => self.teardown(TeardownKind::Reset),
            BackendCommand::Arm => self.guaranteed_radio_command(arm_command, now),
            BackendCommand::Disarm => self.guaranteed_radio_command(disarm_command, now),
            BackendCommand::Launch => self.guaranteed_radio_command(launch_command, now),
            BackendCommand::SendGuaranteed { command, expected } => {
                self.dispatch_guaranteed(command, expected, now)
            }
            BackendCommand::ExportNow => {
                self.export_session();
            }
            BackendCommand::Shutdown => {
                self.running.store(false, Ordering::SeqCst);
            }
        }
    }

    // ---- Source lifecycle -------------------------------------------------

    fn open_serial(&mut self, mode: SourceMode, port: Option<String>) {
        self.teardown(TeardownKind::SwitchSource);
        self.set_status(ConnectionStatus::Connecting);

        let port_name = match port {
            Some(name) => name,
            None => match self.app_state.last_device.and_then(transport::find_matching) {
                Some(entry) => entry.name,
                None => {
                    self.send(BackendMessage::ConnectionError(
                        "no port specified and no remembered device found".to_string(),
                    ));
                    self.set_status(ConnectionStatus::Disconnected);
                    return;
                }
            },
        };

        let baud_rate = self.config.serial_config(&mode).baud_rate;
        match SerialPortLink::open(&port_name, baud_rate) {
            Ok(link) => self.attach_link(Box::new(link), mode),
            Err(e) => {
                tracing::error!("serial connection error: {}", e);
                self.send(BackendMessage::ConnectionError(format!(
                    "Failed to connect: {}",
                    e
                )));
                // A failed open also forgets the remembered device, matching
                // the explicit-reset behavior.
                self.app_state.last_device = None;
                self.app_state.last_mode = None;
                self.persist_state();
                self.set_status(ConnectionStatus::Disconnected);
            }
        }
    }

    /// Bring up a serial session over an already-open link.
    ///
    /// Split from [`Self::open_serial`] so tests can drive the worker over a
    /// mock link.
    pub(crate) fn attach_link(&mut self, link: Box<dyn SerialLink>, mode: SourceMode) {
        self.reconnect = None;

        if let Some(identity) = link.identity() {
            self.app_state.last_device = Some(identity);
            self.app_state.last_mode = Some(mode.clone());
            self.persist_state();
        }

        let serial_cfg = self.config.serial_config(&mode);
        let window = WindowPolicy::Sliding {
            width_secs: serial_cfg.window_secs,
        };
        let series = mode.active_series();
        self.session_label = mode.label().to_string();
        self.active_series = series.clone();
        self.start_session_data();

        let is_motor_test = matches!(mode, SourceMode::MotorTest);
        let needs_stream_start = mode.needs_stream_start();
        self.source = Source::Serial {
            link,
            mode,
            assembler: LineAssembler::new(),
            pending_lines: Vec::new(),
        };

        self.send(BackendMessage::SessionStarted {
            label: self.session_label.clone(),
            series,
            window,
        });
        self.set_status(ConnectionStatus::Connected);
        if is_motor_test {
            // The flight computer boots silent; show its power-on state.
            self.send(BackendMessage::FsmStateChanged(FsmState::Boot));
        }
        if needs_stream_start {
            self.write_command("STREAM_START");
        }
    }

    fn start_synthetic(&mut self, now: Instant) {
        self.teardown(TeardownKind::SwitchSource);
        self.session_label = "random".to_string();
        self.active_series = SyntheticSource::active_series().to_vec();
        self.start_session_data();
        self.source = Source::Synthetic {
            source: SyntheticSource::new(now),
            next_tick_at: now,
        };
        self.send(BackendMessage::SessionStarted {
            label: self.session_label.clone(),
            series: self.active_series.clone(),
            window: WindowPolicy::Sliding {
                width_secs: self.config.synthetic.window_secs,
            },
        });
    }

    fn start_replay(&mut self, table: CsvTable, now: Instant) {
        self.teardown(TeardownKind::SwitchSource);
        self.session_label = "csv".to_string();
        self.active_series = table.series.clone();
        self.start_session_data();
        let mut clock = PlaybackClock::new();
        clock.start(table.rows, now);
        self.source = Source::Replay {
            clock,
            finished_reported: false,
        };
        self.send(BackendMessage::SessionStarted {
            label: self.session_label.clone(),
            series: self.active_series.clone(),
            window: WindowPolicy::Replay,
        });
    }

    fn restart_current(&mut self, now: Instant) {
        match &mut self.source {
            Source::Idle => return,
            Source::Serial { pending_lines, .. } => {
                pending_lines.clear();
            }
            Source::Synthetic {
                source,
                next_tick_at,
            } => {
                source.restart(now);
                *next_tick_at = now;
            }
            Source::Replay {
                clock,
                finished_reported,
            } => {
                clock.restart(now);
                *finished_reported = false;
            }
        }
        self.clear_session_data();
        self.send(BackendMessage::BufferCleared);
    }

    /// Fresh data stores for a new session
    fn start_session_data(&mut self) {
        self.clear_session_data();
        self.counters = SessionStats::default();
        self.next_flush_at = Instant::now();
    }

    fn clear_session_data(&mut self) {
        self.session_log.clear();
        self.pending_samples.clear();
        self.stats.reset();
    }

    // ---- Ingest -----------------------------------------------------------

    /// Pull whatever the active source has produced since the last turn
    fn pump_source(&mut self) {
        let failure = match &mut self.source {
            Source::Idle => None,
            Source::Serial {
                link,
                assembler,
                pending_lines,
                ..
            } => {
                let mut buf = [0u8; 1024];
                match link.read_chunk(&mut buf) {
                    Ok(0) => None,
                    Ok(n) => {
                        pending_lines.extend(assembler.feed_bytes(&buf[..n]));
                        None
                    }
                    Err(e) => Some(e),
                }
            }
            Source::Synthetic {
                source,
                next_tick_at,
            } => {
                let now = Instant::now();
                let interval = Duration::from_millis(self.config.synthetic.interval_ms);
                while now >= *next_tick_at {
                    self.pending_samples.push(source.sample_at(*next_tick_at));
                    *next_tick_at += interval;
                }
                None
            }
            Source::Replay {
                clock,
                finished_reported,
            } => {
                let due = clock.advance(Instant::now());
                self.pending_samples.extend(due);
                if clock.is_finished() && !*finished_reported {
                    *finished_reported = true;
                    let _ = self.message_tx.send(BackendMessage::ReplayFinished);
                }
                None
            }
        };

        if let Some(err) = failure {
            self.handle_link_failure(err);
        }
    }

    /// Fire every deadline that has come due
    fn tick(&mut self, now: Instant) {
        if now >= self.next_flush_at {
            self.flush(now);
            self.next_flush_at = now + self.config.flush_interval();
        }

        let events = self.dispatcher.advance(now);
        if !events.is_empty() {
            self.apply_command_events(events, now);
        }

        self.poll_reconnect(now);

        if let Some(at) = self.status_refresh_at {
            if now >= at {
                self.status_refresh_at = None;
                self.send(BackendMessage::ConnectionStatus(self.status));
            }
        }
    }

    /// Decode everything buffered since the last flush, in arrival order,
    /// then publish one batch. A full flush always completes before the
    /// render pass that observes it.
    fn flush(&mut self, now: Instant) {
        let (lines, mode) = match &mut self.source {
            Source::Serial {
                pending_lines,
                mode,
                ..
            } => (std::mem::take(pending_lines), Some(mode.clone())),
            _ => (Vec::new(), None),
        };

        let mut batch: Vec<Sample> = Vec::new();
        if let Some(mode) = mode {
            for line in lines {
                match mode.decode(&line) {
                    Some(Decoded::Sample(sample)) => batch.push(sample),
                    Some(Decoded::State(state)) => self.handle_state(state, &mut batch),
                    Some(Decoded::Ping) => self.write_command("PONG"),
                    None => self.counters.lines_skipped += 1,
                }
            }
        }
        batch.append(&mut self.pending_samples);

        if batch.is_empty() {
            return;
        }
        for sample in &batch {
            self.session_log.push(sample.clone());
            self.stats.observe(sample);
        }
        self.counters.samples_decoded += batch.len() as u64;

        self.try_send(BackendMessage::DataBatch(batch));
        self.try_send(BackendMessage::Stats(self.stats.clone()));
        if now.saturating_duration_since(self.last_counters_at) >= COUNTERS_INTERVAL {
            self.last_counters_at = now;
            self.try_send(BackendMessage::Counters(self.counters.clone()));
        }
    }

    /// React to a decoded FSM state: surface it, match it against the
    /// in-flight command, and restart the plot when configured to.
    fn handle_state(&mut self, state: FsmState, batch: &mut Vec<Sample>) {
        self.send(BackendMessage::FsmStateChanged(state));

        if let Some(command) = self.dispatcher.observe_state(state) {
            self.send(BackendMessage::CommandAcked { command, state });
        }

        let restart = match &self.source {
            Source::Serial { mode, .. } => self
                .config
                .serial_config(mode)
                .restart_states
                .contains(&state),
            _ => false,
        };
        if restart {
            tracing::info!("state changed to {}, restarting plot", state);
            // Samples decoded earlier in this same flush belong to the old
            // test sequence; they go with the old plot.
            batch.clear();
            self.clear_session_data();
            self.send(BackendMessage::BufferCleared);
        }
    }

    // ---- Commands ---------------------------------------------------------

    fn guaranteed_radio_command(
        &mut self,
        build: fn(u32) -> (String, FsmState),
        now: Instant,
    ) {
        let dest_id = match &self.source {
            Source::Serial { mode, .. } => self.config.serial_config(mode).radio_dest_id,
            _ => {
                self.send(BackendMessage::CommandRejected("not connected".to_string()));
                return;
            }
        };
        let (command, expected) = build(dest_id);
        self.dispatch_guaranteed(command, expected, now);
    }

    fn dispatch_guaranteed(&mut self, command: String, expected: FsmState, now: Instant) {
        if !matches!(self.source, Source::Serial { .. }) {
            self.send(BackendMessage::CommandRejected("not connected".to_string()));
            return;
        }
        match self.dispatcher.dispatch(command, expected, now) {
            Ok(events) => self.apply_command_events(events, now),
            Err(e) => self.send(BackendMessage::CommandRejected(e.to_string())),
        }
    }

    fn apply_command_events(&mut self, events: Vec<CommandEvent>, now: Instant) {
        for event in events {
            match event {
                CommandEvent::Transmit(command) => self.write_command(&command),
                CommandEvent::TimedOut { command, expected } => {
                    self.send(BackendMessage::CommandTimedOut { command, expected });
                    // The error display clears itself after a while.
                    self.status_refresh_at = Some(now + self.config.status_expiry());
                }
            }
        }
    }

    /// Write a command string plus the mode's line terminator.
    ///
    /// Send failures are logged, not fatal: the retry machinery or the read
    /// path will surface a dead channel soon enough.
    fn write_command(&mut self, command: &str) {
        let Source::Serial { link, mode, .. } = &mut self.source else {
            tracing::warn!("command '{}' with no serial session", command);
            return;
        };
        let ending = self.config.serial_config(mode).line_ending;
        let framed = format!("{}{}", command, ending.as_str());
        match link.write_all(framed.as_bytes()) {
            Ok(()) => {
                tracing::info!("sent command: {}", command);
                self.counters.commands_sent += 1;
            }
            Err(e) => tracing::error!("error sending command: {}", e),
        }
    }

    // ---- Teardown & reconnect --------------------------------------------

    fn handle_link_failure(&mut self, err: crate::error::TelemvisError) {
        tracing::error!("error reading from serial port: {}", err);
        self.send(BackendMessage::ConnectionError(err.to_string()));
        self.set_status(ConnectionStatus::Disconnecting);
        self.teardown(TeardownKind::LinkFailure);
    }

    /// The one cleanup path. Unconditional and idempotent: every step
    /// tolerates an already-closed resource, and every per-session deadline
    /// is cleared here.
    fn teardown(&mut self, kind: TeardownKind) {
        self.dispatcher.cancel();
        self.status_refresh_at = None;

        let serial_mode = match &self.source {
            Source::Serial { mode, .. } => Some(mode.clone()),
            _ => None,
        };
        let had_source = !matches!(self.source, Source::Idle);

        match std::mem::replace(&mut self.source, Source::Idle) {
            Source::Serial {
                mut assembler,
                link,
                ..
            } => {
                // Stop accepting reads, discard the partial record, close
                // the port. Dropping the handle closes it; a port that died
                // underneath us has nothing left to close.
                assembler.reset();
                drop(link);
            }
            _ => {}
        }

        if had_source {
            // Auto-export before anything clears the collected data.
            if !self.session_log.is_empty() {
                self.export_session();
            } else {
                tracing::debug!("session ended with no data logged");
            }
        }

        let reconnecting = kind == TeardownKind::LinkFailure
            && serial_mode.is_some()
            && self.app_state.last_device.is_some();

        if kind == TeardownKind::Reset {
            self.app_state.last_device = None;
            self.app_state.last_mode = None;
            self.persist_state();
        }

        if had_source {
            self.send(BackendMessage::SessionEnded { reconnecting });
        }

        if reconnecting {
            self.counters.reconnect_attempts = 0;
            self.reconnect = Some(Reconnect {
                mode: serial_mode.unwrap(),
                next_poll_at: Instant::now(),
            });
            self.set_status(ConnectionStatus::Reconnecting);
        } else {
            self.reconnect = None;
            self.set_status(ConnectionStatus::Disconnected);
        }
    }

    fn poll_reconnect(&mut self, now: Instant) {
        let due = matches!(&self.reconnect, Some(r) if now >= r.next_poll_at);
        if !due {
            return;
        }
        let Some(identity) = self.app_state.last_device else {
            // Identity vanished (reset raced the poll); stop trying.
            self.reconnect = None;
            self.set_status(ConnectionStatus::Disconnected);
            return;
        };

        self.counters.reconnect_attempts += 1;
        match transport::find_matching(identity) {
            Some(entry) => {
                tracing::info!("device re-detected at {}, reconnecting", entry.name);
                let mode = self.reconnect.take().unwrap().mode;
                self.open_serial(mode, Some(entry.name));
            }
            None => {
                tracing::debug!("reconnect: device not found yet");
                if let Some(rec) = &mut self.reconnect {
                    rec.next_poll_at = now + self.config.reconnect_poll();
                }
            }
        }
    }

    // ---- Export & plumbing ------------------------------------------------

    /// Export the session log; reports through messages either way
    fn export_session(&mut self) {
        if self.session_log.is_empty() {
            tracing::debug!("export requested with no data logged");
            return;
        }
        let Some(dir) = self.config.resolved_export_dir() else {
            self.send(BackendMessage::ExportFailed(
                "no export directory available".to_string(),
            ));
            return;
        };
        match export_to_dir(&dir, &self.session_label, &self.active_series, &self.session_log) {
            Ok(path) => self.send(BackendMessage::Exported(path)),
            Err(e) => {
                tracing::error!("export failed: {}", e);
                self.send(BackendMessage::ExportFailed(e.to_string()));
            }
        }
    }

    fn persist_state(&self) {
        if let Some(path) = &self.state_path {
            if let Err(e) = self.app_state.save(path) {
                tracing::warn!("failed to persist app state: {}", e);
            }
        }
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        if self.status != status {
            self.status = status;
            self.send(BackendMessage::ConnectionStatus(status));
        }
    }

    /// Send a control message, ignoring a closed channel
    fn send(&self, msg: BackendMessage) {
        let _ = self.message_tx.send(msg);
    }

    /// Send a data message, dropping (and counting) on backpressure
    fn try_send(&mut self, msg: BackendMessage) {
        if self.message_tx.try_send(msg).is_err() {
            self.counters.dropped_messages += 1;
        }
    }

    fn idle_wait(&self) {
        // A serial read timeout already paces the loop.
        if !matches!(self.source, Source::Serial { .. }) {
            std::thread::sleep(IDLE_SLEEP);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock_link::{MockLink, MockLinkHandle};
    use crate::types::DeviceIdentity;
    use crossbeam_channel::bounded;

    fn test_worker(config: AppConfig) -> (SessionWorker, Receiver<BackendMessage>) {
        let (_cmd_tx, cmd_rx) = bounded(16);
        let (msg_tx, msg_rx) = bounded(256);
        let running = Arc::new(AtomicBool::new(true));
        let mut worker = SessionWorker::new(config, AppState::default(), cmd_rx, msg_tx, running);
        worker.state_path = None; // keep tests off the real filesystem
        (worker, msg_rx)
    }

    fn motor_test_worker() -> (SessionWorker, Receiver<BackendMessage>, MockLinkHandle) {
        let (mut worker, msg_rx) = test_worker(AppConfig::default());
        let (link, handle) = MockLink::new(Some(DeviceIdentity::new(1, 2)));
        worker.attach_link(Box::new(link), SourceMode::MotorTest);
        while msg_rx.try_recv().is_ok() {} // drain session-start chatter
        (worker, msg_rx, handle)
    }

    fn drain(rx: &Receiver<BackendMessage>) -> Vec<BackendMessage> {
        let mut out = Vec::new();
        while let Ok(m) = rx.try_recv() {
            out.push(m);
        }
        out
    }

    #[test]
    fn test_attach_link_starts_session() {
        let (mut worker, msg_rx) = test_worker(AppConfig::default());
        let (link, _handle) = MockLink::new(Some(DeviceIdentity::new(0x1a86, 0x7523)));
        worker.attach_link(Box::new(link), SourceMode::MotorTest);

        assert_eq!(worker.status, ConnectionStatus::Connected);
        assert_eq!(
            worker.app_state.last_device,
            Some(DeviceIdentity::new(0x1a86, 0x7523))
        );

        let messages = drain(&msg_rx);
        assert!(messages.iter().any(|m| matches!(
            m,
            BackendMessage::SessionStarted { label, series, .. }
                if label == "motor_test" && series == &[SeriesId::Thrust, SeriesId::Pressure]
        )));
        // Motor test shows the power-on FSM state
        assert!(messages
            .iter()
            .any(|m| matches!(m, BackendMessage::FsmStateChanged(FsmState::Boot))));
    }

    #[test]
    fn test_serial_ingest_batches_on_flush() {
        let (mut worker, msg_rx, handle) = motor_test_worker();
        handle.push_chunk("+RCV=42,3,1000,20.0,1013.0,-10,0\n+RCV=42,3,1100,21.0,");
        handle.push_chunk("1012.5,-10,0\n");

        worker.pump_source();
        worker.pump_source();
        worker.flush(Instant::now());

        let messages = drain(&msg_rx);
        let batch = messages
            .iter()
            .find_map(|m| match m {
                BackendMessage::DataBatch(b) => Some(b.clone()),
                _ => None,
            })
            .expect("one batch");
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].timestamp_ms, 1000.0);
        assert_eq!(batch[1].value(SeriesId::Thrust), Some(21.0));
        assert_eq!(worker.session_log.len(), 2);
        assert_eq!(worker.stats.current(SeriesId::Pressure), Some(1012.5));
    }

    #[test]
    fn test_restart_state_clears_mid_flush() {
        let (mut worker, msg_rx, handle) = motor_test_worker();
        // A sample from the old sequence, then the ARMED transition
        handle.push_chunk("+RCV=42,3,900,5.0,1000.0,-10,0\n+RCV=42,5,ARMED,-12,1\n");

        worker.pump_source();
        worker.flush(Instant::now());

        let messages = drain(&msg_rx);
        assert!(messages
            .iter()
            .any(|m| matches!(m, BackendMessage::BufferCleared)));
        assert!(messages
            .iter()
            .any(|m| matches!(m, BackendMessage::FsmStateChanged(FsmState::Armed))));
        // The pre-arm sample went with the old plot
        assert!(!messages
            .iter()
            .any(|m| matches!(m, BackendMessage::DataBatch(_))));
        assert!(worker.session_log.is_empty());
    }

    #[test]
    fn test_guaranteed_command_transmits_and_acks() {
        let (mut worker, msg_rx, handle) = motor_test_worker();
        let now = Instant::now();

        worker.guaranteed_radio_command(arm_command, now);
        assert_eq!(handle.written(), "AT+SEND=42,3,ARM\r\n");
        assert!(worker.dispatcher.is_in_flight());

        handle.push_chunk("+RCV=42,5,ARMED,-12,1\n");
        worker.pump_source();
        worker.flush(now);

        assert!(!worker.dispatcher.is_in_flight());
        let messages = drain(&msg_rx);
        assert!(messages.iter().any(|m| matches!(
            m,
            BackendMessage::CommandAcked { command, state: FsmState::Armed }
                if command == "AT+SEND=42,3,ARM"
        )));
        // The ack cancelled the retries: far-future ticks transmit nothing
        worker.tick(now + Duration::from_secs(3600));
        assert_eq!(handle.written(), "AT+SEND=42,3,ARM\r\n");
    }

    #[test]
    fn test_second_guaranteed_command_rejected() {
        let (mut worker, msg_rx, _handle) = motor_test_worker();
        let now = Instant::now();
        worker.guaranteed_radio_command(arm_command, now);
        worker.guaranteed_radio_command(launch_command, now);

        let messages = drain(&msg_rx);
        assert!(messages
            .iter()
            .any(|m| matches!(m, BackendMessage::CommandRejected(_))));
        // Still waiting on the first command
        assert_eq!(worker.dispatcher.in_flight().unwrap().1, FsmState::Armed);
    }

    #[test]
    fn test_command_without_session_rejected() {
        let (mut worker, msg_rx) = test_worker(AppConfig::default());
        worker.guaranteed_radio_command(arm_command, Instant::now());
        let messages = drain(&msg_rx);
        assert!(messages
            .iter()
            .any(|m| matches!(m, BackendMessage::CommandRejected(_))));
    }

    #[test]
    fn test_link_failure_enters_reconnect() {
        let (mut worker, msg_rx, handle) = motor_test_worker();
        handle.close();
        worker.pump_source();

        assert_eq!(worker.status, ConnectionStatus::Reconnecting);
        assert!(worker.reconnect.is_some());
        let messages = drain(&msg_rx);
        assert!(messages.iter().any(|m| matches!(
            m,
            BackendMessage::SessionEnded { reconnecting: true }
        )));
        assert!(messages
            .iter()
            .any(|m| matches!(m, BackendMessage::ConnectionError(_))));
    }

    #[test]
    fn test_read_error_funnels_into_one_cleanup_path() {
        use crate::backend::transport::MockSerialLink;

        let (mut worker, msg_rx) = test_worker(AppConfig::default());
        let mut link = MockSerialLink::new();
        link.expect_identity()
            .return_const(Some(DeviceIdentity::new(1, 2)));
        link.expect_read_chunk().returning(|_| {
            Err(crate::error::TelemvisError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "device unplugged",
            )))
        });
        worker.attach_link(Box::new(link), SourceMode::MotorTest);
        while msg_rx.try_recv().is_ok() {}

        worker.pump_source();

        // Channel error funnels into teardown: reconnect polling begins
        assert_eq!(worker.status, ConnectionStatus::Reconnecting);
        assert!(matches!(worker.source, Source::Idle));
    }

    #[test]
    fn test_link_failure_without_identity_settles_disconnected() {
        let (mut worker, msg_rx) = test_worker(AppConfig::default());
        let (link, handle) = MockLink::new(None);
        worker.attach_link(Box::new(link), SourceMode::MotorTest);
        while msg_rx.try_recv().is_ok() {}

        handle.close();
        worker.pump_source();

        assert_eq!(worker.status, ConnectionStatus::Disconnected);
        assert!(worker.reconnect.is_none());
        let messages = drain(&msg_rx);
        assert!(messages.iter().any(|m| matches!(
            m,
            BackendMessage::SessionEnded { reconnecting: false }
        )));
    }

    #[test]
    fn test_reset_forgets_device_and_cancels_everything() {
        let (mut worker, msg_rx, _handle) = motor_test_worker();
        worker.guaranteed_radio_command(arm_command, Instant::now());

        worker.handle_command(BackendCommand::Reset);

        assert_eq!(worker.app_state.last_device, None);
        assert!(worker.reconnect.is_none());
        assert!(!worker.dispatcher.is_in_flight());
        assert!(worker.status_refresh_at.is_none());
        assert_eq!(worker.status, ConnectionStatus::Disconnected);
        let messages = drain(&msg_rx);
        assert!(messages.iter().any(|m| matches!(
            m,
            BackendMessage::SessionEnded { reconnecting: false }
        )));
    }

    #[test]
    fn test_teardown_auto_exports_non_empty_log() {
        let export_dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            export_dir: Some(export_dir.path().to_path_buf()),
            ..Default::default()
        };
        let (mut worker, msg_rx) = test_worker(config);
        let (link, handle) = MockLink::new(Some(DeviceIdentity::new(1, 2)));
        worker.attach_link(Box::new(link), SourceMode::MotorTest);

        handle.push_chunk("+RCV=42,3,1000,20.0,1013.0,-10,0\n");
        worker.pump_source();
        worker.flush(Instant::now());

        worker.handle_command(BackendCommand::Reset);

        let messages = drain(&msg_rx);
        let path = messages
            .iter()
            .find_map(|m| match m {
                BackendMessage::Exported(p) => Some(p.clone()),
                _ => None,
            })
            .expect("auto-export on reset");
        assert!(path.exists());
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.starts_with("timestamp,thrust,pressure"));
        assert!(text.contains("1000,20,1013"));
    }

    #[test]
    fn test_synthetic_source_produces_batches() {
        let (mut worker, msg_rx) = test_worker(AppConfig::default());
        let now = Instant::now();
        worker.start_synthetic(now);

        // Two intervals elapse before the pump runs
        std::thread::sleep(Duration::from_millis(210));
        worker.pump_source();
        worker.flush(Instant::now());

        let messages = drain(&msg_rx);
        let batch = messages
            .iter()
            .find_map(|m| match m {
                BackendMessage::DataBatch(b) => Some(b.clone()),
                _ => None,
            })
            .expect("synthetic batch");
        assert!(batch.len() >= 2);
        assert!(batch[0].value(SeriesId::Temperature).is_some());
    }

    #[test]
    fn test_replay_drains_and_finishes() {
        let (mut worker, msg_rx) = test_worker(AppConfig::default());
        let table = CsvTable {
            series: vec![SeriesId::Pressure],
            rows: vec![
                Sample::new(0.0).with_value(SeriesId::Pressure, 1.0),
                Sample::new(10.0).with_value(SeriesId::Pressure, 2.0),
            ],
        };
        worker.handle_command(BackendCommand::StartReplay(table));

        std::thread::sleep(Duration::from_millis(30));
        worker.pump_source();
        worker.flush(Instant::now());

        let messages = drain(&msg_rx);
        assert!(messages
            .iter()
            .any(|m| matches!(m, BackendMessage::ReplayFinished)));
        let batch = messages
            .iter()
            .find_map(|m| match m {
                BackendMessage::DataBatch(b) => Some(b.clone()),
                _ => None,
            })
            .expect("replay batch");
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_ping_answered_with_pong() {
        let (mut worker, msg_rx) = test_worker(AppConfig::default());
        let (link, handle) = MockLink::new(None);
        let mode = SourceMode::hydrostatic_test(vec![SeriesId::Pressure]).unwrap();
        worker.attach_link(Box::new(link), mode);
        while msg_rx.try_recv().is_ok() {}

        // Connect handshake went out first
        assert_eq!(handle.written(), "STREAM_START\n");

        handle.push_chunk("PING\n");
        worker.pump_source();
        worker.flush(Instant::now());
        assert_eq!(handle.written(), "STREAM_START\nPONG\n");
    }

    #[test]
    fn test_command_timeout_surfaces_and_schedules_status_refresh() {
        let config = AppConfig {
            retry: crate::config::RetryConfig {
                max_attempts: 1,
                ..Default::default()
            },
            ..Default::default()
        };
        let (mut worker, msg_rx) = test_worker(config);
        let (link, handle) = MockLink::new(None);
        worker.attach_link(Box::new(link), SourceMode::MotorTest);
        while msg_rx.try_recv().is_ok() {}

        let now = Instant::now();
        worker.guaranteed_radio_command(arm_command, now);

        assert_eq!(handle.written(), "AT+SEND=42,3,ARM\r\n");
        let messages = drain(&msg_rx);
        assert!(messages.iter().any(|m| matches!(
            m,
            BackendMessage::CommandTimedOut { expected: FsmState::Armed, .. }
        )));
        assert!(worker.status_refresh_at.is_some());

        // The error display expires back to the plain status
        worker.tick(now + worker.config.status_expiry() + Duration::from_millis(1));
        let messages = drain(&msg_rx);
        assert!(messages.iter().any(|m| matches!(
            m,
            BackendMessage::ConnectionStatus(ConnectionStatus::Connected)
        )));
        assert!(worker.status_refresh_at.is_none());
    }

    #[test]
    fn test_restart_clears_data_and_notifies() {
        let (mut worker, msg_rx, handle) = motor_test_worker();
        handle.push_chunk("+RCV=42,3,1000,20.0,1013.0,-10,0\n");
        worker.pump_source();
        worker.flush(Instant::now());
        assert_eq!(worker.session_log.len(), 1);
        while msg_rx.try_recv().is_ok() {}

        worker.handle_command(BackendCommand::Restart);
        assert!(worker.session_log.is_empty());
        assert!(!worker.stats.max(SeriesId::Thrust).is_set());
        let messages = drain(&msg_rx);
        assert!(messages
            .iter()
            .any(|m| matches!(m, BackendMessage::BufferCleared)));
    }
}

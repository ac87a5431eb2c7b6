//! Guaranteed command dispatch
//!
//! Safety-critical commands (arm/disarm/launch) ride a half-duplex radio
//! link that may be saturated by telemetry traffic, so a single transmission
//! is not trusted: the command is retransmitted with exponential backoff and
//! jitter until the flight computer's FSM reports the expected state, or the
//! attempt budget is exhausted.
//!
//! The dispatcher is an explicit state machine advanced by passing
//! [`Instant`]s, so it is testable without real timers. At most one
//! guaranteed command is in flight at a time; a second dispatch is rejected
//! rather than queued.

use rand::Rng;
use std::time::{Duration, Instant};

use crate::config::RetryConfig;
use crate::error::{Result, TelemvisError};
use crate::protocol::FsmState;

/// Build the radio send envelope for a payload
pub fn radio_send(dest_id: u32, payload: &str) -> String {
    format!("AT+SEND={},{},{}", dest_id, payload.len(), payload)
}

/// The ARM command and the FSM state that acknowledges it
pub fn arm_command(dest_id: u32) -> (String, FsmState) {
    (radio_send(dest_id, "ARM"), FsmState::Armed)
}

/// The DISARM command and the FSM state that acknowledges it
pub fn disarm_command(dest_id: u32) -> (String, FsmState) {
    (radio_send(dest_id, "DISARM"), FsmState::Safe)
}

/// The LAUNCH command and the FSM state that acknowledges it
pub fn launch_command(dest_id: u32) -> (String, FsmState) {
    (radio_send(dest_id, "LAUNCH"), FsmState::Launched)
}

/// Side effects requested by the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandEvent {
    /// Write this command string to the channel now
    Transmit(String),
    /// All attempts sent with no matching acknowledgement
    TimedOut {
        command: String,
        expected: FsmState,
    },
}

#[derive(Debug)]
struct InFlight {
    command: String,
    expected: FsmState,
    attempts_sent: u32,
    next_retry_at: Instant,
}

/// Retry state machine for guaranteed commands.
///
/// Lifecycle: `dispatch` transmits immediately and schedules the first
/// retry; `advance` fires due retries; `observe_state` with the expected
/// FSM state cancels everything pending (the success path). After the final
/// transmission with no ack, [`CommandEvent::TimedOut`] is emitted and the
/// machine returns to idle.
#[derive(Debug)]
pub struct CommandDispatcher {
    retry: RetryConfig,
    inflight: Option<InFlight>,
}

impl CommandDispatcher {
    /// Create a dispatcher with the given retry tuning
    pub fn new(retry: RetryConfig) -> Self {
        Self {
            retry,
            inflight: None,
        }
    }

    /// Whether a guaranteed command is currently in flight
    pub fn is_in_flight(&self) -> bool {
        self.inflight.is_some()
    }

    /// The in-flight command and its expected ack state
    pub fn in_flight(&self) -> Option<(&str, FsmState)> {
        self.inflight
            .as_ref()
            .map(|f| (f.command.as_str(), f.expected))
    }

    /// When the next retry is due, for scheduling
    pub fn next_deadline(&self) -> Option<Instant> {
        self.inflight.as_ref().map(|f| f.next_retry_at)
    }

    /// Start a guaranteed command. The returned events include the first
    /// transmission. Fails with a conflict while another command is in
    /// flight; nothing is mutated in that case.
    pub fn dispatch(
        &mut self,
        command: impl Into<String>,
        expected: FsmState,
        now: Instant,
    ) -> Result<Vec<CommandEvent>> {
        let command = command.into();
        if let Some(inflight) = &self.inflight {
            return Err(TelemvisError::CommandInFlight(inflight.command.clone()));
        }
        tracing::info!("dispatching '{}', waiting for {}", command, expected);
        self.inflight = Some(InFlight {
            command,
            expected,
            attempts_sent: 0,
            next_retry_at: now,
        });
        Ok(self.fire(now))
    }

    /// Fire any due retry. Call on every scheduler tick.
    pub fn advance(&mut self, now: Instant) -> Vec<CommandEvent> {
        match &self.inflight {
            Some(inflight) if now >= inflight.next_retry_at => self.fire(now),
            _ => Vec::new(),
        }
    }

    /// Feed an observed FSM state; if it acknowledged the in-flight command,
    /// all pending retries are cancelled and the command string is returned.
    pub fn observe_state(&mut self, state: FsmState) -> Option<String> {
        let acked = matches!(&self.inflight, Some(f) if f.expected == state);
        if !acked {
            return None;
        }
        tracing::info!("state confirmation received: {}, stopping retries", state);
        self.inflight.take().map(|f| f.command)
    }

    /// Drop any in-flight command without an event (session teardown)
    pub fn cancel(&mut self) {
        if let Some(inflight) = self.inflight.take() {
            tracing::debug!("cancelling in-flight command '{}'", inflight.command);
        }
    }

    fn fire(&mut self, now: Instant) -> Vec<CommandEvent> {
        let Some(inflight) = self.inflight.as_mut() else {
            return Vec::new();
        };
        let mut events = vec![CommandEvent::Transmit(inflight.command.clone())];
        inflight.attempts_sent += 1;

        if inflight.attempts_sent < self.retry.max_attempts {
            let delay = backoff_delay(&self.retry, inflight.attempts_sent);
            tracing::debug!(
                "attempt {}/{} sent, retry in {:?}",
                inflight.attempts_sent,
                self.retry.max_attempts,
                delay
            );
            inflight.next_retry_at = now + delay;
        } else {
            // Budget spent with the final transmission; report and go idle.
            tracing::error!(
                "command '{}' timed out after {} attempts",
                inflight.command,
                inflight.attempts_sent
            );
            let inflight = self.inflight.take().unwrap();
            events.push(CommandEvent::TimedOut {
                command: inflight.command,
                expected: inflight.expected,
            });
        }
        events
    }
}

/// Exponential backoff with jitter: `base * 2^(attempt-1)` plus up to
/// `jitter` fraction on top, spreading retries so they cannot align with the
/// periodic flush timers on a saturated link.
fn backoff_delay(retry: &RetryConfig, attempt: u32) -> Duration {
    let base = retry.base_delay().as_secs_f64();
    let exp = base * f64::powi(2.0, attempt.saturating_sub(1) as i32);
    let jitter = exp * retry.jitter * rand::thread_rng().gen::<f64>();
    Duration::from_secs_f64(exp + jitter)
}

//! Connection state tracking and reconnect scheduling
//!
//! The machine does not own a timer. Every transport-reported state is fed
//! in with the current instant and the machine answers with what to do:
//! nothing, resume right away, or resume once a deadline passes. The owner
//! checks [`ConnectionStateMachine::poll_retry`] on each tick.
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use inworld_config::ReconnectConfig;
use inworld_types::{ConnectionError, ConnectionState, ReconnectionType};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Bounded additive backoff
///
/// The delay grows by a fixed interval per retry and never exceeds the
/// ceiling: `delay_after(k) = min(initial + k * interval, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay of the first scheduled retry
    pub initial: Duration,
    /// Growth per further retry
    pub interval: Duration,
    /// Ceiling
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            interval: Duration::from_millis(250),
            max: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn new(initial: Duration, interval: Duration, max: Duration) -> Self {
        Self {
            initial,
            interval,
            max,
        }
    }

    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self::new(config.initial_delay(), config.interval(), config.max_delay())
    }

    /// Delay after `k` earlier scheduled retries
    pub fn delay_after(&self, k: u32) -> Duration {
        let grown = self
            .interval
            .checked_mul(k)
            .and_then(|step| self.initial.checked_add(step))
            .unwrap_or(self.max);
        grown.min(self.max)
    }
}

/// What the owner should do after a state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    None,
    /// Resume the session immediately
    ResumeNow,
    /// Resume once this instant passes
    ResumeAt(Instant),
}

/// Connection state plus reconnect bookkeeping
#[derive(Debug)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
    policy: BackoffPolicy,
    /// Disconnects since the last successful connect
    consecutive_disconnects: u32,
    pending_retry: Option<Instant>,
    last_error: ConnectionError,
    transitions: u64,
}

impl ConnectionStateMachine {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            state: ConnectionState::Idle,
            policy,
            consecutive_disconnects: 0,
            pending_retry: None,
            last_error: ConnectionError::default(),
            transitions: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn last_error(&self) -> &ConnectionError {
        &self.last_error
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Number of state changes applied so far
    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    pub fn consecutive_disconnects(&self) -> u32 {
        self.consecutive_disconnects
    }

    pub fn pending_retry(&self) -> Option<Instant> {
        self.pending_retry
    }

    /// Apply a transport-reported state
    ///
    /// `error` is the transport's current connection error and only matters
    /// for `Disconnected`. Every call counts as one transition, even if the
    /// state did not change.
    pub fn on_state_changed(
        &mut self,
        state: ConnectionState,
        error: ConnectionError,
        now: Instant,
    ) -> RetryAction {
        let previous = self.state;
        self.state = state;
        self.transitions += 1;

        info!(
            from = %previous,
            to = %state,
            "Connection state changed"
        );

        match state {
            ConnectionState::Connected => {
                self.consecutive_disconnects = 0;
                self.pending_retry = None;
                self.last_error = ConnectionError::default();
                RetryAction::None
            }
            ConnectionState::Disconnected => self.on_disconnected(error, now),
            ConnectionState::Failed => {
                if !error.is_empty() {
                    self.last_error = error;
                }
                self.pending_retry = None;
                warn!(error = %self.last_error, "Connection failed");
                RetryAction::None
            }
            _ => {
                self.pending_retry = None;
                RetryAction::None
            }
        }
    }

    fn on_disconnected(&mut self, error: ConnectionError, now: Instant) -> RetryAction {
        let details = error.details.clone();
        if !error.is_empty() {
            warn!(error = %error, "Disconnected with error");
            self.last_error = error;
        }

        match details.reconnect_type {
            ReconnectionType::NoRetry => {
                warn!(
                    error_type = ?details.error_type,
                    "Service asked not to reconnect"
                );
                self.pending_retry = None;
                return RetryAction::None;
            }
            ReconnectionType::Immediate => {
                info!("Reconnecting immediately");
                self.pending_retry = None;
                return RetryAction::ResumeNow;
            }
            ReconnectionType::Timeout | ReconnectionType::Undefined => {}
        }

        if details.max_retries > 0 && self.consecutive_disconnects >= details.max_retries {
            warn!(
                attempts = self.consecutive_disconnects,
                max_retries = details.max_retries,
                "Reconnect attempts exhausted"
            );
            self.pending_retry = None;
            return RetryAction::None;
        }

        self.consecutive_disconnects += 1;
        if self.consecutive_disconnects == 1 {
            info!("First disconnect, resuming immediately");
            self.pending_retry = None;
            return RetryAction::ResumeNow;
        }

        let delay = self.policy.delay_after(self.consecutive_disconnects - 2);
        let deadline = now + delay;
        self.pending_retry = Some(deadline);
        info!(
            attempt = self.consecutive_disconnects,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnect"
        );
        RetryAction::ResumeAt(deadline)
    }

    /// Whether a scheduled retry is due; consumes it if so
    pub fn poll_retry(&mut self, now: Instant) -> bool {
        match self.pending_retry {
            Some(deadline) if now >= deadline => {
                self.pending_retry = None;
                debug!("Scheduled reconnect is due");
                true
            }
            _ => false,
        }
    }

    /// Drop any scheduled retry (explicit stop or pause)
    pub fn cancel_retry(&mut self) {
        if self.pending_retry.take().is_some() {
            debug!("Scheduled reconnect cancelled");
        }
    }

    /// Back to `Idle` with a clean backoff
    pub fn reset(&mut self) {
        self.state = ConnectionState::Idle;
        self.consecutive_disconnects = 0;
        self.pending_retry = None;
        self.last_error = ConnectionError::default();
    }
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new(BackoffPolicy::default())
    }
}

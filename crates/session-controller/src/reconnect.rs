//! Reconnection policy and retry state.
//!
//! After an abnormal disconnect the controller asks the
//! [`ReconnectionManager`] to schedule a rejoin. Each call to
//! [`ReconnectionManager::schedule`] increments the attempt counter first and
//! then arms a timer for [`RetryPolicy::delay_for`] that attempt. At most one
//! timer is pending at a time, and it can be cancelled at any point before it
//! fires (leave, dispose, a fresh join).
//!
//! The manager only owns counting and timing. What an attempt does, and how
//! its outcome feeds back (reset on success, schedule again on failure), is
//! decided by the caller.

use crate::config::ControllerConfig;
use crate::config::{
    DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_BASE_DELAY_MS, DEFAULT_RECONNECT_MAX_DELAY_MS,
};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_RECONNECT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_RECONNECT_MAX_DELAY_MS),
        }
    }
}

impl From<&ControllerConfig> for RetryPolicy {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            max_attempts: config.max_reconnect_attempts,
            base_delay: config.reconnect_base_delay,
            max_delay: config.reconnect_max_delay,
        }
    }
}

impl RetryPolicy {
    /// Delay before `attempt` (1-based): `min(base * 2^(attempt-1), max)`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Result of asking for another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// A timer is armed for `attempt`.
    Scheduled { attempt: u32, delay: Duration },
    /// The cap was reached; nothing was scheduled.
    Exhausted { attempts: u32 },
}

#[derive(Debug, Default)]
struct RetryState {
    attempt: u32,
    pending: Option<PendingTimer>,
    next_timer_id: u64,
}

#[derive(Debug)]
struct PendingTimer {
    id: u64,
    cancel: CancellationToken,
}

/// Attempt counter plus at most one cancellable pending timer.
#[derive(Debug)]
pub struct ReconnectionManager {
    policy: RetryPolicy,
    state: Arc<Mutex<RetryState>>,
}

impl ReconnectionManager {
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            state: Arc::new(Mutex::new(RetryState::default())),
        }
    }

    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Attempts made since the last reset.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .attempt
    }

    /// Whether a timer is armed and has not fired yet.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
            .is_some()
    }

    /// Cancel the pending timer, if any. The attempt counter is kept.
    pub fn cancel_pending(&self) {
        let pending = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
            .take();
        if let Some(timer) = pending {
            timer.cancel.cancel();
            debug!(target: "session.reconnect", timer_id = timer.id, "Pending reconnection cancelled");
        }
    }

    /// Cancel the pending timer and zero the attempt counter.
    pub fn reset(&self) {
        let pending = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.attempt = 0;
            state.pending.take()
        };
        if let Some(timer) = pending {
            timer.cancel.cancel();
        }
    }

    /// Count one more attempt and run `attempt_fn` after its backoff delay.
    ///
    /// Any timer still pending is replaced. `attempt_fn` receives the attempt
    /// number and is not called if the timer is cancelled first. Must be
    /// called from within a tokio runtime.
    pub fn schedule<F, Fut>(&self, attempt_fn: F) -> ScheduleOutcome
    where
        F: FnOnce(u32) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (attempt, delay, timer_id, cancel, replaced) = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.attempt >= self.policy.max_attempts {
                return ScheduleOutcome::Exhausted {
                    attempts: state.attempt,
                };
            }

            state.attempt += 1;
            state.next_timer_id += 1;
            let attempt = state.attempt;
            let timer_id = state.next_timer_id;
            let cancel = CancellationToken::new();
            let replaced = state.pending.replace(PendingTimer {
                id: timer_id,
                cancel: cancel.clone(),
            });
            (attempt, self.policy.delay_for(attempt), timer_id, cancel, replaced)
        };

        if let Some(old) = replaced {
            old.cancel.cancel();
        }

        info!(
            target: "session.reconnect",
            attempt,
            max_attempts = self.policy.max_attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Reconnection attempt scheduled"
        );

        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!(target: "session.reconnect", attempt, "Reconnection timer cancelled");
                }
                () = tokio::time::sleep(delay) => {
                    {
                        let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
                        if state.pending.as_ref().is_some_and(|p| p.id == timer_id) {
                            state.pending = None;
                        }
                    }
                    attempt_fn(attempt).await;
                }
            }
        });

        ScheduleOutcome::Scheduled { attempt, delay }
    }
}

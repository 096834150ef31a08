//! Metric recording functions.
//!
//! Naming follows Prometheus conventions:
//! - `session_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms

use crate::state::ConnectionStatus;
use metrics::{counter, histogram};
use std::time::Duration;

/// Record a connection state transition.
///
/// Metric: `session_state_transitions_total`
/// Labels: `to`
///
/// Cardinality: 5 (bounded by `ConnectionStatus`)
pub fn record_state_transition(to: ConnectionStatus) {
    counter!("session_state_transitions_total", "to" => to.as_str()).increment(1);
}

/// Record how long a join took, from request to outcome.
///
/// Metric: `session_join_duration_seconds`
/// Labels: `outcome` (success, error)
pub fn record_join_duration(outcome: &'static str, duration: Duration) {
    histogram!("session_join_duration_seconds", "outcome" => outcome)
        .record(duration.as_secs_f64());
}

/// Record the outcome of one reconnection attempt.
///
/// Metric: `session_reconnect_attempts_total`
/// Labels: `outcome` (success, failure, exhausted)
///
/// A growing `exhausted` count means sessions are ending in `failed`.
pub fn record_reconnect_attempt(outcome: &'static str) {
    counter!("session_reconnect_attempts_total", "outcome" => outcome).increment(1);
}

/// Record a state observer that panicked during delivery.
///
/// Metric: `session_subscriber_panics_total`
///
/// Any non-zero value indicates a bug in an observer.
pub fn record_subscriber_panic() {
    counter!("session_subscriber_panics_total").increment(1);
}

/// Record a credential endpoint request.
///
/// Metric: `session_token_requests_total`
/// Labels: `status` (success, auth_rejected, error)
pub fn record_token_request(status: &'static str) {
    counter!("session_token_requests_total", "status" => status).increment(1);
}

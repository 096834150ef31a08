//! Observability for the session controller.
//!
//! The library only records through the `metrics` facade; installing a
//! recorder/exporter is left to the embedding application.
//!
//! # Privacy by Default
//!
//! Public async operations use `#[instrument(skip_all)]` with explicitly
//! allow-listed fields. Identity proofs and channel tokens never reach a span,
//! log line or metric label. Labels are bounded:
//! - `to`: 5 values (connection statuses)
//! - `outcome`: success, error, failure, exhausted
//! - `status`: success, auth_rejected, error
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `session_state_transitions_total` | Counter | `to` | Connection state machine activity |
//! | `session_join_duration_seconds` | Histogram | `outcome` | Time from join request to connected |
//! | `session_reconnect_attempts_total` | Counter | `outcome` | Rejoin attempts after abnormal disconnect |
//! | `session_subscriber_panics_total` | Counter | none | Observer callbacks that panicked |
//! | `session_token_requests_total` | Counter | `status` | Credential endpoint calls |

pub mod metrics;

pub use metrics::{
    record_join_duration, record_reconnect_attempt, record_state_transition,
    record_subscriber_panic, record_token_request,
};

//! Session fixtures and state assertions.

use crate::mock_devices::FakeMediaDevices;
use crate::mock_token::MockTokenSource;
use crate::mock_transport::FakeTransport;
use common::types::{AppointmentId, UserId};
use session_controller::{
    ConnectionStatus, ParticipantRole, RetryPolicy, SessionConfig, SessionController, SessionState,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// A controller wired to fakes, with handles kept for assertions.
pub struct TestSession {
    pub controller: SessionController,
    pub transport: FakeTransport,
    pub devices: FakeMediaDevices,
    pub tokens: Arc<MockTokenSource>,
}

impl TestSession {
    /// Controller with the default retry policy (3 attempts, 1s base, 10s cap).
    pub fn new(transport: FakeTransport, devices: FakeMediaDevices, tokens: MockTokenSource) -> Self {
        Self::with_policy(transport, devices, tokens, RetryPolicy::default())
    }

    pub fn with_policy(
        transport: FakeTransport,
        devices: FakeMediaDevices,
        tokens: MockTokenSource,
        policy: RetryPolicy,
    ) -> Self {
        let tokens = Arc::new(tokens);
        let controller = SessionController::spawn(
            &transport.factory(),
            tokens.clone(),
            Arc::new(devices.clone()),
            policy,
        );
        Self {
            controller,
            transport,
            devices,
            tokens,
        }
    }

    /// Camera, microphone, accepting token source, succeeding transport.
    pub fn standard() -> Self {
        Self::new(
            FakeTransport::new(),
            FakeMediaDevices::new()
                .with_camera("cam-1")
                .with_microphone("mic-1"),
            MockTokenSource::accepting(),
        )
    }
}

/// Config for the client side of an appointment.
pub fn guest_config(appointment_id: &str) -> SessionConfig {
    SessionConfig::new(
        AppointmentId::new(appointment_id),
        UserId::new("client-1"),
        ParticipantRole::Guest,
    )
}

/// Config for the therapist side of an appointment.
pub fn host_config(appointment_id: &str) -> SessionConfig {
    SessionConfig::new(
        AppointmentId::new(appointment_id),
        UserId::new("therapist-1"),
        ParticipantRole::Host,
    )
}

/// Wait until the watched state reaches `status`.
///
/// Panics after a minute of (possibly paused) time.
pub async fn wait_for_status(
    rx: &mut watch::Receiver<SessionState>,
    status: ConnectionStatus,
) -> SessionState {
    let state = tokio::time::timeout(
        Duration::from_secs(60),
        rx.wait_for(|state| state.connection_status == status),
    )
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {status:?}"))
    .expect("state channel closed");
    state.clone()
}

/// Let spawned tasks run until they block.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Assert the participant count invariant.
pub fn assert_count_consistent(state: &SessionState) {
    assert!(
        state.count_is_consistent(),
        "participant_count {} does not match {} remote + {}",
        state.participant_count,
        state.remote_participants.len(),
        usize::from(state.is_connected())
    );
}

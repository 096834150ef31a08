//! Observable session state.
//!
//! [`SessionState`] is replaced wholesale on every change and handed to
//! observers by value; observers never mutate the controller's copy.

use common::types::RemoteUid;
use serde::Serialize;
use std::collections::BTreeMap;

/// Connection status of the local participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Initial state, and terminal after a clean leave.
    #[default]
    Disconnected,
    /// A join is in progress.
    Connecting,
    /// The local participant holds an active channel membership.
    Connected,
    /// Membership was lost unexpectedly and is being recovered.
    Reconnecting,
    /// Recovery gave up; terminal until the next explicit join.
    Failed,
}

impl ConnectionStatus {
    /// Metric/log label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Reconnecting => "reconnecting",
            ConnectionStatus::Failed => "failed",
        }
    }
}

/// Another party currently joined to the channel.
///
/// Mirrors what the transport reports; the transport owns the lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteParticipant {
    pub uid: RemoteUid,
    pub has_audio: bool,
    pub has_video: bool,
}

impl RemoteParticipant {
    #[must_use]
    pub fn new(uid: RemoteUid) -> Self {
        Self {
            uid,
            has_audio: false,
            has_video: false,
        }
    }
}

/// Snapshot of the session exposed to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionState {
    pub connection_status: ConnectionStatus,
    pub is_video_enabled: bool,
    pub is_audio_enabled: bool,
    pub remote_participants: BTreeMap<RemoteUid, RemoteParticipant>,
    /// Local (when connected) plus remote participants.
    pub participant_count: usize,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::initial()
    }
}

impl SessionState {
    /// The disconnected shape: no participants, media off.
    #[must_use]
    pub fn initial() -> Self {
        Self {
            connection_status: ConnectionStatus::Disconnected,
            is_video_enabled: false,
            is_audio_enabled: false,
            remote_participants: BTreeMap::new(),
            participant_count: 0,
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection_status == ConnectionStatus::Connected
    }

    /// Recompute `participant_count` from the remote set and status.
    pub fn recount(&mut self) {
        self.participant_count =
            self.remote_participants.len() + usize::from(self.is_connected());
    }

    /// Whether `participant_count` agrees with the remote set and status.
    #[must_use]
    pub fn count_is_consistent(&self) -> bool {
        self.participant_count == self.remote_participants.len() + usize::from(self.is_connected())
    }
}

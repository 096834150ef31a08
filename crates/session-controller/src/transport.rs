//! Real-time transport capability.
//!
//! The media transport is a third-party client whose wire protocol is opaque
//! to the controller. It is reached through [`RtcTransport`] and reports
//! channel activity as [`TransportEvent`]s on an unbounded channel handed out
//! at construction time, so events keep the order the transport emitted them.
//!
//! A [`TransportFactory`] decides whether a client can exist at all in the
//! current execution context. [`NoopTransportFactory`] never produces one and
//! is used where no real-time stack is present (server-side rendering, CLI
//! tooling, tests that only exercise state).

use crate::devices::{LocalTrack, MediaKind};
use async_trait::async_trait;
use common::secret::SecretString;
use common::types::{ChannelName, RemoteUid, UserId};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors reported by the transport client.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Channel join failed: {0}")]
    JoinFailed(String),

    #[error("Channel leave failed: {0}")]
    LeaveFailed(String),

    #[error("Track publish failed: {0}")]
    PublishFailed(String),

    #[error("Remote subscribe failed: {0}")]
    SubscribeFailed(String),

    /// No transport client exists in this execution context.
    #[error("Transport unavailable")]
    Unavailable,
}

/// Transport-native connection states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Disconnecting,
}

/// Why the transport reports a disconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The local participant left on purpose.
    Leave,
    NetworkError,
    ServerError,
    /// Removed from the channel by the service.
    Banned,
    Other(String),
}

impl DisconnectReason {
    #[must_use]
    pub fn is_intentional(&self) -> bool {
        matches!(self, DisconnectReason::Leave)
    }
}

/// Channel activity reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    UserJoined {
        uid: RemoteUid,
    },
    UserLeft {
        uid: RemoteUid,
    },
    UserPublished {
        uid: RemoteUid,
        kind: MediaKind,
    },
    UserUnpublished {
        uid: RemoteUid,
        kind: MediaKind,
    },
    ConnectionStateChanged {
        current: TransportConnectionState,
        previous: TransportConnectionState,
        reason: Option<DisconnectReason>,
    },
}

/// One channel client.
///
/// A client belongs to exactly one session controller and is never shared.
#[async_trait]
pub trait RtcTransport: Send + Sync {
    /// Join `channel` as `uid`, authorized by `token`.
    async fn join(
        &self,
        channel: &ChannelName,
        token: &SecretString,
        uid: &UserId,
    ) -> Result<(), TransportError>;

    /// Leave the current channel.
    async fn leave(&self) -> Result<(), TransportError>;

    async fn publish(&self, track: Arc<dyn LocalTrack>) -> Result<(), TransportError>;

    async fn unpublish(&self, track: Arc<dyn LocalTrack>) -> Result<(), TransportError>;

    /// Start receiving `kind` from a remote participant.
    async fn subscribe(&self, uid: &RemoteUid, kind: MediaKind) -> Result<(), TransportError>;
}

/// Creates the transport client for a controller.
pub trait TransportFactory: Send + Sync {
    /// Build a client that reports its events on `events`.
    ///
    /// Returns `None` when no real-time client can exist in this context.
    fn create(&self, events: mpsc::UnboundedSender<TransportEvent>)
        -> Option<Arc<dyn RtcTransport>>;
}

/// Factory for contexts without a real-time stack.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTransportFactory;

impl TransportFactory for NoopTransportFactory {
    fn create(
        &self,
        _events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Option<Arc<dyn RtcTransport>> {
        None
    }
}

impl fmt::Display for TransportConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TransportConnectionState::Disconnected => "DISCONNECTED",
            TransportConnectionState::Connecting => "CONNECTING",
            TransportConnectionState::Connected => "CONNECTED",
            TransportConnectionState::Reconnecting => "RECONNECTING",
            TransportConnectionState::Disconnecting => "DISCONNECTING",
        };
        f.write_str(label)
    }
}

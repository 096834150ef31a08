//! Session controller error types.
//!
//! Recoverable conditions (missing devices, transient disconnects) are
//! absorbed by the controller and only show up as state changes. The
//! variants here are what a caller sees from a rejected operation.

use crate::devices::MediaError;
use crate::token::TokenError;
use crate::transport::TransportError;
use thiserror::Error;

/// Caller-facing error type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// No valid identity proof, or the credential endpoint rejected it.
    /// Never retried automatically; the user has to sign in again.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The credential endpoint failed for a reason other than authentication.
    #[error("Credential unavailable: {0}")]
    CredentialUnavailable(String),

    /// The transport rejected a channel operation.
    #[error("Transport error: {0}")]
    Transport(String),

    /// No transport client exists in this execution context.
    #[error("Real-time transport unavailable")]
    TransportUnavailable,

    /// A requested media kind could not be captured.
    #[error("Media unavailable: {0}")]
    MediaUnavailable(String),

    /// Camera switching needs at least two video inputs.
    #[error("Camera switch needs at least 2 video inputs, found {found}")]
    InsufficientDevices { found: usize },

    /// The operation needs an active channel membership.
    #[error("Session is not connected")]
    NotConnected,

    /// A `leave` or `dispose` overtook this operation.
    #[error("Operation abandoned by leave or dispose")]
    Aborted,

    /// The controller has been disposed.
    #[error("Session controller disposed")]
    Disposed,
}

impl SessionError {
    /// Whether another attempt with the same inputs may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SessionError::Transport(_) | SessionError::CredentialUnavailable(_)
        )
    }

    /// Whether this error means the user must authenticate again.
    #[must_use]
    pub fn is_authentication(&self) -> bool {
        matches!(self, SessionError::Authentication(_))
    }

    /// Returns a message safe to show in the UI (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            SessionError::Authentication(_) => "Please sign in again to join the session".to_string(),
            SessionError::CredentialUnavailable(_)
            | SessionError::Transport(_)
            | SessionError::TransportUnavailable => {
                "Unable to connect to the session, please try again".to_string()
            }
            SessionError::MediaUnavailable(_) => {
                "Camera or microphone is not available".to_string()
            }
            SessionError::InsufficientDevices { .. } => {
                "No other camera is available".to_string()
            }
            SessionError::NotConnected => "You are not connected to the session".to_string(),
            SessionError::Aborted | SessionError::Disposed => "The session was closed".to_string(),
        }
    }
}

impl From<TokenError> for SessionError {
    fn from(err: TokenError) -> Self {
        if err.is_authentication() {
            SessionError::Authentication(err.to_string())
        } else {
            SessionError::CredentialUnavailable(err.to_string())
        }
    }
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Unavailable => SessionError::TransportUnavailable,
            other => SessionError::Transport(other.to_string()),
        }
    }
}

impl From<MediaError> for SessionError {
    fn from(err: MediaError) -> Self {
        SessionError::MediaUnavailable(err.to_string())
    }
}

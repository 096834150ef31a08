//! Identifier newtypes shared by the session crates.
//!
//! Identifiers coming from the booking side (appointments, users) are opaque
//! document-store keys, so they are carried as strings rather than UUIDs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix applied to every channel name derived from an appointment.
pub const CHANNEL_PREFIX: &str = "appt_";

/// Maximum channel name length accepted by the real-time transport.
pub const MAX_CHANNEL_NAME_LEN: usize = 64;

/// Identifier of a booked appointment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AppointmentId(pub String);

impl AppointmentId {
    /// Wrap an appointment identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppointmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of the local participant (the authenticated user).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    /// Wrap a user identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transport-assigned identifier of a remote participant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RemoteUid(pub String);

impl RemoteUid {
    /// Wrap a transport uid.
    #[must_use]
    pub fn new(uid: impl Into<String>) -> Self {
        Self(uid.into())
    }

    /// Borrow the raw uid.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of the real-time channel joined by every participant of one appointment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelName(String);

impl ChannelName {
    /// Derive the channel name for an appointment.
    ///
    /// The mapping is deterministic so both parties land in the same channel:
    /// the appointment id is prefixed with [`CHANNEL_PREFIX`], characters
    /// outside `[A-Za-z0-9_-]` become `_`, and the result is capped at
    /// [`MAX_CHANNEL_NAME_LEN`] bytes.
    #[must_use]
    pub fn for_appointment(appointment_id: &AppointmentId) -> Self {
        let sanitized = appointment_id.as_str().chars().map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        });

        let name: String = CHANNEL_PREFIX
            .chars()
            .chain(sanitized)
            .take(MAX_CHANNEL_NAME_LEN)
            .collect();

        Self(name)
    }

    /// Borrow the channel name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

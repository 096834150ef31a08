//! Media capture capabilities and device probing.
//!
//! The capture stack (browser `getUserMedia`, a native SDK, ...) is reached
//! through the [`MediaDevices`] and [`LocalTrack`] traits. [`DeviceProbe`]
//! takes a fresh inventory of inputs every time it is asked: hardware can be
//! unplugged or permissions revoked while a session is open, so nothing is
//! cached between operations.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Kind of local media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of an enumerated device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    VideoInput,
    AudioInput,
    AudioOutput,
}

/// One enumerated device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub device_id: String,
    pub label: String,
    pub kind: DeviceKind,
}

impl DeviceInfo {
    #[must_use]
    pub fn new(device_id: impl Into<String>, label: impl Into<String>, kind: DeviceKind) -> Self {
        Self {
            device_id: device_id.into(),
            label: label.into(),
            kind,
        }
    }
}

/// Errors from the capture stack.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MediaError {
    /// No input device of this kind is present.
    #[error("No {0} input device available")]
    NoDevice(MediaKind),

    /// The user or platform denied capture permission.
    #[error("Capture permission denied: {0}")]
    PermissionDenied(String),

    /// The device exists but capture could not start.
    #[error("Failed to create {kind} track: {reason}")]
    CreationFailed { kind: MediaKind, reason: String },

    /// Device enumeration itself failed.
    #[error("Device enumeration failed: {0}")]
    EnumerationFailed(String),

    /// Operation on a track that is already closed.
    #[error("Track already closed")]
    TrackClosed,

    /// Switching the capture device failed.
    #[error("Device switch failed: {0}")]
    SwitchFailed(String),
}

/// A captured local media stream.
///
/// Disabling a track mutes it without releasing the capture device.
#[async_trait]
pub trait LocalTrack: Send + Sync + fmt::Debug {
    fn kind(&self) -> MediaKind;

    /// Device currently feeding the track, if known.
    fn device_id(&self) -> Option<String>;

    fn is_enabled(&self) -> bool;

    async fn set_enabled(&self, enabled: bool) -> Result<(), MediaError>;

    /// Move capture to another device of the same kind.
    async fn switch_device(&self, device_id: &str) -> Result<(), MediaError>;

    /// Stop capture and release the device. Idempotent.
    fn close(&self);
}

/// Access to the platform's capture devices.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn enumerate(&self) -> Result<Vec<DeviceInfo>, MediaError>;

    /// Start capturing `kind`, from `device_id` or the platform default.
    async fn create_track(
        &self,
        kind: MediaKind,
        device_id: Option<&str>,
    ) -> Result<Arc<dyn LocalTrack>, MediaError>;
}

/// Input devices present at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceSnapshot {
    pub video_inputs: Vec<DeviceInfo>,
    pub audio_inputs: Vec<DeviceInfo>,
}

impl DeviceSnapshot {
    #[must_use]
    pub fn from_devices(devices: Vec<DeviceInfo>) -> Self {
        let mut snapshot = Self::default();
        for device in devices {
            match device.kind {
                DeviceKind::VideoInput => snapshot.video_inputs.push(device),
                DeviceKind::AudioInput => snapshot.audio_inputs.push(device),
                DeviceKind::AudioOutput => {}
            }
        }
        snapshot
    }

    #[must_use]
    pub fn inputs(&self, kind: MediaKind) -> &[DeviceInfo] {
        match kind {
            MediaKind::Video => &self.video_inputs,
            MediaKind::Audio => &self.audio_inputs,
        }
    }

    #[must_use]
    pub fn has(&self, kind: MediaKind) -> bool {
        !self.inputs(kind).is_empty()
    }
}

/// Reports which input devices exist before any capture is attempted.
#[derive(Clone)]
pub struct DeviceProbe {
    devices: Arc<dyn MediaDevices>,
}

impl fmt::Debug for DeviceProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceProbe").finish_non_exhaustive()
    }
}

impl DeviceProbe {
    #[must_use]
    pub fn new(devices: Arc<dyn MediaDevices>) -> Self {
        Self { devices }
    }

    /// The underlying capture stack.
    #[must_use]
    pub fn devices(&self) -> &Arc<dyn MediaDevices> {
        &self.devices
    }

    /// Enumerate input devices now.
    ///
    /// # Errors
    ///
    /// Returns `MediaError::EnumerationFailed` (or the platform's error) if
    /// the inventory cannot be taken.
    #[instrument(skip_all)]
    pub async fn snapshot(&self) -> Result<DeviceSnapshot, MediaError> {
        let snapshot = DeviceSnapshot::from_devices(self.devices.enumerate().await?);
        debug!(
            target: "session.devices",
            video_inputs = snapshot.video_inputs.len(),
            audio_inputs = snapshot.audio_inputs.len(),
            "Device snapshot taken"
        );
        Ok(snapshot)
    }

    /// Enumerate input devices, treating a failed enumeration as "none".
    ///
    /// Used on join, where missing hardware is an expected condition.
    pub async fn snapshot_or_empty(&self) -> DeviceSnapshot {
        match self.snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(
                    target: "session.devices",
                    error = %e,
                    "Device enumeration failed, continuing without local media"
                );
                DeviceSnapshot::default()
            }
        }
    }
}

//! Fake capture stack.
//!
//! ```rust,ignore
//! let devices = FakeMediaDevices::new()
//!     .with_camera("front")
//!     .with_camera("back")
//!     .with_microphone("mic");
//!
//! // Later: simulate a camera being unplugged
//! devices.remove_device("back");
//! ```

use async_trait::async_trait;
use session_controller::devices::DeviceKind;
use session_controller::{DeviceInfo, LocalTrack, MediaDevices, MediaError, MediaKind};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Captured track handed out by [`FakeMediaDevices`].
#[derive(Debug)]
pub struct FakeTrack {
    kind: MediaKind,
    device_id: Mutex<Option<String>>,
    enabled: AtomicBool,
    closed: AtomicBool,
}

impl FakeTrack {
    pub fn new(kind: MediaKind, device_id: Option<String>) -> Self {
        Self {
            kind,
            device_id: Mutex::new(device_id),
            enabled: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocalTrack for FakeTrack {
    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn device_id(&self) -> Option<String> {
        self.device_id.lock().unwrap().clone()
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    async fn set_enabled(&self, enabled: bool) -> Result<(), MediaError> {
        if self.is_closed() {
            return Err(MediaError::TrackClosed);
        }
        self.enabled.store(enabled, Ordering::SeqCst);
        Ok(())
    }

    async fn switch_device(&self, device_id: &str) -> Result<(), MediaError> {
        if self.is_closed() {
            return Err(MediaError::TrackClosed);
        }
        *self.device_id.lock().unwrap() = Some(device_id.to_string());
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct DevicesInner {
    devices: Vec<DeviceInfo>,
    failing_kinds: HashSet<MediaKind>,
    created: Vec<Arc<FakeTrack>>,
    create_delay: Option<Duration>,
    enumerate_delay: Option<Duration>,
}

/// Capture stack with a mutable device list.
#[derive(Clone, Default)]
pub struct FakeMediaDevices {
    inner: Arc<Mutex<DevicesInner>>,
    enumerations: Arc<AtomicUsize>,
}

impl FakeMediaDevices {
    /// No devices at all.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_camera(self, device_id: &str) -> Self {
        self.add_device(DeviceInfo::new(device_id, device_id, DeviceKind::VideoInput));
        self
    }

    pub fn with_microphone(self, device_id: &str) -> Self {
        self.add_device(DeviceInfo::new(device_id, device_id, DeviceKind::AudioInput));
        self
    }

    /// Capture of `kind` fails even though the device is listed.
    pub fn with_failing(self, kind: MediaKind) -> Self {
        self.inner.lock().unwrap().failing_kinds.insert(kind);
        self
    }

    /// Track creation takes `delay` of (tokio) time.
    pub fn with_create_delay(self, delay: Duration) -> Self {
        self.inner.lock().unwrap().create_delay = Some(delay);
        self
    }

    /// Device enumeration takes `delay` of (tokio) time.
    pub fn with_enumerate_delay(self, delay: Duration) -> Self {
        self.inner.lock().unwrap().enumerate_delay = Some(delay);
        self
    }

    pub fn add_device(&self, device: DeviceInfo) {
        self.inner.lock().unwrap().devices.push(device);
    }

    pub fn remove_device(&self, device_id: &str) {
        self.inner
            .lock()
            .unwrap()
            .devices
            .retain(|d| d.device_id != device_id);
    }

    /// Every track ever created for `kind`.
    pub fn created(&self, kind: MediaKind) -> Vec<Arc<FakeTrack>> {
        self.inner
            .lock()
            .unwrap()
            .created
            .iter()
            .filter(|t| t.kind == kind)
            .cloned()
            .collect()
    }

    /// Tracks of `kind` that were created and not closed yet.
    pub fn open_tracks(&self, kind: MediaKind) -> usize {
        self.created(kind).iter().filter(|t| !t.is_closed()).count()
    }

    pub fn enumeration_count(&self) -> usize {
        self.enumerations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaDevices for FakeMediaDevices {
    async fn enumerate(&self) -> Result<Vec<DeviceInfo>, MediaError> {
        self.enumerations.fetch_add(1, Ordering::SeqCst);
        let delay = self.inner.lock().unwrap().enumerate_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.inner.lock().unwrap().devices.clone())
    }

    async fn create_track(
        &self,
        kind: MediaKind,
        device_id: Option<&str>,
    ) -> Result<Arc<dyn LocalTrack>, MediaError> {
        let delay = self.inner.lock().unwrap().create_delay;
        match delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => tokio::task::yield_now().await,
        }

        let mut inner = self.inner.lock().unwrap();
        if inner.failing_kinds.contains(&kind) {
            return Err(MediaError::CreationFailed {
                kind,
                reason: "device busy".to_string(),
            });
        }

        let wanted = match kind {
            MediaKind::Video => DeviceKind::VideoInput,
            MediaKind::Audio => DeviceKind::AudioInput,
        };
        let device = match device_id {
            Some(id) => inner
                .devices
                .iter()
                .find(|d| d.kind == wanted && d.device_id == id),
            None => inner.devices.iter().find(|d| d.kind == wanted),
        }
        .map(|d| d.device_id.clone())
        .ok_or(MediaError::NoDevice(kind))?;

        let track = Arc::new(FakeTrack::new(kind, Some(device)));
        inner.created.push(Arc::clone(&track));
        Ok(track)
    }
}

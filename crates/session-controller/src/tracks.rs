//! Local track management.
//!
//! [`MediaTrackManager`] owns at most one [`LocalTrack`] per media kind. Each
//! kind has its own async slot lock, held across capture and publication, so
//! a toggle racing the join-time probe can never allocate a second track of
//! the same kind.
//!
//! Missing hardware is an expected condition: devices are enumerated before
//! capture is attempted, a kind with no input device is skipped, and a
//! failure for one kind never affects the other.

use crate::devices::{DeviceProbe, DeviceSnapshot, LocalTrack, MediaError, MediaKind};
use crate::errors::SessionError;
use crate::transport::RtcTransport;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

type TrackSlot = Mutex<Option<Arc<dyn LocalTrack>>>;

/// Which local media kinds ended up live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishedMedia {
    pub video: bool,
    pub audio: bool,
}

impl PublishedMedia {
    #[must_use]
    pub fn get(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Video => self.video,
            MediaKind::Audio => self.audio,
        }
    }
}

/// Creates, toggles, republishes and releases local tracks.
pub struct MediaTrackManager {
    probe: DeviceProbe,
    video: TrackSlot,
    audio: TrackSlot,
}

impl std::fmt::Debug for MediaTrackManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaTrackManager").finish_non_exhaustive()
    }
}

impl MediaTrackManager {
    #[must_use]
    pub fn new(probe: DeviceProbe) -> Self {
        Self {
            probe,
            video: Mutex::new(None),
            audio: Mutex::new(None),
        }
    }

    fn slot(&self, kind: MediaKind) -> &TrackSlot {
        match kind {
            MediaKind::Video => &self.video,
            MediaKind::Audio => &self.audio,
        }
    }

    /// The allocated track of `kind`, if any.
    pub async fn track(&self, kind: MediaKind) -> Option<Arc<dyn LocalTrack>> {
        self.slot(kind).lock().await.clone()
    }

    /// Take a fresh device snapshot, then capture and publish every kind that
    /// has an input device.
    ///
    /// Never fails: the outcome reports what was actually achieved.
    #[instrument(skip_all)]
    pub async fn probe_and_publish(&self, transport: &Arc<dyn RtcTransport>) -> PublishedMedia {
        let snapshot = self.probe.snapshot_or_empty().await;

        let (video, audio) = tokio::join!(
            self.acquire(MediaKind::Video, &snapshot, transport),
            self.acquire(MediaKind::Audio, &snapshot, transport),
        );

        info!(
            target: "session.tracks",
            video,
            audio,
            "Local media probed and published"
        );

        PublishedMedia { video, audio }
    }

    async fn acquire(
        &self,
        kind: MediaKind,
        snapshot: &DeviceSnapshot,
        transport: &Arc<dyn RtcTransport>,
    ) -> bool {
        let mut slot = self.slot(kind).lock().await;

        if let Some(track) = slot.as_ref() {
            // Created by a toggle that got here first
            return track.is_enabled();
        }

        if !snapshot.has(kind) {
            debug!(target: "session.tracks", kind = %kind, "No input device, skipping track");
            return false;
        }

        match self.create_and_publish(kind, transport).await {
            Ok(track) => {
                *slot = Some(track);
                true
            }
            Err(e) => {
                warn!(
                    target: "session.tracks",
                    kind = %kind,
                    error = %e,
                    "Continuing without local track"
                );
                false
            }
        }
    }

    async fn create_and_publish(
        &self,
        kind: MediaKind,
        transport: &Arc<dyn RtcTransport>,
    ) -> Result<Arc<dyn LocalTrack>, SessionError> {
        let track = self.probe.devices().create_track(kind, None).await?;

        if let Err(e) = transport.publish(Arc::clone(&track)).await {
            track.close();
            return Err(e.into());
        }

        debug!(
            target: "session.tracks",
            kind = %kind,
            device_id = track.device_id().as_deref().unwrap_or("default"),
            "Track created and published"
        );
        Ok(track)
    }

    /// Flip the enabled flag of the `kind` track, creating it on first use.
    ///
    /// First-time creation needs `transport` and `allow_create`; otherwise
    /// `SessionError::NotConnected` is returned. Returns the new enabled flag.
    ///
    /// # Errors
    ///
    /// `MediaUnavailable` when no device exists or capture fails,
    /// `Transport` when the new track cannot be published.
    #[instrument(skip_all, fields(kind = %kind))]
    pub async fn toggle(
        &self,
        kind: MediaKind,
        transport: Option<&Arc<dyn RtcTransport>>,
        allow_create: bool,
    ) -> Result<bool, SessionError> {
        let mut slot = self.slot(kind).lock().await;

        if let Some(track) = slot.as_ref() {
            let enabled = !track.is_enabled();
            track.set_enabled(enabled).await?;
            debug!(target: "session.tracks", enabled, "Track toggled");
            return Ok(enabled);
        }

        let transport = match transport {
            Some(transport) if allow_create => transport,
            _ => return Err(SessionError::NotConnected),
        };

        let snapshot = self.probe.snapshot().await?;
        if !snapshot.has(kind) {
            return Err(MediaError::NoDevice(kind).into());
        }

        let track = self.create_and_publish(kind, transport).await?;
        *slot = Some(track);
        info!(target: "session.tracks", "Track created on first enable");
        Ok(true)
    }

    /// Publish the tracks that are already allocated, without recreating them.
    ///
    /// A track that fails to publish is released.
    #[instrument(skip_all)]
    pub async fn republish(&self, transport: &Arc<dyn RtcTransport>) -> PublishedMedia {
        let mut outcome = PublishedMedia::default();

        for kind in [MediaKind::Video, MediaKind::Audio] {
            let mut slot = self.slot(kind).lock().await;
            let Some(track) = slot.clone() else {
                continue;
            };

            match transport.publish(Arc::clone(&track)).await {
                Ok(()) => {
                    let enabled = track.is_enabled();
                    match kind {
                        MediaKind::Video => outcome.video = enabled,
                        MediaKind::Audio => outcome.audio = enabled,
                    }
                }
                Err(e) => {
                    warn!(
                        target: "session.tracks",
                        kind = %kind,
                        error = %e,
                        "Republish failed, releasing track"
                    );
                    track.close();
                    *slot = None;
                }
            }
        }

        outcome
    }

    /// Move the video track to the next camera in enumeration order.
    ///
    /// Returns the selected device id.
    ///
    /// # Errors
    ///
    /// `InsufficientDevices` with fewer than two cameras, `MediaUnavailable`
    /// when no video track is allocated or the switch fails.
    #[instrument(skip_all)]
    pub async fn switch_camera(&self) -> Result<String, SessionError> {
        let snapshot = self.probe.snapshot().await?;
        let cameras = snapshot.inputs(MediaKind::Video);
        if cameras.len() < 2 {
            return Err(SessionError::InsufficientDevices {
                found: cameras.len(),
            });
        }

        let slot = self.slot(MediaKind::Video).lock().await;
        let track = slot
            .as_ref()
            .ok_or_else(|| SessionError::MediaUnavailable("no video track allocated".to_string()))?;

        let current = track.device_id();
        let next_index = current
            .as_deref()
            .and_then(|id| cameras.iter().position(|d| d.device_id == id))
            .map_or(0, |i| (i + 1) % cameras.len());
        let next = cameras
            .get(next_index)
            .ok_or(SessionError::InsufficientDevices {
                found: cameras.len(),
            })?;

        track.switch_device(&next.device_id).await?;

        info!(
            target: "session.tracks",
            from = current.as_deref().unwrap_or("default"),
            to = %next.device_id,
            "Camera switched"
        );
        Ok(next.device_id.clone())
    }

    /// Unpublish (when a transport is given), close and drop every track.
    #[instrument(skip_all)]
    pub async fn cleanup(&self, transport: Option<&Arc<dyn RtcTransport>>) {
        for kind in [MediaKind::Video, MediaKind::Audio] {
            let taken = self.slot(kind).lock().await.take();
            let Some(track) = taken else {
                continue;
            };

            if let Some(transport) = transport {
                if let Err(e) = transport.unpublish(Arc::clone(&track)).await {
                    debug!(
                        target: "session.tracks",
                        kind = %kind,
                        error = %e,
                        "Unpublish failed during cleanup"
                    );
                }
            }
            track.close();
            debug!(target: "session.tracks", kind = %kind, "Track released");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::devices::{DeviceInfo, DeviceKind, MediaDevices};
    use crate::transport::TransportError;
    use async_trait::async_trait;
    use common::secret::SecretString;
    use common::types::{ChannelName, RemoteUid, UserId};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    #[derive(Debug)]
    struct TestTrack {
        kind: MediaKind,
        device: StdMutex<Option<String>>,
        enabled: AtomicBool,
        closed: AtomicBool,
    }

    #[async_trait]
    impl LocalTrack for TestTrack {
        fn kind(&self) -> MediaKind {
            self.kind
        }

        fn device_id(&self) -> Option<String> {
            self.device.lock().unwrap().clone()
        }

        fn is_enabled(&self) -> bool {
            self.enabled.load(Ordering::SeqCst)
        }

        async fn set_enabled(&self, enabled: bool) -> Result<(), MediaError> {
            self.enabled.store(enabled, Ordering::SeqCst);
            Ok(())
        }

        async fn switch_device(&self, device_id: &str) -> Result<(), MediaError> {
            *self.device.lock().unwrap() = Some(device_id.to_string());
            Ok(())
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct TestDevices {
        devices: StdMutex<Vec<DeviceInfo>>,
        fail_video: bool,
        created: StdMutex<Vec<Arc<TestTrack>>>,
    }

    impl TestDevices {
        fn with(devices: Vec<DeviceInfo>) -> Self {
            Self {
                devices: StdMutex::new(devices),
                ..Self::default()
            }
        }

        fn created(&self, kind: MediaKind) -> Vec<Arc<TestTrack>> {
            self.created
                .lock()
                .unwrap()
                .iter()
                .filter(|t| t.kind == kind)
                .cloned()
                .collect()
        }
    }

    #[async_trait]
    impl MediaDevices for TestDevices {
        async fn enumerate(&self) -> Result<Vec<DeviceInfo>, MediaError> {
            Ok(self.devices.lock().unwrap().clone())
        }

        async fn create_track(
            &self,
            kind: MediaKind,
            _device_id: Option<&str>,
        ) -> Result<Arc<dyn LocalTrack>, MediaError> {
            if kind == MediaKind::Video && self.fail_video {
                return Err(MediaError::PermissionDenied("camera blocked".to_string()));
            }
            tokio::task::yield_now().await;
            let default_device = self
                .devices
                .lock()
                .unwrap()
                .iter()
                .find(|d| match kind {
                    MediaKind::Video => d.kind == DeviceKind::VideoInput,
                    MediaKind::Audio => d.kind == DeviceKind::AudioInput,
                })
                .map(|d| d.device_id.clone());
            let track = Arc::new(TestTrack {
                kind,
                device: StdMutex::new(default_device),
                enabled: AtomicBool::new(true),
                closed: AtomicBool::new(false),
            });
            self.created.lock().unwrap().push(Arc::clone(&track));
            Ok(track)
        }
    }

    #[derive(Default)]
    struct TestTransport {
        published: AtomicUsize,
        unpublished: AtomicUsize,
        fail_publish: AtomicBool,
    }

    #[async_trait]
    impl RtcTransport for TestTransport {
        async fn join(
            &self,
            _channel: &ChannelName,
            _token: &SecretString,
            _uid: &UserId,
        ) -> Result<(), TransportError> {
            Ok(())
        }

        async fn leave(&self) -> Result<(), TransportError> {
            Ok(())
        }

        async fn publish(&self, _track: Arc<dyn LocalTrack>) -> Result<(), TransportError> {
            if self.fail_publish.load(Ordering::SeqCst) {
                return Err(TransportError::PublishFailed("rejected".to_string()));
            }
            self.published.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn unpublish(&self, _track: Arc<dyn LocalTrack>) -> Result<(), TransportError> {
            self.unpublished.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn subscribe(&self, _uid: &RemoteUid, _kind: MediaKind) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn camera(id: &str) -> DeviceInfo {
        DeviceInfo::new(id, id, DeviceKind::VideoInput)
    }

    fn mic(id: &str) -> DeviceInfo {
        DeviceInfo::new(id, id, DeviceKind::AudioInput)
    }

    fn setup(devices: TestDevices) -> (Arc<TestDevices>, MediaTrackManager, Arc<TestTransport>) {
        let devices = Arc::new(devices);
        let manager = MediaTrackManager::new(DeviceProbe::new(Arc::clone(&devices) as Arc<dyn MediaDevices>));
        (devices, manager, Arc::new(TestTransport::default()))
    }

    fn as_dyn(transport: &Arc<TestTransport>) -> Arc<dyn RtcTransport> {
        Arc::clone(transport) as Arc<dyn RtcTransport>
    }

    #[tokio::test]
    async fn test_probe_publishes_available_kinds() {
        let (_, manager, transport) = setup(TestDevices::with(vec![camera("cam-1"), mic("mic-1")]));

        let outcome = manager.probe_and_publish(&as_dyn(&transport)).await;

        assert_eq!(outcome, PublishedMedia { video: true, audio: true });
        assert_eq!(transport.published.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_probe_without_camera_is_audio_only() {
        let (devices, manager, transport) = setup(TestDevices::with(vec![mic("mic-1")]));

        let outcome = manager.probe_and_publish(&as_dyn(&transport)).await;

        assert_eq!(outcome, PublishedMedia { video: false, audio: true });
        assert!(devices.created(MediaKind::Video).is_empty());
    }

    #[tokio::test]
    async fn test_video_creation_failure_does_not_block_audio() {
        let (_, manager, transport) = setup(TestDevices {
            fail_video: true,
            ..TestDevices::with(vec![camera("cam-1"), mic("mic-1")])
        });

        let outcome = manager.probe_and_publish(&as_dyn(&transport)).await;

        assert!(!outcome.video);
        assert!(outcome.audio);
        assert!(manager.track(MediaKind::Video).await.is_none());
    }

    #[tokio::test]
    async fn test_publish_failure_releases_track() {
        let (devices, manager, transport) = setup(TestDevices::with(vec![mic("mic-1")]));
        transport.fail_publish.store(true, Ordering::SeqCst);

        let outcome = manager.probe_and_publish(&as_dyn(&transport)).await;

        assert!(!outcome.audio);
        let created = devices.created(MediaKind::Audio);
        assert_eq!(created.len(), 1);
        assert!(created.iter().all(|t| t.closed.load(Ordering::SeqCst)));
        assert!(manager.track(MediaKind::Audio).await.is_none());
    }

    #[tokio::test]
    async fn test_toggle_flips_existing_track_without_recreating() {
        let (devices, manager, transport) = setup(TestDevices::with(vec![camera("cam-1")]));
        let transport = as_dyn(&transport);
        manager.probe_and_publish(&transport).await;

        assert!(!manager.toggle(MediaKind::Video, Some(&transport), true).await.unwrap());
        assert!(manager.toggle(MediaKind::Video, Some(&transport), true).await.unwrap());
        // Flipping also works while not connected
        assert!(!manager.toggle(MediaKind::Video, None, false).await.unwrap());

        assert_eq!(devices.created(MediaKind::Video).len(), 1);
    }

    #[tokio::test]
    async fn test_toggle_without_device_is_media_unavailable() {
        let (_, manager, transport) = setup(TestDevices::with(vec![mic("mic-1")]));

        let err = manager
            .toggle(MediaKind::Video, Some(&as_dyn(&transport)), true)
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::MediaUnavailable(_)));
    }

    #[tokio::test]
    async fn test_toggle_first_creation_requires_connection() {
        let (devices, manager, _) = setup(TestDevices::with(vec![camera("cam-1")]));

        let err = manager.toggle(MediaKind::Video, None, false).await.unwrap_err();

        assert_eq!(err, SessionError::NotConnected);
        assert!(devices.created(MediaKind::Video).is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_toggle_and_probe_create_one_track() {
        let (devices, manager, transport) = setup(TestDevices::with(vec![camera("cam-1")]));
        let transport = as_dyn(&transport);

        let (probe, toggle) = tokio::join!(
            manager.probe_and_publish(&transport),
            manager.toggle(MediaKind::Video, Some(&transport), true),
        );

        assert_eq!(devices.created(MediaKind::Video).len(), 1);
        // Whichever ran second saw the existing track
        assert!(probe.video || toggle.is_ok());
    }

    #[tokio::test]
    async fn test_republish_reuses_tracks() {
        let (devices, manager, transport) = setup(TestDevices::with(vec![camera("cam-1"), mic("mic-1")]));
        let transport_dyn = as_dyn(&transport);
        manager.probe_and_publish(&transport_dyn).await;
        manager.toggle(MediaKind::Audio, None, false).await.unwrap();

        let outcome = manager.republish(&transport_dyn).await;

        assert_eq!(outcome, PublishedMedia { video: true, audio: false });
        assert_eq!(transport.published.load(Ordering::SeqCst), 4);
        assert_eq!(devices.created(MediaKind::Video).len(), 1);
        assert_eq!(devices.created(MediaKind::Audio).len(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_unpublishes_and_closes() {
        let (devices, manager, transport) = setup(TestDevices::with(vec![camera("cam-1"), mic("mic-1")]));
        let transport_dyn = as_dyn(&transport);
        manager.probe_and_publish(&transport_dyn).await;

        manager.cleanup(Some(&transport_dyn)).await;

        assert_eq!(transport.unpublished.load(Ordering::SeqCst), 2);
        assert!(manager.track(MediaKind::Video).await.is_none());
        assert!(manager.track(MediaKind::Audio).await.is_none());
        assert!(devices
            .created
            .lock()
            .unwrap()
            .iter()
            .all(|t| t.closed.load(Ordering::SeqCst)));

        // Second cleanup is a no-op
        manager.cleanup(Some(&transport_dyn)).await;
        assert_eq!(transport.unpublished.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_switch_camera_cycles_in_enumeration_order() {
        let (_, manager, transport) = setup(TestDevices::with(vec![
            camera("cam-a"),
            mic("mic-1"),
            camera("cam-b"),
            camera("cam-c"),
        ]));
        manager.probe_and_publish(&as_dyn(&transport)).await;

        assert_eq!(manager.switch_camera().await.unwrap(), "cam-b");
        assert_eq!(manager.switch_camera().await.unwrap(), "cam-c");
        assert_eq!(manager.switch_camera().await.unwrap(), "cam-a");
    }

    #[tokio::test]
    async fn test_switch_camera_uses_fresh_enumeration() {
        let (devices, manager, transport) = setup(TestDevices::with(vec![camera("cam-a")]));
        manager.probe_and_publish(&as_dyn(&transport)).await;

        assert_eq!(
            manager.switch_camera().await.unwrap_err(),
            SessionError::InsufficientDevices { found: 1 }
        );

        devices.devices.lock().unwrap().push(camera("cam-usb"));
        assert_eq!(manager.switch_camera().await.unwrap(), "cam-usb");
    }

    #[tokio::test]
    async fn test_switch_camera_needs_a_video_track() {
        let (_, manager, _) = setup(TestDevices::with(vec![camera("cam-a"), camera("cam-b")]));

        assert!(matches!(
            manager.switch_camera().await,
            Err(SessionError::MediaUnavailable(_))
        ));
    }
}

//! Session controller.
//!
//! [`SessionController`] is the entry point the UI holds for one live call.
//! It is a cheap handle around shared state; clones refer to the same
//! session.
//!
//! # Lifecycle
//!
//! ```text
//! disconnected ──join──▶ connecting ──▶ connected ──leave──▶ disconnected
//!                                         │   ▲
//!                             abnormal    │   │ rejoin succeeds
//!                             disconnect  ▼   │
//!                                       reconnecting ──exhausted──▶ failed
//! ```
//!
//! `dispose` moves any state to `disconnected` and releases everything.
//!
//! # Concurrency
//!
//! - Transport events are drained by one event-pump task, in emission order.
//! - Join, the resource half of leave, reconnection attempts, toggles and
//!   camera switches run under an operation lock, so only one of them
//!   touches the transport and tracks at a time.
//! - `leave`/`dispose` bump a session epoch synchronously. An operation that
//!   resumes under a stale epoch stops with [`SessionError::Aborted`] and
//!   leaves resource release to the lock holder that follows it.
//! - Every state publication carries a version; observers never see an older
//!   state after a newer one.

use crate::broadcaster::{StateBroadcaster, Subscription};
use crate::config::SessionConfig;
use crate::devices::{DeviceProbe, MediaDevices, MediaKind};
use crate::errors::SessionError;
use crate::observability::metrics::{
    record_join_duration, record_reconnect_attempt, record_state_transition,
};
use crate::reconnect::{ReconnectionManager, RetryPolicy, ScheduleOutcome};
use crate::state::{ConnectionStatus, RemoteParticipant, SessionState};
use crate::token::TokenSource;
use crate::tracks::MediaTrackManager;
use crate::transport::{
    DisconnectReason, RtcTransport, TransportConnectionState, TransportEvent, TransportFactory,
};
use common::secret::SecretString;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Config and credential override of the session being held.
struct ActiveSession {
    config: SessionConfig,
    credential_override: Option<SecretString>,
}

struct Core {
    state: SessionState,
    version: u64,
    epoch: u64,
    session: Option<ActiveSession>,
    disposed: bool,
}

struct Inner {
    transport: Option<Arc<dyn RtcTransport>>,
    tokens: Arc<dyn TokenSource>,
    tracks: Arc<MediaTrackManager>,
    broadcaster: StateBroadcaster,
    reconnection: ReconnectionManager,
    core: Mutex<Core>,
    /// Whether the transport currently holds a channel membership for us.
    membership: Arc<AtomicBool>,
    op_lock: Arc<tokio::sync::Mutex<()>>,
    pump_cancel: CancellationToken,
    pump_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.reconnection.cancel_pending();
        // The pump releases tracks and membership on its way out
        self.pump_cancel.cancel();
    }
}

/// Handle to one real-time session.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.core();
        f.debug_struct("SessionController")
            .field("status", &core.state.connection_status)
            .field("epoch", &core.epoch)
            .field("disposed", &core.disposed)
            .finish_non_exhaustive()
    }
}

impl SessionController {
    /// Create a controller and start its event pump.
    ///
    /// The transport client is requested from `factory`; when it declines,
    /// every `join` fails with [`SessionError::TransportUnavailable`].
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(
        factory: &dyn TransportFactory,
        tokens: Arc<dyn TokenSource>,
        devices: Arc<dyn MediaDevices>,
        policy: RetryPolicy,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let transport = factory.create(events_tx);
        if transport.is_none() {
            info!(
                target: "session.controller",
                "No real-time transport in this context, joins will be rejected"
            );
        }

        let tracks = Arc::new(MediaTrackManager::new(DeviceProbe::new(devices)));
        let membership = Arc::new(AtomicBool::new(false));
        let op_lock = Arc::new(tokio::sync::Mutex::new(()));
        let pump_cancel = CancellationToken::new();

        let inner = Arc::new(Inner {
            transport: transport.clone(),
            tokens,
            tracks: Arc::clone(&tracks),
            broadcaster: StateBroadcaster::new(),
            reconnection: ReconnectionManager::new(policy),
            core: Mutex::new(Core {
                state: SessionState::initial(),
                version: 0,
                epoch: 0,
                session: None,
                disposed: false,
            }),
            membership: Arc::clone(&membership),
            op_lock: Arc::clone(&op_lock),
            pump_cancel: pump_cancel.clone(),
            pump_handle: Mutex::new(None),
        });

        let pump = EventPump {
            controller: Arc::downgrade(&inner),
            events: events_rx,
            cancel: pump_cancel,
            transport,
            tracks,
            membership,
            op_lock,
        };
        let handle = tokio::spawn(pump.run());
        *inner
            .pump_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);

        Self { inner }
    }

    fn core(&self) -> MutexGuard<'_, Core> {
        self.inner.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the state with a mutated copy and broadcast it.
    ///
    /// With `epoch` set, nothing happens unless that epoch is still current.
    /// Returns whether the state changed.
    fn apply<F>(&self, epoch: Option<u64>, mutate: F) -> Result<bool, SessionError>
    where
        F: FnOnce(&mut SessionState),
    {
        let (version, next, transition) = {
            let mut core = self.core();
            if core.disposed {
                return Err(SessionError::Disposed);
            }
            if epoch.is_some_and(|e| e != core.epoch) {
                return Err(SessionError::Aborted);
            }

            let mut next = core.state.clone();
            mutate(&mut next);
            next.recount();
            if next == core.state {
                return Ok(false);
            }

            let transition = (next.connection_status != core.state.connection_status)
                .then_some((core.state.connection_status, next.connection_status));
            core.version += 1;
            core.state = next.clone();
            (core.version, next, transition)
        };

        if let Some((from, to)) = transition {
            info!(
                target: "session.controller",
                from = from.as_str(),
                to = to.as_str(),
                participants = next.participant_count,
                "Session state transition"
            );
            record_state_transition(to);
        }

        self.inner.broadcaster.publish(version, &next);
        Ok(true)
    }

    /// `Aborted` if `epoch` is no longer current.
    fn ensure_current(&self, epoch: u64) -> Result<(), SessionError> {
        let core = self.core();
        if core.disposed || core.epoch != epoch {
            return Err(SessionError::Aborted);
        }
        Ok(())
    }

    /// Join the appointment's channel.
    ///
    /// Resolves once the local participant holds a channel membership and
    /// local tracks have been probed and published; missing devices do not
    /// fail the join. A session that is already active is left first. If the
    /// membership drops before local media is published, the join still
    /// resolves and the session continues in `reconnecting`.
    ///
    /// # Errors
    ///
    /// - `Authentication` / `CredentialUnavailable` if no credential is issued
    /// - `Transport` / `TransportUnavailable` if the channel cannot be joined
    /// - `Aborted` if `leave` or `dispose` overtook the join
    /// - `Disposed` after `dispose`
    #[instrument(skip_all, fields(
        appointment_id = %config.appointment_id(),
        role = config.role().as_str(),
    ))]
    pub async fn join(
        &self,
        config: SessionConfig,
        credential_override: Option<SecretString>,
    ) -> Result<(), SessionError> {
        let started = Instant::now();
        let result = self.join_inner(config, credential_override).await;

        let outcome = if result.is_ok() { "success" } else { "error" };
        record_join_duration(outcome, started.elapsed());

        match &result {
            Ok(()) => info!(target: "session.controller", "Joined session"),
            Err(e) => warn!(target: "session.controller", error = %e, "Join failed"),
        }
        result
    }

    async fn join_inner(
        &self,
        config: SessionConfig,
        credential_override: Option<SecretString>,
    ) -> Result<(), SessionError> {
        if self.is_disposed() {
            return Err(SessionError::Disposed);
        }
        let transport = self
            .inner
            .transport
            .clone()
            .ok_or(SessionError::TransportUnavailable)?;

        if self.current_state().connection_status != ConnectionStatus::Disconnected {
            debug!(target: "session.controller", "Session active, leaving before rejoin");
            self.leave().await;
        }

        let epoch = {
            let mut core = self.core();
            if core.disposed {
                return Err(SessionError::Disposed);
            }
            core.epoch += 1;
            core.session = Some(ActiveSession {
                config: config.clone(),
                credential_override: credential_override.clone(),
            });
            core.epoch
        };
        self.inner.reconnection.reset();
        self.apply(Some(epoch), |state| {
            *state = SessionState::initial();
            state.connection_status = ConnectionStatus::Connecting;
        })?;

        let _op = self.inner.op_lock.lock().await;
        self.ensure_current(epoch)?;

        let token = self
            .inner
            .tokens
            .fetch_token(
                config.channel_name(),
                config.user_id(),
                credential_override.as_ref(),
            )
            .await;
        self.ensure_current(epoch)?;
        let token = match token {
            Ok(token) => token,
            Err(e) => {
                self.abandon_join(epoch);
                return Err(e.into());
            }
        };

        let joined = transport
            .join(config.channel_name(), &token, config.user_id())
            .await;
        if let Err(e) = joined {
            self.ensure_current(epoch)?;
            self.abandon_join(epoch);
            return Err(e.into());
        }
        self.inner.membership.store(true, Ordering::SeqCst);
        // From here an overtaking leave/dispose releases the membership
        self.ensure_current(epoch)?;

        let media = self.inner.tracks.probe_and_publish(&transport).await;
        self.ensure_current(epoch)?;

        let membership = &self.inner.membership;
        let mut held = false;
        self.apply(Some(epoch), |state| {
            held = membership.load(Ordering::SeqCst);
            if held {
                state.connection_status = ConnectionStatus::Connected;
            }
            state.is_video_enabled = media.video;
            state.is_audio_enabled = media.audio;
        })?;
        if !held {
            warn!(
                target: "session.controller",
                "Membership lost while publishing local media, recovering"
            );
            self.begin_recovery(None);
        }
        Ok(())
    }

    /// Return a failed join to the initial shape.
    fn abandon_join(&self, epoch: u64) {
        {
            let mut core = self.core();
            if core.epoch != epoch {
                return;
            }
            core.session = None;
        }
        let _ = self.apply(Some(epoch), |state| *state = SessionState::initial());
    }

    /// Leave the channel and release local media. Idempotent and infallible.
    #[instrument(skip_all)]
    pub async fn leave(&self) {
        {
            let mut core = self.core();
            core.epoch += 1;
            core.session = None;
        }
        self.inner.reconnection.reset();
        let _ = self.apply(None, |state| *state = SessionState::initial());

        let _op = self.inner.op_lock.lock().await;
        release_resources(
            self.inner.transport.as_ref(),
            &self.inner.tracks,
            &self.inner.membership,
        )
        .await;
        debug!(target: "session.controller", "Leave complete");
    }

    /// Release everything: pending timers, subscribers, tracks, membership.
    ///
    /// Safe to call any number of times, including mid-join. Track and
    /// channel release finish asynchronously; await [`Self::wait_closed`] to
    /// observe completion.
    pub fn dispose(&self) {
        let published = {
            let mut core = self.core();
            if core.disposed {
                return;
            }
            core.disposed = true;
            core.epoch += 1;
            core.session = None;

            let initial = SessionState::initial();
            if core.state == initial {
                None
            } else {
                core.version += 1;
                core.state = initial.clone();
                Some((core.version, initial))
            }
        };

        self.inner.reconnection.reset();
        if let Some((version, state)) = published {
            record_state_transition(ConnectionStatus::Disconnected);
            self.inner.broadcaster.publish(version, &state);
        }
        self.inner.broadcaster.clear();
        self.inner.pump_cancel.cancel();

        info!(target: "session.controller", "Session controller disposed");
    }

    /// Wait until the event pump has released all resources after `dispose`.
    pub async fn wait_closed(&self) {
        let handle = self
            .inner
            .pump_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(target: "session.controller", error = %e, "Event pump task failed");
            }
        }
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.core().disposed
    }

    /// Synchronous snapshot of the current state.
    #[must_use]
    pub fn current_state(&self) -> SessionState {
        self.core().state.clone()
    }

    /// Register an observer for every subsequent state change.
    pub fn on_state_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SessionState) + Send + Sync + 'static,
    {
        self.inner.broadcaster.subscribe(callback)
    }

    /// Watch channel holding the latest published state.
    #[must_use]
    pub fn watch_state(&self) -> tokio::sync::watch::Receiver<SessionState> {
        self.inner.broadcaster.watch()
    }

    /// Reconnection attempts made since the last successful connection.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.reconnection.attempts()
    }

    /// Whether a reconnection attempt is waiting for its backoff to elapse.
    #[must_use]
    pub fn has_pending_reconnect(&self) -> bool {
        self.inner.reconnection.has_pending()
    }

    /// Enable or disable the camera. Returns the new video flag.
    ///
    /// # Errors
    ///
    /// `MediaUnavailable` if no camera can be captured, `NotConnected` if the
    /// track would have to be created outside a connected session.
    pub async fn toggle_video(&self) -> Result<bool, SessionError> {
        self.toggle(MediaKind::Video).await
    }

    /// Enable or disable the microphone. Returns the new audio flag.
    ///
    /// # Errors
    ///
    /// As for [`Self::toggle_video`].
    pub async fn toggle_audio(&self) -> Result<bool, SessionError> {
        self.toggle(MediaKind::Audio).await
    }

    #[instrument(skip_all, fields(kind = %kind))]
    async fn toggle(&self, kind: MediaKind) -> Result<bool, SessionError> {
        if self.is_disposed() {
            return Err(SessionError::Disposed);
        }

        let _op = self.inner.op_lock.lock().await;
        let (epoch, connected) = {
            let core = self.core();
            if core.disposed {
                return Err(SessionError::Disposed);
            }
            (core.epoch, core.state.is_connected())
        };

        let enabled = self
            .inner
            .tracks
            .toggle(kind, self.inner.transport.as_ref(), connected)
            .await?;

        self.apply(Some(epoch), |state| match kind {
            MediaKind::Video => state.is_video_enabled = enabled,
            MediaKind::Audio => state.is_audio_enabled = enabled,
        })?;
        Ok(enabled)
    }

    /// Move the camera to the next video input. Returns the device id.
    ///
    /// # Errors
    ///
    /// `InsufficientDevices` with fewer than two cameras, `MediaUnavailable`
    /// without a video track.
    pub async fn switch_camera(&self) -> Result<String, SessionError> {
        if self.is_disposed() {
            return Err(SessionError::Disposed);
        }
        let _op = self.inner.op_lock.lock().await;
        if self.is_disposed() {
            return Err(SessionError::Disposed);
        }
        self.inner.tracks.switch_camera().await
    }

    async fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::UserJoined { uid } => {
                self.update_remote(|state| {
                    state
                        .remote_participants
                        .entry(uid.clone())
                        .or_insert_with(|| RemoteParticipant::new(uid));
                });
            }
            TransportEvent::UserLeft { uid } => {
                self.update_remote(|state| {
                    state.remote_participants.remove(&uid);
                });
            }
            TransportEvent::UserPublished { uid, kind } => {
                if !accepts_remote_events(self.current_state().connection_status) {
                    return;
                }
                let Some(transport) = self.inner.transport.as_ref() else {
                    return;
                };
                if let Err(e) = transport.subscribe(&uid, kind).await {
                    warn!(
                        target: "session.controller",
                        uid = %uid,
                        kind = %kind,
                        error = %e,
                        "Failed to subscribe to remote media"
                    );
                    return;
                }
                self.update_remote(|state| {
                    let participant = state
                        .remote_participants
                        .entry(uid.clone())
                        .or_insert_with(|| RemoteParticipant::new(uid));
                    set_remote_media(participant, kind, true);
                });
            }
            TransportEvent::UserUnpublished { uid, kind } => {
                self.update_remote(|state| {
                    if let Some(participant) = state.remote_participants.get_mut(&uid) {
                        set_remote_media(participant, kind, false);
                    }
                });
            }
            TransportEvent::ConnectionStateChanged {
                current,
                previous,
                reason,
            } => self.on_connection_state(current, previous, reason).await,
        }
    }

    fn update_remote<F>(&self, mutate: F)
    where
        F: FnOnce(&mut SessionState),
    {
        let _ = self.apply(None, |state| {
            if accepts_remote_events(state.connection_status) {
                mutate(state);
            }
        });
    }

    async fn on_connection_state(
        &self,
        current: TransportConnectionState,
        previous: TransportConnectionState,
        reason: Option<DisconnectReason>,
    ) {
        let status = self.current_state().connection_status;
        debug!(
            target: "session.controller",
            current = %current,
            previous = %previous,
            reason = ?reason,
            status = status.as_str(),
            "Transport connection state changed"
        );

        match current {
            TransportConnectionState::Disconnected => {
                let intentional = reason.as_ref().is_some_and(DisconnectReason::is_intentional);
                let was_in_channel = matches!(
                    previous,
                    TransportConnectionState::Connected | TransportConnectionState::Reconnecting
                );
                // Same lock as `apply`: a join or rejoin publishing `connected`
                // either sees the loss or is seen by it
                let (status, lost_membership) = {
                    let core = self.core();
                    let lost = !intentional && self.inner.membership.swap(false, Ordering::SeqCst);
                    (core.state.connection_status, lost)
                };
                let holds_session = matches!(
                    status,
                    ConnectionStatus::Connected | ConnectionStatus::Reconnecting
                );

                if !holds_session {
                    if lost_membership {
                        debug!(
                            target: "session.controller",
                            status = status.as_str(),
                            "Membership lost before the session was established"
                        );
                    }
                    return;
                }
                if intentional {
                    info!(target: "session.controller", "Transport ended membership intentionally");
                    self.leave().await;
                } else if was_in_channel || lost_membership {
                    self.begin_recovery(reason);
                }
            }
            TransportConnectionState::Reconnecting => {
                if status == ConnectionStatus::Connected {
                    let _ = self.apply(None, |state| {
                        if state.connection_status == ConnectionStatus::Connected {
                            state.connection_status = ConnectionStatus::Reconnecting;
                        }
                    });
                }
            }
            TransportConnectionState::Connected => {
                let managed_cycle = self.inner.reconnection.attempts() > 0
                    || self.inner.reconnection.has_pending();
                if status == ConnectionStatus::Reconnecting && !managed_cycle {
                    let _ = self.apply(None, |state| {
                        if state.connection_status == ConnectionStatus::Reconnecting {
                            state.connection_status = ConnectionStatus::Connected;
                        }
                    });
                }
            }
            TransportConnectionState::Connecting | TransportConnectionState::Disconnecting => {}
        }
    }

    /// Membership was lost unexpectedly: drop remote state and start retrying.
    fn begin_recovery(&self, reason: Option<DisconnectReason>) {
        if self.inner.reconnection.attempts() > 0 || self.inner.reconnection.has_pending() {
            debug!(target: "session.controller", "Reconnection already in progress");
            return;
        }

        let epoch = {
            let core = self.core();
            if core.session.is_none() || core.disposed {
                return;
            }
            core.epoch
        };

        warn!(
            target: "session.controller",
            reason = ?reason,
            "Abnormal disconnect, starting reconnection"
        );
        self.inner.membership.store(false, Ordering::SeqCst);
        if self
            .apply(Some(epoch), |state| {
                state.connection_status = ConnectionStatus::Reconnecting;
                state.remote_participants.clear();
            })
            .is_err()
        {
            return;
        }

        if let ScheduleOutcome::Exhausted { attempts } = self.schedule_reconnect(epoch) {
            // Only reachable with a zero attempt cap
            warn!(target: "session.controller", attempts, "No reconnection attempts allowed");
            let controller = self.clone();
            tokio::spawn(async move {
                let _op = controller.inner.op_lock.lock().await;
                controller.fail_session(epoch).await;
            });
        }
    }

    fn schedule_reconnect(&self, epoch: u64) -> ScheduleOutcome {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        self.inner.reconnection.schedule(move |attempt| async move {
            if let Some(inner) = weak.upgrade() {
                SessionController { inner }
                    .run_reconnect_attempt(epoch, attempt)
                    .await;
            }
        })
    }

    #[instrument(skip_all, fields(attempt = attempt))]
    async fn run_reconnect_attempt(&self, epoch: u64, attempt: u32) {
        let _op = self.inner.op_lock.lock().await;

        let session = {
            let core = self.core();
            if core.disposed
                || core.epoch != epoch
                || core.state.connection_status != ConnectionStatus::Reconnecting
            {
                debug!(target: "session.controller", "Reconnection attempt no longer wanted");
                return;
            }
            core.session
                .as_ref()
                .map(|s| (s.config.clone(), s.credential_override.clone()))
        };
        let (Some((config, credential_override)), Some(transport)) =
            (session, self.inner.transport.clone())
        else {
            return;
        };

        info!(target: "session.controller", attempt, "Attempting to rejoin channel");

        let rejoined = self
            .rejoin(&transport, &config, credential_override.as_ref())
            .await;
        if self.ensure_current(epoch).is_err() {
            // The leave/dispose that overtook us releases the membership
            return;
        }

        let error = match rejoined {
            Ok(()) => {
                let media = self.inner.tracks.republish(&transport).await;
                let membership = &self.inner.membership;
                let reconnection = &self.inner.reconnection;
                let mut held = false;
                if self
                    .apply(Some(epoch), |state| {
                        held = membership.load(Ordering::SeqCst);
                        if held {
                            state.connection_status = ConnectionStatus::Connected;
                            state.is_video_enabled = media.video;
                            state.is_audio_enabled = media.audio;
                            // Under the core lock, so a disconnect handled
                            // right after starts a fresh cycle
                            reconnection.reset();
                        }
                    })
                    .is_err()
                {
                    return;
                }
                if held {
                    record_reconnect_attempt("success");
                    info!(target: "session.controller", attempt, "Reconnected");
                    return;
                }
                SessionError::Transport("membership lost before rejoin completed".to_string())
            }
            Err(e) => e,
        };

        match error {
            e if e.is_authentication() => {
                record_reconnect_attempt("failure");
                warn!(
                    target: "session.controller",
                    attempt,
                    error = %e,
                    "Credential rejected during reconnection, giving up"
                );
                self.fail_session(epoch).await;
            }
            e => {
                record_reconnect_attempt("failure");
                warn!(target: "session.controller", attempt, error = %e, "Reconnection attempt failed");
                if let ScheduleOutcome::Exhausted { attempts } = self.schedule_reconnect(epoch) {
                    record_reconnect_attempt("exhausted");
                    warn!(target: "session.controller", attempts, "Reconnection attempts exhausted");
                    self.fail_session(epoch).await;
                }
            }
        }
    }

    async fn rejoin(
        &self,
        transport: &Arc<dyn RtcTransport>,
        config: &SessionConfig,
        credential_override: Option<&SecretString>,
    ) -> Result<(), SessionError> {
        let token = self
            .inner
            .tokens
            .fetch_token(config.channel_name(), config.user_id(), credential_override)
            .await?;
        transport
            .join(config.channel_name(), &token, config.user_id())
            .await?;
        self.inner.membership.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Terminal failure: release local media and publish `failed`.
    ///
    /// Caller holds the operation lock.
    async fn fail_session(&self, epoch: u64) {
        if self.ensure_current(epoch).is_err() {
            return;
        }
        self.inner.reconnection.cancel_pending();
        self.inner.tracks.cleanup(None).await;

        {
            let mut core = self.core();
            if core.epoch == epoch {
                core.session = None;
            }
        }
        let _ = self.apply(Some(epoch), |state| {
            state.connection_status = ConnectionStatus::Failed;
            state.is_video_enabled = false;
            state.is_audio_enabled = false;
            state.remote_participants.clear();
        });
    }
}

fn accepts_remote_events(status: ConnectionStatus) -> bool {
    matches!(
        status,
        ConnectionStatus::Connecting | ConnectionStatus::Connected | ConnectionStatus::Reconnecting
    )
}

fn set_remote_media(participant: &mut RemoteParticipant, kind: MediaKind, present: bool) {
    match kind {
        MediaKind::Audio => participant.has_audio = present,
        MediaKind::Video => participant.has_video = present,
    }
}

/// Release local tracks, then the channel membership if one is held.
async fn release_resources(
    transport: Option<&Arc<dyn RtcTransport>>,
    tracks: &MediaTrackManager,
    membership: &AtomicBool,
) {
    tracks.cleanup(transport).await;
    if membership.swap(false, Ordering::SeqCst) {
        if let Some(transport) = transport {
            if let Err(e) = transport.leave().await {
                warn!(target: "session.controller", error = %e, "Transport leave failed");
            }
        }
    }
}

/// Drains transport events in order and performs the final release once
/// cancelled.
struct EventPump {
    controller: Weak<Inner>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    cancel: CancellationToken,
    transport: Option<Arc<dyn RtcTransport>>,
    tracks: Arc<MediaTrackManager>,
    membership: Arc<AtomicBool>,
    op_lock: Arc<tokio::sync::Mutex<()>>,
}

impl EventPump {
    async fn run(mut self) {
        debug!(target: "session.controller", "Event pump started");

        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    break;
                }

                event = self.events.recv() => {
                    let Some(event) = event else {
                        debug!(target: "session.controller", "Transport event channel closed");
                        // Resources are still released on dispose
                        self.cancel.cancelled().await;
                        break;
                    };
                    let Some(inner) = self.controller.upgrade() else {
                        break;
                    };
                    SessionController { inner }.handle_event(event).await;
                }
            }
        }

        let _op = self.op_lock.lock().await;
        release_resources(self.transport.as_ref(), &self.tracks, &self.membership).await;
        debug!(target: "session.controller", "Event pump stopped, resources released");
    }
}

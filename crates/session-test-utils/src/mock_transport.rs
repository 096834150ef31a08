//! Scriptable channel client.
//!
//! A [`FakeTransport`] records every call, returns scripted join results and
//! can hold joins open until the test releases them. Events are pushed to the
//! controller with [`FakeTransport::emit`].
//!
//! ```rust,ignore
//! let transport = FakeTransport::new()
//!     .with_join_results(vec![Ok(()), Err(TransportError::JoinFailed("ice".into()))]);
//! let controller = SessionController::spawn(&transport.factory(), ...);
//!
//! transport.emit(TransportEvent::UserJoined { uid: RemoteUid::new("42") });
//! transport.emit_abnormal_disconnect();
//! ```

use async_trait::async_trait;
use common::secret::{ExposeSecret, SecretString};
use common::types::{ChannelName, RemoteUid, UserId};
use session_controller::{
    DisconnectReason, LocalTrack, MediaKind, RtcTransport, TransportConnectionState, TransportError,
    TransportEvent, TransportFactory,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::Instant;

/// One recorded `join` call.
#[derive(Debug, Clone)]
pub struct JoinRecord {
    pub channel: String,
    pub uid: String,
    pub token: String,
    pub at: Instant,
}

#[derive(Default)]
struct TransportInner {
    join_results: VecDeque<Result<(), TransportError>>,
    joins: Vec<JoinRecord>,
    leaves: usize,
    in_channel: bool,
    published: Vec<MediaKind>,
    unpublished: Vec<MediaKind>,
    subscribed: Vec<(RemoteUid, MediaKind)>,
    fail_publish: bool,
    fail_subscribe: bool,
    publish_delay: Option<Duration>,
}

/// Fake real-time channel client.
#[derive(Clone)]
pub struct FakeTransport {
    inner: Arc<Mutex<TransportInner>>,
    events: Arc<Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>>,
    join_gate: Arc<Mutex<Option<watch::Receiver<bool>>>>,
    join_started: Arc<Notify>,
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeTransport {
    /// A transport whose joins all succeed.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(TransportInner::default())),
            events: Arc::new(Mutex::new(None)),
            join_gate: Arc::new(Mutex::new(None)),
            join_started: Arc::new(Notify::new()),
        }
    }

    /// Join results returned in order; `Ok(())` once exhausted.
    pub fn with_join_results(self, results: Vec<Result<(), TransportError>>) -> Self {
        self.inner.lock().unwrap().join_results = results.into();
        self
    }

    pub fn with_failing_publish(self) -> Self {
        self.inner.lock().unwrap().fail_publish = true;
        self
    }

    pub fn with_failing_subscribe(self) -> Self {
        self.inner.lock().unwrap().fail_subscribe = true;
        self
    }

    /// Every `publish` takes `delay` of (tokio) time.
    pub fn with_publish_delay(self, delay: Duration) -> Self {
        self.inner.lock().unwrap().publish_delay = Some(delay);
        self
    }

    /// Queue another join result.
    pub fn push_join_result(&self, result: Result<(), TransportError>) {
        self.inner.lock().unwrap().join_results.push_back(result);
    }

    /// Factory handing this transport to a controller.
    pub fn factory(&self) -> FakeTransportFactory {
        FakeTransportFactory {
            transport: self.clone(),
        }
    }

    /// Make every following `join` wait until the gate is released.
    pub fn hold_joins(&self) -> JoinGate {
        let (tx, rx) = watch::channel(false);
        *self.join_gate.lock().unwrap() = Some(rx);
        JoinGate { tx }
    }

    /// Wait until a `join` call has started.
    pub async fn join_started(&self) {
        self.join_started.notified().await;
    }

    /// Deliver an event to the controller.
    pub fn emit(&self, event: TransportEvent) {
        let events = self.events.lock().unwrap();
        let tx = events.as_ref().expect("transport not handed to a controller");
        tx.send(event).expect("controller event pump stopped");
    }

    /// Connection lost from a connected channel for a network reason.
    pub fn emit_abnormal_disconnect(&self) {
        self.inner.lock().unwrap().in_channel = false;
        self.emit(TransportEvent::ConnectionStateChanged {
            current: TransportConnectionState::Disconnected,
            previous: TransportConnectionState::Connected,
            reason: Some(DisconnectReason::NetworkError),
        });
    }

    pub fn joins(&self) -> Vec<JoinRecord> {
        self.inner.lock().unwrap().joins.clone()
    }

    pub fn join_count(&self) -> usize {
        self.inner.lock().unwrap().joins.len()
    }

    pub fn leave_count(&self) -> usize {
        self.inner.lock().unwrap().leaves
    }

    /// Whether the fake currently holds a channel membership.
    pub fn in_channel(&self) -> bool {
        self.inner.lock().unwrap().in_channel
    }

    pub fn published(&self) -> Vec<MediaKind> {
        self.inner.lock().unwrap().published.clone()
    }

    pub fn unpublished(&self) -> Vec<MediaKind> {
        self.inner.lock().unwrap().unpublished.clone()
    }

    pub fn subscribed(&self) -> Vec<(RemoteUid, MediaKind)> {
        self.inner.lock().unwrap().subscribed.clone()
    }
}

#[async_trait]
impl RtcTransport for FakeTransport {
    async fn join(
        &self,
        channel: &ChannelName,
        token: &SecretString,
        uid: &UserId,
    ) -> Result<(), TransportError> {
        self.inner.lock().unwrap().joins.push(JoinRecord {
            channel: channel.as_str().to_string(),
            uid: uid.as_str().to_string(),
            token: token.expose_secret().to_string(),
            at: Instant::now(),
        });
        self.join_started.notify_one();

        let gate = self.join_gate.lock().unwrap().clone();
        if let Some(mut gate) = gate {
            let _ = gate.wait_for(|open| *open).await;
        }

        let mut inner = self.inner.lock().unwrap();
        let result = inner.join_results.pop_front().unwrap_or(Ok(()));
        if result.is_ok() {
            inner.in_channel = true;
        }
        result
    }

    async fn leave(&self) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.leaves += 1;
        inner.in_channel = false;
        Ok(())
    }

    async fn publish(&self, track: Arc<dyn LocalTrack>) -> Result<(), TransportError> {
        let delay = self.inner.lock().unwrap().publish_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.inner.lock().unwrap();
        if inner.fail_publish {
            return Err(TransportError::PublishFailed("publish rejected".to_string()));
        }
        inner.published.push(track.kind());
        Ok(())
    }

    async fn unpublish(&self, track: Arc<dyn LocalTrack>) -> Result<(), TransportError> {
        self.inner.lock().unwrap().unpublished.push(track.kind());
        Ok(())
    }

    async fn subscribe(&self, uid: &RemoteUid, kind: MediaKind) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_subscribe {
            return Err(TransportError::SubscribeFailed("subscribe rejected".to_string()));
        }
        inner.subscribed.push((uid.clone(), kind));
        Ok(())
    }
}

/// Releases joins held by [`FakeTransport::hold_joins`].
pub struct JoinGate {
    tx: watch::Sender<bool>,
}

impl JoinGate {
    pub fn release(&self) {
        self.tx.send_replace(true);
    }
}

/// Hands a [`FakeTransport`] to the controller and wires up its events.
pub struct FakeTransportFactory {
    transport: FakeTransport,
}

impl TransportFactory for FakeTransportFactory {
    fn create(
        &self,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Option<Arc<dyn RtcTransport>> {
        *self.transport.events.lock().unwrap() = Some(events);
        Some(Arc::new(self.transport.clone()))
    }
}

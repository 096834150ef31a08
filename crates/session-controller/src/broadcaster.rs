//! State fan-out to observers.
//!
//! Every publication delivers the full [`SessionState`] to each subscribed
//! callback and to a `tokio::sync::watch` channel. Delivery iterates over a
//! snapshot of the subscriber list, so callbacks may subscribe or unsubscribe
//! (themselves or others) while being invoked. A callback removed during a
//! pass is skipped for the rest of that pass.
//!
//! A panicking callback is caught, logged and counted; the remaining
//! callbacks still receive the state. Isolation relies on unwinding, so it
//! does not apply to binaries built with `panic = "abort"`.

use crate::observability::metrics::record_subscriber_panic;
use crate::state::SessionState;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::watch;
use tracing::{debug, error};

/// Observer callback type.
pub type StateCallback = Arc<dyn Fn(&SessionState) + Send + Sync>;

#[derive(Clone)]
struct Subscriber {
    id: u64,
    active: Arc<AtomicBool>,
    callback: StateCallback,
}

struct Registry {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
    last_version: Mutex<u64>,
    watch_tx: watch::Sender<SessionState>,
}

impl Registry {
    fn remove(&self, id: u64) -> bool {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        before != subscribers.len()
    }
}

/// Broadcasts session state to every interested observer.
#[derive(Clone)]
pub struct StateBroadcaster {
    registry: Arc<Registry>,
}

impl Default for StateBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StateBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateBroadcaster")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl StateBroadcaster {
    #[must_use]
    pub fn new() -> Self {
        let (watch_tx, _) = watch::channel(SessionState::initial());
        Self {
            registry: Arc::new(Registry {
                subscribers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                last_version: Mutex::new(0),
                watch_tx,
            }),
        }
    }

    /// Register a callback. It receives every state published from now on.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SessionState) + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));

        self.registry
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscriber {
                id,
                active: Arc::clone(&active),
                callback: Arc::new(callback),
            });

        debug!(target: "session.broadcaster", subscriber_id = id, "Subscriber registered");

        Subscription {
            id,
            active,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// A watch receiver that always holds the latest published state.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.registry.watch_tx.subscribe()
    }

    /// Deliver `state` to every subscriber.
    ///
    /// `version` must increase with every state change; a publication whose
    /// version is not newer than the last delivered one is dropped so
    /// observers never move backwards. Returns the number of callbacks that
    /// completed without panicking.
    pub fn publish(&self, version: u64, state: &SessionState) -> usize {
        {
            let mut last = self
                .registry
                .last_version
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if version <= *last {
                debug!(
                    target: "session.broadcaster",
                    version,
                    last_delivered = *last,
                    "Dropping stale state publication"
                );
                return 0;
            }
            *last = version;
        }

        self.registry.watch_tx.send_replace(state.clone());

        let snapshot: Vec<Subscriber> = self
            .registry
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut delivered = 0;
        for subscriber in snapshot {
            if !subscriber.active.load(Ordering::Acquire) {
                continue;
            }

            let callback = &subscriber.callback;
            match catch_unwind(AssertUnwindSafe(|| callback(state))) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    error!(
                        target: "session.broadcaster",
                        subscriber_id = subscriber.id,
                        status = state.connection_status.as_str(),
                        "State subscriber panicked, continuing with remaining subscribers"
                    );
                    record_subscriber_panic();
                }
            }
        }

        delivered
    }

    /// Drop every subscriber.
    pub fn clear(&self) {
        let drained: Vec<Subscriber> = std::mem::take(
            &mut *self
                .registry
                .subscribers
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for subscriber in &drained {
            subscriber.active.store(false, Ordering::Release);
        }
        debug!(
            target: "session.broadcaster",
            removed = drained.len(),
            "Subscriber list cleared"
        );
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.registry
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Handle returned by [`StateBroadcaster::subscribe`].
///
/// Dropping the handle does not unsubscribe; call [`Subscription::unsubscribe`].
#[derive(Debug, Clone)]
pub struct Subscription {
    id: u64,
    active: Arc<AtomicBool>,
    registry: Weak<Registry>,
}

impl Subscription {
    /// Stop receiving state. Idempotent.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            if registry.remove(self.id) {
                debug!(target: "session.broadcaster", subscriber_id = self.id, "Subscriber removed");
            }
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::state::ConnectionStatus;
    use std::sync::atomic::AtomicUsize;

    fn connected() -> SessionState {
        let mut state = SessionState::initial();
        state.connection_status = ConnectionStatus::Connected;
        state.recount();
        state
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&SessionState) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let clone = Arc::clone(&count);
        (count, move |_: &SessionState| {
            clone.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_publish_reaches_every_subscriber_with_full_state() {
        let broadcaster = StateBroadcaster::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for _ in 0..3 {
            let seen = Arc::clone(&seen);
            let _ = broadcaster.subscribe(move |state| {
                seen.lock().unwrap().push(state.clone());
            });
        }

        let delivered = broadcaster.publish(1, &connected());
        assert_eq!(delivered, 3);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(seen.iter().all(|s| *s == connected()));
    }

    #[test]
    fn test_panicking_subscriber_is_isolated() {
        let broadcaster = StateBroadcaster::new();
        let (before, cb_before) = counter();
        let (after, cb_after) = counter();

        let _a = broadcaster.subscribe(cb_before);
        let _b = broadcaster.subscribe(|_| panic!("observer bug"));
        let _c = broadcaster.subscribe(cb_after);

        let delivered = broadcaster.publish(1, &connected());

        assert_eq!(delivered, 2);
        assert_eq!(before.load(Ordering::SeqCst), 1);
        assert_eq!(after.load(Ordering::SeqCst), 1);
        // The panicking subscriber stays registered
        assert_eq!(broadcaster.subscriber_count(), 3);
    }

    #[test]
    fn test_unsubscribe_self_during_publish() {
        let broadcaster = StateBroadcaster::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(AtomicUsize::new(0));
        let (other, cb_other) = counter();

        let slot_clone = Arc::clone(&slot);
        let calls_clone = Arc::clone(&calls);
        let sub = broadcaster.subscribe(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            if let Some(sub) = slot_clone.lock().unwrap().as_ref() {
                sub.unsubscribe();
            }
        });
        *slot.lock().unwrap() = Some(sub);
        let _other = broadcaster.subscribe(cb_other);

        broadcaster.publish(1, &connected());
        broadcaster.publish(2, &SessionState::initial());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(other.load(Ordering::SeqCst), 2);
        assert_eq!(broadcaster.subscriber_count(), 1);
    }

    #[test]
    fn test_unsubscribe_other_during_publish_skips_only_that_one() {
        let broadcaster = StateBroadcaster::new();
        let (victim_calls, cb_victim) = counter();
        let (tail_calls, cb_tail) = counter();
        let victim_slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let slot_clone = Arc::clone(&victim_slot);
        let _killer = broadcaster.subscribe(move |_| {
            if let Some(victim) = slot_clone.lock().unwrap().as_ref() {
                victim.unsubscribe();
            }
        });
        let victim = broadcaster.subscribe(cb_victim);
        *victim_slot.lock().unwrap() = Some(victim);
        let _tail = broadcaster.subscribe(cb_tail);

        broadcaster.publish(1, &connected());

        assert_eq!(victim_calls.load(Ordering::SeqCst), 0);
        assert_eq!(tail_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscribe_during_publish_starts_with_next_publication() {
        let broadcaster = StateBroadcaster::new();
        let (late, cb_late) = counter();
        let cb_late = Arc::new(Mutex::new(Some(cb_late)));

        let inner = broadcaster.clone();
        let _first = broadcaster.subscribe(move |_| {
            if let Some(cb) = cb_late.lock().unwrap().take() {
                let _ = inner.subscribe(cb);
            }
        });

        broadcaster.publish(1, &connected());
        assert_eq!(late.load(Ordering::SeqCst), 0);

        broadcaster.publish(2, &connected());
        assert_eq!(late.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stale_versions_are_dropped() {
        let broadcaster = StateBroadcaster::new();
        let (calls, cb) = counter();
        let _sub = broadcaster.subscribe(cb);

        assert_eq!(broadcaster.publish(5, &connected()), 1);
        assert_eq!(broadcaster.publish(4, &SessionState::initial()), 0);
        assert_eq!(broadcaster.publish(5, &SessionState::initial()), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*broadcaster.watch().borrow(), connected());
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let broadcaster = StateBroadcaster::new();
        let sub = broadcaster.subscribe(|_| {});
        assert!(sub.is_active());

        sub.unsubscribe();
        sub.unsubscribe();

        assert!(!sub.is_active());
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[test]
    fn test_clear_deactivates_handles() {
        let broadcaster = StateBroadcaster::new();
        let (calls, cb) = counter();
        let sub = broadcaster.subscribe(cb);

        broadcaster.clear();
        broadcaster.publish(1, &connected());

        assert!(!sub.is_active());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        // Unsubscribing after clear must not misbehave
        sub.unsubscribe();
    }

    #[tokio::test]
    async fn test_watch_receiver_observes_changes() {
        let broadcaster = StateBroadcaster::new();
        let mut rx = broadcaster.watch();
        assert_eq!(*rx.borrow(), SessionState::initial());

        broadcaster.publish(1, &connected());

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().connection_status, ConnectionStatus::Connected);
    }
}

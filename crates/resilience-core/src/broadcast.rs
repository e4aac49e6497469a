use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use tracing::{debug, trace, warn};

/// Handle returned by [`StateBroadcaster::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscriber<S> = Arc<dyn Fn(&S) + Send + Sync>;
type SignatureFn<S> = Box<dyn Fn(&S) -> String + Send + Sync>;

struct BroadcastInner<S: 'static> {
    last_signature: Option<String>,
    subscribers: Vec<(SubscriptionId, Subscriber<S>)>,
    next_id: u64,
}

/// Fans out state-change notifications, suppressing duplicate emissions.
///
/// The same logical state is often re-derived by independent triggers (a
/// backend listener and a locally restored session both resolving to
/// "authenticated as X"). A caller-supplied projection reduces each
/// candidate state to a signature; consecutive identical signatures are
/// dropped before any subscriber runs.
pub struct StateBroadcaster<S: 'static> {
    signature_of: SignatureFn<S>,
    inner: Mutex<BroadcastInner<S>>,
}

impl<S: 'static> StateBroadcaster<S> {
    /// Create a broadcaster with a signature projection over the salient
    /// fields of `S`. The last signature starts out unknown, so the first
    /// publish always emits.
    pub fn new<F>(signature_of: F) -> Self
    where
        F: Fn(&S) -> String + Send + Sync + 'static,
    {
        Self {
            signature_of: Box::new(signature_of),
            inner: Mutex::new(BroadcastInner {
                last_signature: None,
                subscribers: Vec::new(),
                next_id: 1,
            }),
        }
    }

    /// Register a subscriber. No ordering is guaranteed between
    /// subscribers.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&S) + Send + Sync + 'static,
    {
        let mut inner = self.lock();
        let id = SubscriptionId(inner.next_id);
        inner.next_id += 1;
        inner.subscribers.push((id, Arc::new(callback)));
        id
    }

    /// Remove a subscriber. Returns `false` when the id is unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.lock();
        let before = inner.subscribers.len();
        inner.subscribers.retain(|(sub_id, _)| *sub_id != id);
        inner.subscribers.len() != before
    }

    /// Publish a candidate state. Returns `true` when subscribers were
    /// invoked, `false` when the emission was suppressed as a duplicate.
    ///
    /// Subscriber panics are isolated so one failing subscriber cannot
    /// block the others or the publisher.
    pub fn publish(&self, state: &S) -> bool {
        let signature = (self.signature_of)(state);

        let subscribers: Vec<(SubscriptionId, Subscriber<S>)> = {
            let mut inner = self.lock();
            if inner.last_signature.as_deref() == Some(signature.as_str()) {
                trace!(%signature, "suppressing duplicate state emission");
                return false;
            }
            inner.last_signature = Some(signature.clone());
            inner.subscribers.clone()
        };

        debug!(
            %signature,
            subscribers = subscribers.len(),
            "broadcasting state change"
        );
        for (id, subscriber) in subscribers {
            if catch_unwind(AssertUnwindSafe(|| subscriber(state))).is_err() {
                warn!(subscriber_id = id.0, "state subscriber panicked; continuing");
            }
        }
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BroadcastInner<S>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::types::{session_signature, ProfileKind, SessionState};

    fn counting_broadcaster() -> (Arc<StateBroadcaster<SessionState>>, Arc<AtomicU32>) {
        let broadcaster = Arc::new(StateBroadcaster::new(session_signature));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_for_sub = Arc::clone(&calls);
        broadcaster.subscribe(move |_state| {
            calls_for_sub.fetch_add(1, Ordering::SeqCst);
        });
        (broadcaster, calls)
    }

    #[test]
    fn suppresses_back_to_back_duplicates() {
        let (broadcaster, calls) = counting_broadcaster();
        let state = SessionState::signed_in("u1", ProfileKind::Student);

        assert!(broadcaster.publish(&state));
        assert!(!broadcaster.publish(&state));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn emits_again_when_subject_changes() {
        let (broadcaster, calls) = counting_broadcaster();

        broadcaster.publish(&SessionState::signed_in("u1", ProfileKind::Student));
        broadcaster.publish(&SessionState::signed_in("u2", ProfileKind::Student));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn first_publish_always_emits() {
        let (broadcaster, calls) = counting_broadcaster();
        broadcaster.publish(&SessionState::signed_out());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_subscriber_does_not_block_others() {
        let broadcaster = StateBroadcaster::new(session_signature);
        let calls = Arc::new(AtomicU32::new(0));

        broadcaster.subscribe(|_state: &SessionState| panic!("subscriber bug"));
        let calls_for_sub = Arc::clone(&calls);
        broadcaster.subscribe(move |_state| {
            calls_for_sub.fetch_add(1, Ordering::SeqCst);
        });

        assert!(broadcaster.publish(&SessionState::signed_out()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribed_callbacks_stop_receiving() {
        let broadcaster = StateBroadcaster::new(session_signature);
        let calls = Arc::new(AtomicU32::new(0));
        let calls_for_sub = Arc::clone(&calls);
        let id = broadcaster.subscribe(move |_state: &SessionState| {
            calls_for_sub.fetch_add(1, Ordering::SeqCst);
        });

        broadcaster.publish(&SessionState::signed_out());
        assert!(broadcaster.unsubscribe(id));
        assert!(!broadcaster.unsubscribe(id));
        broadcaster.publish(&SessionState::signed_in("u1", ProfileKind::Parent));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

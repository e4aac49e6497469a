use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

/// Platform connectivity level reported by the host.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnectivityState {
    /// Requests are expected to reach the backend.
    Online,
    /// Requests are expected to fail; queue mutations for replay.
    Offline,
}

impl ConnectivityState {
    /// Stable lowercase label used in log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }
}

/// Host-driven signal surface consumed by the dispatcher.
///
/// The host fires readiness exactly once when the backend client is
/// constructed and authenticated, and flips connectivity as the platform
/// reports it. Both signals are level-triggered: repeated sets of the same
/// level do not re-fire.
#[derive(Debug, Clone)]
pub struct HostSignals {
    readiness_tx: watch::Sender<bool>,
    connectivity_tx: watch::Sender<ConnectivityState>,
}

impl HostSignals {
    /// Create a signal surface starting not-ready and online.
    pub fn new() -> Self {
        let (readiness_tx, _) = watch::channel(false);
        let (connectivity_tx, _) = watch::channel(ConnectivityState::Online);
        Self {
            readiness_tx,
            connectivity_tx,
        }
    }

    /// Fire the one-shot backend readiness signal.
    ///
    /// Returns `false` when readiness was already signalled.
    pub fn notify_ready(&self) -> bool {
        let fired = self.readiness_tx.send_if_modified(|ready| {
            if *ready {
                false
            } else {
                *ready = true;
                true
            }
        });
        debug!(fired, "backend readiness signalled");
        fired
    }

    /// Report a connectivity level. Returns `false` when the level did not
    /// change.
    pub fn set_connectivity(&self, state: ConnectivityState) -> bool {
        let changed = self.connectivity_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        debug!(state = state.as_str(), changed, "connectivity reported");
        changed
    }

    /// Subscribe to the readiness level.
    pub fn subscribe_readiness(&self) -> watch::Receiver<bool> {
        self.readiness_tx.subscribe()
    }

    /// Subscribe to connectivity transitions.
    pub fn subscribe_connectivity(&self) -> watch::Receiver<ConnectivityState> {
        self.connectivity_tx.subscribe()
    }
}

impl Default for HostSignals {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn readiness_fires_once() {
        let signals = HostSignals::new();
        let mut rx = signals.subscribe_readiness();
        assert!(!*rx.borrow_and_update());

        assert!(signals.notify_ready());
        rx.changed().await.expect("readiness change should arrive");
        assert!(*rx.borrow_and_update());

        assert!(!signals.notify_ready());
        assert!(!rx.has_changed().expect("channel should stay open"));
    }

    #[tokio::test]
    async fn duplicate_connectivity_levels_do_not_refire() {
        let signals = HostSignals::new();
        let mut rx = signals.subscribe_connectivity();
        assert_eq!(*rx.borrow_and_update(), ConnectivityState::Online);

        assert!(signals.set_connectivity(ConnectivityState::Offline));
        rx.changed().await.expect("offline change should arrive");
        assert_eq!(*rx.borrow_and_update(), ConnectivityState::Offline);

        assert!(!signals.set_connectivity(ConnectivityState::Offline));
        assert!(!rx.has_changed().expect("channel should stay open"));

        assert!(signals.set_connectivity(ConnectivityState::Online));
        rx.changed().await.expect("online change should arrive");
        assert_eq!(*rx.borrow_and_update(), ConnectivityState::Online);
    }
}

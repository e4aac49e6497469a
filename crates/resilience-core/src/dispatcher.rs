use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::broadcast::{StateBroadcaster, SubscriptionId};
use crate::error::{DispatchError, StoreError};
use crate::gate::{GateState, ReadinessGate};
use crate::replay::{DrainReport, MutationThunk, OfflineReplayQueue, PoisonedMutation, ReplayConfig};
use crate::retry::{self, RetryPolicy};
use crate::signal::{ConnectivityState, HostSignals};
use crate::types::{session_signature, OpKind, SessionState, DEFAULT_OP_TIMEOUT};

/// Dispatcher-wide tuning. Retry policies stay per call site and are not
/// part of this.
#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    /// Wait budget for operations deferred behind the readiness gate.
    pub default_op_timeout: Duration,
    /// Replay tuning for queued mutations.
    pub replay: ReplayConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            default_op_timeout: DEFAULT_OP_TIMEOUT,
            replay: ReplayConfig::default(),
        }
    }
}

/// What happened to a submitted mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome<T> {
    /// The mutation committed remotely.
    Committed(T),
    /// The mutation failed transiently and was queued for replay; it will
    /// commit when connectivity returns.
    Queued,
}

/// Single entry point UI code calls for any backend-dependent operation.
///
/// One instance per backend connection; all state (gate, queues, last
/// broadcast signature) lives inside and is reached through injection, not
/// ambient globals.
pub struct Dispatcher {
    gate: ReadinessGate,
    replay: OfflineReplayQueue,
    sessions: StateBroadcaster<SessionState>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        Self {
            gate: ReadinessGate::new(),
            replay: OfflineReplayQueue::new(config.replay),
            sessions: StateBroadcaster::new(session_signature),
            config,
        }
    }

    /// Install a handler for mutations that exhaust their replay budget.
    pub fn with_poison_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(PoisonedMutation) + Send + Sync + 'static,
    {
        self.replay = OfflineReplayQueue::new(self.config.replay).with_poison_handler(handler);
        self
    }

    /// Submit an operation with explicit kind, using the default wait
    /// budget. Runs immediately when the gate is open, defers otherwise.
    pub async fn submit<T, F, Fut>(&self, kind: OpKind, op: F) -> Result<T, DispatchError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, StoreError>> + Send + 'static,
        T: Send + 'static,
    {
        self.gate.submit(kind, self.config.default_op_timeout, op).await
    }

    /// Submit with a caller-chosen wait budget.
    pub async fn submit_with_timeout<T, F, Fut>(
        &self,
        kind: OpKind,
        timeout: Duration,
        op: F,
    ) -> Result<T, DispatchError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, StoreError>> + Send + 'static,
        T: Send + 'static,
    {
        self.gate.submit(kind, timeout, op).await
    }

    /// Submit an idempotent read with bounded retries and a degraded
    /// fallback. Transient exhaustion resolves with `fallback()`; only
    /// fatal failures and gate timeouts reject.
    pub async fn submit_read<T, F, Fut, FB>(
        &self,
        op: F,
        policy: RetryPolicy,
        fallback: FB,
    ) -> Result<T, DispatchError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, StoreError>> + Send + 'static,
        T: Send + 'static,
        FB: FnOnce() -> T + Send + 'static,
    {
        self.gate
            .submit(OpKind::Read, self.config.default_op_timeout, move || {
                retry::run(op, policy, fallback)
            })
            .await
    }

    /// Submit a mutation. A transient failure queues the mutation for
    /// replay and reports [`MutationOutcome::Queued`]; the caller is never
    /// told a local success and never sees a connectivity error. Fatal
    /// failures and gate timeouts reject as usual.
    pub async fn submit_mutation<T, F, Fut>(&self, op: F) -> Result<MutationOutcome<T>, DispatchError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, StoreError>> + Send + 'static,
        T: Send + 'static,
    {
        let op = Arc::new(op);
        let gate_op = Arc::clone(&op);
        let result = self
            .gate
            .submit(OpKind::Mutation, self.config.default_op_timeout, move || {
                (gate_op)()
            })
            .await;

        match result {
            Ok(value) => Ok(MutationOutcome::Committed(value)),
            Err(DispatchError::Store(error)) => {
                let replay_op = Arc::clone(&op);
                let thunk: MutationThunk = Arc::new(move || {
                    let fut = (replay_op)();
                    Box::pin(async move { fut.await.map(|_| ()) })
                });
                if self.replay.enqueue_if_transient(thunk, &error) {
                    Ok(MutationOutcome::Queued)
                } else {
                    Err(DispatchError::Store(error))
                }
            }
            Err(other) => Err(other),
        }
    }

    /// Open the readiness gate, dispatching deferred operations in
    /// submission order. Invoked from the host's backend-ready signal.
    pub fn open(&self) -> bool {
        self.gate.open()
    }

    /// Re-close the gate for a new backend connection, bumping the gate
    /// generation.
    pub fn reopen(&self) -> u64 {
        self.gate.reopen()
    }

    pub fn gate_state(&self) -> GateState {
        self.gate.state()
    }

    /// Operations currently parked behind the gate.
    pub fn pending_deferred(&self) -> usize {
        self.gate.pending()
    }

    /// Mutations currently queued for replay.
    pub fn queued_mutations(&self) -> usize {
        self.replay.len()
    }

    /// React to a host connectivity transition. `Online` drains the replay
    /// queue; `Offline` is recorded by the caller's signal surface only.
    pub async fn on_connectivity(&self, state: ConnectivityState) -> Option<DrainReport> {
        match state {
            ConnectivityState::Online => {
                debug!("connectivity restored; draining replay queue");
                Some(self.replay.drain().await)
            }
            ConnectivityState::Offline => {
                info!(queued = self.replay.len(), "connectivity lost; mutations will queue");
                None
            }
        }
    }

    /// Drain the replay queue now.
    pub async fn drain_replay(&self) -> DrainReport {
        self.replay.drain().await
    }

    /// Publish a candidate identity state; duplicates are suppressed.
    pub fn publish_session(&self, state: &SessionState) -> bool {
        self.sessions.publish(state)
    }

    /// Subscribe to deduplicated identity-state changes.
    pub fn subscribe_sessions<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&SessionState) + Send + Sync + 'static,
    {
        self.sessions.subscribe(callback)
    }

    pub fn unsubscribe_sessions(&self, id: SubscriptionId) -> bool {
        self.sessions.unsubscribe(id)
    }

    /// Spawn a driver task wiring host signals into this dispatcher:
    /// readiness opens the gate, `Online` drains the replay queue.
    pub fn attach_signals(self: &Arc<Self>, signals: &HostSignals) -> tokio::task::JoinHandle<()> {
        let dispatcher = Arc::clone(self);
        let mut ready_rx = signals.subscribe_readiness();
        let mut conn_rx = signals.subscribe_connectivity();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = ready_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        if *ready_rx.borrow_and_update() {
                            dispatcher.open();
                        }
                    }
                    changed = conn_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let state = *conn_rx.borrow_and_update();
                        dispatcher.on_connectivity(state).await;
                    }
                }
            }
            debug!("host signal driver exiting: signal channels closed");
        })
    }
}

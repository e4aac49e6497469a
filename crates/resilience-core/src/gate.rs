use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::oneshot;
use tokio::time;
use tracing::{debug, info, trace, warn};

use crate::error::{DispatchError, StoreError};
use crate::types::{OpKind, OperationId};

/// Binary readiness switch controlling whether operations run immediately
/// or queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    /// Backend connection not ready; submissions defer.
    NotReady,
    /// Backend connection ready; submissions run directly.
    Ready,
}

enum DeferredOutcome {
    Dispatch,
    TimedOut,
}

type ErasedOp = Box<dyn FnOnce(DeferredOutcome) -> BoxFuture<'static, ()> + Send>;

struct DeferredEntry {
    id: OperationId,
    kind: OpKind,
    submitted_at: time::Instant,
    run: ErasedOp,
}

struct GateInner {
    state: GateState,
    generation: u64,
    opened_at: Option<time::Instant>,
    next_id: u64,
    // Operations live in an id-keyed arena; the FIFO holds ids only.
    // A timeout removes the arena entry, leaving a tombstone the drain
    // step skips, so a timed-out operation can never execute late.
    arena: HashMap<OperationId, DeferredEntry>,
    fifo: VecDeque<OperationId>,
}

/// Readiness gate plus deferred operation queue.
///
/// Submissions made while `NotReady` are parked in enqueue order and
/// dispatched when [`ReadinessGate::open`] fires. Each parked operation
/// carries its own wait budget; if it elapses first, the caller is
/// rejected with [`DispatchError::Timeout`] and the operation is
/// tombstoned.
#[derive(Clone)]
pub struct ReadinessGate {
    inner: Arc<Mutex<GateInner>>,
}

impl ReadinessGate {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(GateInner {
                state: GateState::NotReady,
                generation: 0,
                opened_at: None,
                next_id: 1,
                arena: HashMap::new(),
                fifo: VecDeque::new(),
            })),
        }
    }

    pub fn state(&self) -> GateState {
        self.lock().state
    }

    /// Generation counter, bumped by [`ReadinessGate::reopen`].
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Instant of the most recent `NotReady -> Ready` transition.
    pub fn opened_at(&self) -> Option<time::Instant> {
        self.lock().opened_at
    }

    /// Number of operations currently parked behind the gate.
    pub fn pending(&self) -> usize {
        self.lock().arena.len()
    }

    /// Run `op` now if the gate is open, otherwise park it until
    /// [`ReadinessGate::open`] or its wait budget elapses.
    pub async fn submit<T, F, Fut>(
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
        // Deciding whether to run now or park must happen under one lock
        // acquisition, but the guard may not be held across an await (it is
        // not `Send`). Resolve the decision inside a block that releases the
        // guard, then await outside it. Carrying `op` out in the `RunNow`
        // variant keeps it from being called while the lock is held.
        enum Decision<F, T> {
            RunNow(F),
            Parked(oneshot::Receiver<Result<T, DispatchError>>, OperationId),
        }
        let decision = {
            // The state check and the park must share one lock acquisition, or
            // an open() in between would strand the entry.
            let mut inner = self.lock();
            match inner.state {
                GateState::Ready => Decision::RunNow(op),
                GateState::NotReady => {
                    let (tx, rx) = oneshot::channel::<Result<T, DispatchError>>();
                    let id = Self::park_locked(&mut inner, kind, timeout, tx, op);
                    Decision::Parked(rx, id)
                }
            }
        };
        match decision {
            Decision::RunNow(op) => op().await.map_err(DispatchError::from),
            Decision::Parked(rx, id) => {
                self.arm_timeout(id, timeout);
                match rx.await {
                    Ok(result) => result,
                    Err(_) => Err(DispatchError::Dropped { id }),
                }
            }
        }
    }

    /// Flip to `Ready` and dispatch surviving deferred operations strictly
    /// in enqueue order. Completion order is not constrained; each
    /// operation runs as its own task.
    ///
    /// Returns `false` when the gate was already open (no-op).
    pub fn open(&self) -> bool {
        let (entries, generation) = {
            let mut inner = self.lock();
            if inner.state == GateState::Ready {
                debug!(generation = inner.generation, "gate already open; ignoring");
                return false;
            }
            inner.state = GateState::Ready;
            inner.opened_at = Some(time::Instant::now());

            let ids: Vec<OperationId> = inner.fifo.drain(..).collect();
            let entries: Vec<DeferredEntry> = ids
                .into_iter()
                .filter_map(|id| inner.arena.remove(&id))
                .collect();
            (entries, inner.generation)
        };

        info!(
            generation,
            dispatching = entries.len(),
            "readiness gate opened"
        );
        for entry in entries {
            trace!(
                id = %entry.id,
                kind = entry.kind.as_str(),
                queued_ms = entry.submitted_at.elapsed().as_millis() as u64,
                "dispatching deferred operation"
            );
            // The thunk itself is invoked here, synchronously and in FIFO
            // order; only the resulting future runs concurrently.
            let fut = (entry.run)(DeferredOutcome::Dispatch);
            tokio::spawn(fut);
        }
        true
    }

    /// Return to `NotReady`, bumping the generation.
    ///
    /// Operation ids are never reused, so a timer armed in an earlier
    /// generation can only ever tombstone its own entry.
    pub fn reopen(&self) -> u64 {
        let mut inner = self.lock();
        inner.generation += 1;
        inner.state = GateState::NotReady;
        inner.opened_at = None;
        info!(generation = inner.generation, "gate re-closed for new backend connection");
        inner.generation
    }

    fn park_locked<T, F, Fut>(
        inner: &mut GateInner,
        kind: OpKind,
        timeout: Duration,
        tx: oneshot::Sender<Result<T, DispatchError>>,
        op: F,
    ) -> OperationId
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, StoreError>> + Send + 'static,
        T: Send + 'static,
    {
        let id = OperationId(inner.next_id);
        inner.next_id += 1;

        let timeout_ms = timeout.as_millis() as u64;
        let run: ErasedOp = Box::new(move |outcome| match outcome {
            DeferredOutcome::Dispatch => {
                let fut = op();
                Box::pin(async move {
                    let result = fut.await.map_err(DispatchError::from);
                    let _ = tx.send(result);
                })
            }
            DeferredOutcome::TimedOut => {
                let _ = tx.send(Err(DispatchError::Timeout { id, timeout_ms }));
                Box::pin(futures::future::ready(()))
            }
        });

        inner.arena.insert(
            id,
            DeferredEntry {
                id,
                kind,
                submitted_at: time::Instant::now(),
                run,
            },
        );
        inner.fifo.push_back(id);
        debug!(
            %id,
            kind = kind.as_str(),
            timeout_ms,
            queued = inner.fifo.len(),
            "deferring operation until backend is ready"
        );
        id
    }

    fn arm_timeout(&self, id: OperationId, timeout: Duration) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            time::sleep(timeout).await;
            let entry = {
                let mut inner = match inner.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                inner.arena.remove(&id)
            };
            if let Some(entry) = entry {
                warn!(%id, "deferred operation timed out before the gate opened");
                (entry.run)(DeferredOutcome::TimedOut).await;
            }
        });
    }

    fn lock(&self) -> MutexGuard<'_, GateInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    async fn settle() {
        // Let freshly spawned tasks reach their first await point.
        time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn runs_directly_when_gate_is_open() {
        let gate = ReadinessGate::new();
        gate.open();

        let result = gate
            .submit(OpKind::Read, Duration::from_secs(30), || async {
                Ok::<_, StoreError>("profile")
            })
            .await
            .expect("direct submit should resolve");

        assert_eq!(result, "profile");
        assert_eq!(gate.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dispatches_deferred_operations_in_submission_order() {
        let gate = ReadinessGate::new();
        let begun: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for n in 0..3u32 {
            let gate = gate.clone();
            let begun = Arc::clone(&begun);
            handles.push(tokio::spawn(async move {
                gate.submit(OpKind::Read, Duration::from_millis(1_000), move || {
                    begun.lock().expect("order lock").push(n);
                    async move { Ok::<_, StoreError>(n) }
                })
                .await
            }));
        }

        settle().await;
        assert_eq!(gate.pending(), 3);
        assert!(gate.open());

        for (n, handle) in handles.into_iter().enumerate() {
            let value = handle
                .await
                .expect("task should not panic")
                .expect("deferred op should resolve");
            assert_eq!(value, n as u32);
        }
        assert_eq!(*begun.lock().expect("order lock"), vec![0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_operation_rejects_caller_and_never_runs() {
        let gate = ReadinessGate::new();
        let executed = Arc::new(AtomicBool::new(false));
        let executed_probe = Arc::clone(&executed);

        let gate_for_task = gate.clone();
        let handle = tokio::spawn(async move {
            gate_for_task
                .submit(OpKind::Read, Duration::from_millis(100), move || {
                    executed_probe.store(true, Ordering::SeqCst);
                    async { Ok::<_, StoreError>(()) }
                })
                .await
        });

        settle().await;
        time::advance(Duration::from_millis(150)).await;

        let err = handle
            .await
            .expect("task should not panic")
            .expect_err("caller must see a timeout");
        assert!(matches!(err, DispatchError::Timeout { timeout_ms: 100, .. }));

        // Opening afterwards must neither re-settle the caller nor run the op.
        assert!(gate.open());
        settle().await;
        assert!(!executed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn open_at_500ms_beats_1s_timeouts_but_not_a_100ms_one() {
        let gate = ReadinessGate::new();
        let mut survivors = Vec::new();
        for n in 0..3u32 {
            let gate = gate.clone();
            survivors.push(tokio::spawn(async move {
                gate.submit(OpKind::Read, Duration::from_millis(1_000), move || async move {
                    Ok::<_, StoreError>(n)
                })
                .await
            }));
        }
        let gate_for_short = gate.clone();
        let short = tokio::spawn(async move {
            gate_for_short
                .submit(OpKind::Read, Duration::from_millis(100), || async {
                    Ok::<_, StoreError>(99)
                })
                .await
        });

        settle().await;
        time::advance(Duration::from_millis(500)).await;
        gate.open();

        for (n, handle) in survivors.into_iter().enumerate() {
            let value = handle
                .await
                .expect("task should not panic")
                .expect("survivor should resolve");
            assert_eq!(value, n as u32);
        }
        let err = short
            .await
            .expect("task should not panic")
            .expect_err("short-budget op must time out");
        assert!(matches!(err, DispatchError::Timeout { timeout_ms: 100, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn second_open_is_a_no_op() {
        let gate = ReadinessGate::new();
        assert!(gate.open());
        assert!(!gate.open());
    }

    #[tokio::test(start_paused = true)]
    async fn reopen_bumps_generation_and_defers_again() {
        let gate = ReadinessGate::new();
        gate.open();
        assert_eq!(gate.generation(), 0);
        assert!(gate.opened_at().is_some());

        assert_eq!(gate.reopen(), 1);
        assert_eq!(gate.state(), GateState::NotReady);
        assert!(gate.opened_at().is_none());

        let gate_for_task = gate.clone();
        let handle = tokio::spawn(async move {
            gate_for_task
                .submit(OpKind::Mutation, Duration::from_secs(30), || async {
                    Ok::<_, StoreError>("saved")
                })
                .await
        });

        settle().await;
        assert_eq!(gate.pending(), 1);
        assert!(gate.open());
        let value = handle
            .await
            .expect("task should not panic")
            .expect("reopened gate should dispatch");
        assert_eq!(value, "saved");
    }

    #[tokio::test(start_paused = true)]
    async fn deferred_operation_failure_propagates_to_caller() {
        let gate = ReadinessGate::new();
        let gate_for_task = gate.clone();
        let handle = tokio::spawn(async move {
            gate_for_task
                .submit(OpKind::Read, Duration::from_secs(30), || async {
                    Err::<(), _>(StoreError::permission_denied("no grant"))
                })
                .await
        });

        settle().await;
        gate.open();
        let err = handle
            .await
            .expect("task should not panic")
            .expect_err("op error must propagate");
        assert!(matches!(err, DispatchError::Store(e) if e.code == "permission-denied"));
    }
}

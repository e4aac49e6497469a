use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{classify, ErrorClass, StoreError};

/// Type-erased mutation thunk held for replay.
///
/// The mutation's own result was already reported to its caller as
/// "queued"; replay only needs commit-or-fail.
pub type MutationThunk = Arc<dyn Fn() -> BoxFuture<'static, Result<(), StoreError>> + Send + Sync>;

/// Replay tuning for queued mutations.
#[derive(Debug, Clone, Copy)]
pub struct ReplayConfig {
    max_attempts: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
}

impl ReplayConfig {
    pub fn new(max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(2),
            base_delay_ms,
            max_delay_ms,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Exponential backoff between replay passes: `base * 2^(attempts-1)`,
    /// capped.
    fn delay_for(&self, attempts: u32) -> Duration {
        let shift = attempts.saturating_sub(1).min(20);
        let calculated = self.base_delay_ms.saturating_mul(1_u64 << shift);
        Duration::from_millis(calculated.min(self.max_delay_ms))
    }
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self::new(8, 1_000, 60_000)
    }
}

/// Terminal record surfaced to the host when a mutation exhausts its
/// replay budget.
#[derive(Debug, Clone)]
pub struct PoisonedMutation {
    /// Queue-local entry identifier.
    pub entry_id: u64,
    /// Total failed executions, the original submission included.
    pub attempts: u32,
    /// Error from the final attempt.
    pub last_error: StoreError,
}

type PoisonHandler = Arc<dyn Fn(PoisonedMutation) + Send + Sync>;

struct QueueEntry {
    entry_id: u64,
    thunk: MutationThunk,
    attempts: u32,
    last_error: StoreError,
    not_before: Option<Instant>,
}

struct ReplayInner {
    queue: VecDeque<QueueEntry>,
    draining: bool,
    next_id: u64,
}

/// Outcome summary of one [`OfflineReplayQueue::drain`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Entries that committed and left the queue.
    pub committed: usize,
    /// Entries that failed again and were re-queued for a later pass.
    pub requeued: usize,
    /// Entries that exhausted their budget and were surfaced as poison.
    pub poisoned: usize,
    /// Entries still inside their backoff window, held without execution.
    pub held: usize,
    /// `true` when the call found a drain already in progress and did
    /// nothing.
    pub reentrant: bool,
}

/// Holds mutation thunks that failed due to connectivity and replays them
/// when connectivity returns.
///
/// Entries are replayed strictly sequentially in enqueue order so a
/// "create" commits before a dependent "update". A drain pass works on a
/// snapshot; mutations queued while the pass runs form the next pass.
#[derive(Clone)]
pub struct OfflineReplayQueue {
    config: ReplayConfig,
    inner: Arc<Mutex<ReplayInner>>,
    on_poison: Option<PoisonHandler>,
}

impl OfflineReplayQueue {
    pub fn new(config: ReplayConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(ReplayInner {
                queue: VecDeque::new(),
                draining: false,
                next_id: 1,
            })),
            on_poison: None,
        }
    }

    /// Install a handler invoked once per poisoned entry.
    pub fn with_poison_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(PoisonedMutation) + Send + Sync + 'static,
    {
        self.on_poison = Some(Arc::new(handler));
        self
    }

    /// Number of entries currently queued.
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queue a failed mutation for replay iff its error classifies as
    /// transient. Fatal errors never enter the queue; the caller keeps
    /// them.
    pub fn enqueue_if_transient(&self, thunk: MutationThunk, error: &StoreError) -> bool {
        if classify(error) == ErrorClass::Fatal {
            debug!(code = %error.code, "mutation failed fatally; not queueing");
            return false;
        }

        let mut inner = self.lock();
        let entry_id = inner.next_id;
        inner.next_id += 1;
        inner.queue.push_back(QueueEntry {
            entry_id,
            thunk,
            // The enqueueing execution already failed once.
            attempts: 1,
            last_error: error.clone(),
            not_before: None,
        });
        info!(
            entry_id,
            code = %error.code,
            queued = inner.queue.len(),
            "mutation queued for offline replay"
        );
        true
    }

    /// Replay queued mutations, strictly sequentially in enqueue order.
    ///
    /// Re-entrant calls (a drain triggered while one is running) return
    /// immediately with `reentrant = true` so no entry is processed twice.
    pub async fn drain(&self) -> DrainReport {
        let snapshot = {
            let mut inner = self.lock();
            if inner.draining {
                debug!("replay drain already in progress; skipping");
                return DrainReport {
                    reentrant: true,
                    ..DrainReport::default()
                };
            }
            inner.draining = true;
            std::mem::take(&mut inner.queue)
        };

        let mut report = DrainReport::default();
        // Entries retained for a later pass, in snapshot order. Appended
        // after the live queue so they land behind anything enqueued fresh
        // while this pass ran.
        let mut carry: Vec<QueueEntry> = Vec::new();
        let pass_start = Instant::now();

        for mut entry in snapshot {
            if entry.not_before.is_some_and(|t| t > pass_start) {
                report.held += 1;
                carry.push(entry);
                continue;
            }

            match (entry.thunk)().await {
                Ok(()) => {
                    report.committed += 1;
                    debug!(entry_id = entry.entry_id, attempts = entry.attempts, "queued mutation committed");
                }
                Err(error) => {
                    entry.attempts += 1;
                    entry.last_error = error;
                    if entry.attempts >= self.config.max_attempts {
                        report.poisoned += 1;
                        warn!(
                            entry_id = entry.entry_id,
                            attempts = entry.attempts,
                            code = %entry.last_error.code,
                            "mutation exhausted replay budget; surfacing as poison"
                        );
                        if let Some(handler) = &self.on_poison {
                            handler(PoisonedMutation {
                                entry_id: entry.entry_id,
                                attempts: entry.attempts,
                                last_error: entry.last_error.clone(),
                            });
                        }
                    } else {
                        report.requeued += 1;
                        entry.not_before = Some(Instant::now() + self.config.delay_for(entry.attempts));
                        debug!(
                            entry_id = entry.entry_id,
                            attempts = entry.attempts,
                            code = %entry.last_error.code,
                            "queued mutation failed again; retaining"
                        );
                        carry.push(entry);
                    }
                }
            }
        }

        {
            let mut inner = self.lock();
            for entry in carry {
                inner.queue.push_back(entry);
            }
            inner.draining = false;
        }

        info!(
            committed = report.committed,
            requeued = report.requeued,
            poisoned = report.poisoned,
            held = report.held,
            "replay drain pass finished"
        );
        report
    }

    fn lock(&self) -> MutexGuard<'_, ReplayInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

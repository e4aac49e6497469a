//! Resilience layer between Applypath frontends and the remote document
//! backend.
//!
//! This crate lets UI code call backend operations before the connection
//! is ready, survive transient network failures, and avoid redundant
//! state notifications: a readiness-gated dispatcher, a retry executor
//! for idempotent reads, an offline replay queue for mutations, and a
//! deduplicating state broadcaster.

/// Deduplicating state fan-out to frontend subscribers.
pub mod broadcast;
/// Dispatcher facade composing gate, retry, replay, and broadcast.
pub mod dispatcher;
/// Stable error payloads and the transient/fatal classifier.
pub mod error;
/// Readiness gate and deferred operation queue.
pub mod gate;
/// Offline replay queue for failed mutations.
pub mod replay;
/// Bounded-retry executor for read-style operations.
pub mod retry;
/// Host readiness/connectivity signal surface.
pub mod signal;
/// Operation metadata and identity-state payloads.
pub mod types;

pub use broadcast::{StateBroadcaster, SubscriptionId};
pub use dispatcher::{Dispatcher, DispatcherConfig, MutationOutcome};
pub use error::{classify, DispatchError, ErrorClass, StoreError};
pub use gate::{GateState, ReadinessGate};
pub use replay::{DrainReport, MutationThunk, OfflineReplayQueue, PoisonedMutation, ReplayConfig};
pub use retry::RetryPolicy;
pub use signal::{ConnectivityState, HostSignals};
pub use types::{
    session_signature, OpKind, OperationId, ProfileKind, SessionState, DEFAULT_OP_TIMEOUT,
};

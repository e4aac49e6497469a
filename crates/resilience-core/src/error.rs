use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::OperationId;

/// Stable error payload produced by backend operation thunks.
///
/// The dispatcher never inspects thunk internals beyond `code` and
/// `message`; both must stay stable across releases.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct StoreError {
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl StoreError {
    /// Construct a new store error.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Connectivity-level request failure.
    pub fn request_failed(message: impl Into<String>) -> Self {
        Self::new("request-failed", message)
    }

    /// Backend temporarily unavailable.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new("unavailable", message)
    }

    /// Caller is not allowed to perform the operation.
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new("permission-denied", message)
    }
}

/// Classification of an error by whether retrying is expected to help.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorClass {
    /// Connectivity flakiness; retry or queue.
    Transient,
    /// Caller or backend contract failure; surface unchanged.
    Fatal,
}

/// Error codes that indicate a connectivity failure rather than a contract
/// failure.
const TRANSIENT_CODES: [&str; 4] = [
    "request-failed",
    "timeout",
    "unavailable",
    "deadline-exceeded",
];

/// Decide whether an error is worth retrying.
///
/// Transient iff the code is a known connectivity code or the message
/// mentions a network-ish failure. Pure; the single seam every other
/// component uses to decide "retry vs. surface".
pub fn classify(error: &StoreError) -> ErrorClass {
    if TRANSIENT_CODES.contains(&error.code.as_str()) {
        return ErrorClass::Transient;
    }

    let message = error.message.to_ascii_lowercase();
    if message.contains("network") || message.contains("timeout") || message.contains("fetch") {
        return ErrorClass::Transient;
    }

    ErrorClass::Fatal
}

/// Errors surfaced to `submit` callers.
///
/// Transient store failures are absorbed (degraded reads, queued
/// mutations) and never appear here; only timeouts and fatal failures
/// reach the original caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// The operation was never dispatched before its wait budget elapsed.
    #[error("{id} timed out after {timeout_ms}ms waiting for backend readiness")]
    Timeout {
        /// Identifier of the deferred operation.
        id: OperationId,
        /// Wait budget that elapsed.
        timeout_ms: u64,
    },
    /// The dispatcher dropped the operation before it ran.
    #[error("{id} was dropped before it ran")]
    Dropped {
        /// Identifier of the dropped operation.
        id: OperationId,
    },
    /// The operation ran and failed with a non-retryable error.
    #[error(transparent)]
    Store(#[from] StoreError),
}

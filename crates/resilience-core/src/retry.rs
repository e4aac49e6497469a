use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{classify, ErrorClass, StoreError};

/// Per-call-site retry tuning for read-style operations.
///
/// Each call site owns its policy; there is no global singleton, so "load
/// profile" and "list programs" can back off differently.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    classifier: fn(&StoreError) -> ErrorClass,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms,
            max_delay_ms,
            classifier: classify,
        }
    }

    /// Replace the default transient/fatal classifier.
    pub fn with_classifier(mut self, classifier: fn(&StoreError) -> ErrorClass) -> Self {
        self.classifier = classifier;
        self
    }

    /// Classify an error under this policy.
    pub fn classify(&self, error: &StoreError) -> ErrorClass {
        (self.classifier)(error)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn base_delay_ms(&self) -> u64 {
        self.base_delay_ms
    }

    /// Linear backoff: `base * attempt`, capped. Attempt numbers start at 1.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let calculated = self.base_delay_ms.saturating_mul(u64::from(attempt.max(1)));
        Duration::from_millis(calculated.min(self.max_delay_ms))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, 500, 30_000)
    }
}

/// Run a read-style operation with bounded retries and a degraded fallback.
///
/// Transient failures are retried up to `policy.max_attempts()` total
/// tries; if every try fails transiently the result is `fallback()`, a
/// deliberately degraded but valid value, so read callers never handle
/// connectivity flakiness themselves. A fatal classification aborts
/// immediately and propagates unchanged: reads degrade gracefully but must
/// not paper over caller errors.
pub async fn run<T, F, Fut, FB>(op: F, policy: RetryPolicy, fallback: FB) -> Result<T, StoreError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
    FB: FnOnce() -> T,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) => match policy.classify(&error) {
                ErrorClass::Fatal => {
                    warn!(code = %error.code, attempt, "read failed fatally; surfacing");
                    return Err(error);
                }
                ErrorClass::Transient if attempt >= policy.max_attempts() => {
                    warn!(
                        code = %error.code,
                        attempts = attempt,
                        "read attempts exhausted; returning degraded fallback"
                    );
                    return Ok(fallback());
                }
                ErrorClass::Transient => {
                    let delay = policy.delay_for_attempt(attempt);
                    debug!(
                        code = %error.code,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "read failed transiently; backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn backoff_is_linear_from_attempt_one() {
        let policy = RetryPolicy::new(5, 250, 8_000);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(250));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(750));
    }

    #[test]
    fn backoff_caps_at_max_delay() {
        let policy = RetryPolicy::new(10, 1_000, 4_000);
        assert_eq!(policy.delay_for_attempt(9), Duration::from_millis(4_000));
    }

    #[tokio::test(start_paused = true)]
    async fn resolves_on_first_success_without_delay() {
        let calls = AtomicU32::new(0);
        let result = run(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, StoreError>(42) }
            },
            RetryPolicy::default(),
            || 0,
        )
        .await
        .expect("read should resolve");

        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_transient_failures_degrade_instead_of_throwing() {
        let calls = AtomicU32::new(0);
        let result = run(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<u32, _>(StoreError::unavailable("backend flapping")) }
            },
            RetryPolicy::new(3, 100, 1_000),
            || 7,
        )
        .await
        .expect("exhaustion must degrade, not reject");

        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_failure_aborts_without_further_attempts() {
        let calls = AtomicU32::new(0);
        let err = run(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<u32, _>(StoreError::permission_denied("missing grant")) }
            },
            RetryPolicy::new(5, 100, 1_000),
            || 0,
        )
        .await
        .expect_err("fatal errors must propagate");

        assert_eq!(err.code, "permission-denied");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn custom_classifier_overrides_the_default_seam() {
        let calls = AtomicU32::new(0);
        let strict = RetryPolicy::new(5, 100, 1_000).with_classifier(|_| ErrorClass::Fatal);
        let err = run(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<u32, _>(StoreError::unavailable("backend flapping")) }
            },
            strict,
            || 0,
        )
        .await
        .expect_err("strict classifier must abort immediately");

        assert_eq!(err.code, "unavailable");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_when_a_later_attempt_succeeds() {
        let calls = AtomicU32::new(0);
        let result = run(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(StoreError::request_failed("socket reset"))
                    } else {
                        Ok(99)
                    }
                }
            },
            RetryPolicy::new(4, 50, 500),
            || 0,
        )
        .await
        .expect("read should recover");

        assert_eq!(result, 99);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}

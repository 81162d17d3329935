//! Fixed-interval retry for writes against a catalog that another process
//! may hold locked.
//!
//! Only the "busy/locked" condition is retried. Any other database error is
//! returned at once. Running out of attempts yields
//! [`LockRetryError::Locked`], which the pipeline turns into an aborted cycle.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::catalog::CatalogError;

/// Default attempt budget, including the first attempt.
pub const DEFAULT_MAX_LOCK_ATTEMPTS: u32 = 500;

/// Default wait between attempts.
pub const DEFAULT_LOCK_RETRY_INTERVAL: Duration = Duration::from_secs(20);

/// What to do after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait `delay`, then make attempt number `attempt`.
    Retry {
        /// How long to wait.
        delay: Duration,
        /// The attempt about to be made (1-indexed).
        attempt: u32,
    },
    /// The catalog stayed locked for the whole budget.
    GiveUp,
    /// The error is not a lock; retrying cannot help.
    DoNotRetry,
}

/// Outcome of an exhausted or non-retryable write.
#[derive(Debug)]
pub enum LockRetryError {
    /// Still locked after `attempts` attempts.
    Locked {
        /// Attempts made.
        attempts: u32,
        /// The last busy error seen.
        last: CatalogError,
    },
    /// A non-busy failure.
    Failed(CatalogError),
}

/// Attempt budget and spacing for locked-catalog writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockRetryPolicy {
    max_attempts: u32,
    interval: Duration,
}

impl Default for LockRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_LOCK_ATTEMPTS,
            interval: DEFAULT_LOCK_RETRY_INTERVAL,
        }
    }
}

impl LockRetryPolicy {
    /// Custom policy. `max_attempts` is clamped to at least 1.
    #[must_use]
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval,
        }
    }

    /// Attempt budget.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Wait between attempts.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Decides what follows failed attempt number `attempt` (1-indexed).
    #[must_use]
    pub fn should_retry(&self, error: &CatalogError, attempt: u32) -> RetryDecision {
        if !error.is_busy() {
            return RetryDecision::DoNotRetry;
        }
        if attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry {
            delay: self.interval,
            attempt: attempt + 1,
        }
    }
}

/// Runs `op` until it succeeds, fails with a non-busy error, or the policy's
/// attempt budget is spent. `op` receives the 1-indexed attempt number.
///
/// # Errors
///
/// Returns [`LockRetryError::Failed`] for a non-busy error and
/// [`LockRetryError::Locked`] when every attempt found the catalog busy.
#[instrument(skip_all, fields(max_attempts = policy.max_attempts))]
pub async fn write_with_lock_retry<T, F, Fut>(
    policy: &LockRetryPolicy,
    mut op: F,
) -> Result<T, LockRetryError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, CatalogError>>,
{
    let mut attempt = 1;
    loop {
        let error = match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "Write succeeded after lock wait");
                }
                return Ok(value);
            }
            Err(error) => error,
        };

        match policy.should_retry(&error, attempt) {
            RetryDecision::Retry { delay, attempt: next } => {
                warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    wait_secs = delay.as_secs(),
                    "Catalog database is locked; waiting before retrying"
                );
                tokio::time::sleep(delay).await;
                attempt = next;
            }
            RetryDecision::GiveUp => {
                return Err(LockRetryError::Locked {
                    attempts: attempt,
                    last: error,
                });
            }
            RetryDecision::DoNotRetry => return Err(LockRetryError::Failed(error)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::catalog::CatalogDbErrorKind;

    fn busy() -> CatalogError {
        CatalogError::database(CatalogDbErrorKind::BusyOrLocked, "database is locked")
    }

    fn fast(max_attempts: u32) -> LockRetryPolicy {
        LockRetryPolicy::new(max_attempts, Duration::from_millis(1))
    }

    #[test]
    fn test_default_policy_constants() {
        let policy = LockRetryPolicy::default();
        assert_eq!(policy.max_attempts(), 500);
        assert_eq!(policy.interval(), Duration::from_secs(20));
        assert_eq!(LockRetryPolicy::new(0, Duration::ZERO).max_attempts(), 1);
    }

    #[test]
    fn test_should_retry_decisions() {
        let policy = fast(3);
        assert!(matches!(
            policy.should_retry(&busy(), 1),
            RetryDecision::Retry { attempt: 2, .. }
        ));
        assert_eq!(policy.should_retry(&busy(), 3), RetryDecision::GiveUp);
        let other = CatalogError::database(CatalogDbErrorKind::Other, "disk I/O error");
        assert_eq!(policy.should_retry(&other, 1), RetryDecision::DoNotRetry);
    }

    #[tokio::test]
    async fn test_succeeds_after_k_busy_attempts() {
        let calls = AtomicU32::new(0);
        let result = write_with_lock_retry(&fast(10), |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { if attempt <= 3 { Err(busy()) } else { Ok(attempt) } }
        })
        .await;

        assert_eq!(result.unwrap(), 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = write_with_lock_retry(&fast(5), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(busy()) }
        })
        .await;

        match result.unwrap_err() {
            LockRetryError::Locked { attempts, last } => {
                assert_eq!(attempts, 5);
                assert!(last.is_busy());
            }
            LockRetryError::Failed(e) => panic!("expected Locked, got {e}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_non_busy_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = write_with_lock_retry(&fast(5), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(CatalogError::database(
                    CatalogDbErrorKind::ConstraintViolation,
                    "constraint failed",
                ))
            }
        })
        .await;

        assert!(matches!(result, Err(LockRetryError::Failed(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

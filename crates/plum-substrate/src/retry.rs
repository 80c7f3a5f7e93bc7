//! Bounded exponential backoff for collaborator calls
//!
//! Retries happen only here, at the collaborator boundary, and only for
//! errors the collaborator classified as transient. Every other failure
//! propagates upward untouched.

use crate::error::{SubstrateError, SubstrateResult};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy for one collaborator call.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts including the first one.
    pub max_attempts: u32,

    /// Delay before the first retry.
    pub initial_backoff: Duration,

    /// Backoff ceiling.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries. Used where the phase budget is already
    /// exhausted.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Backoff before retry number `attempt` (1-based), doubling up to the
    /// ceiling.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let backoff = self.initial_backoff.saturating_mul(1u32 << exp);
        backoff.min(self.max_backoff)
    }
}

/// Run `op` under the policy, retrying transient errors with exponential
/// backoff. Permanent errors and exhausted budgets return the last error.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: RetryPolicy,
    operation: &str,
    mut op: F,
) -> SubstrateResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SubstrateResult<T>>,
{
    let mut attempt = 1u32;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let backoff = policy.backoff(attempt);
                debug!(
                    operation = operation,
                    attempt = attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Retrying transient substrate error"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => {
                if e.is_retryable() {
                    warn!(
                        operation = operation,
                        attempts = attempt,
                        error = %e,
                        "Retry budget exhausted"
                    );
                    return Err(SubstrateError::Permanent(format!(
                        "{} failed after {} attempts: {}",
                        operation, attempt, e
                    )));
                }
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_doubles_to_ceiling() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
        };

        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(4), Duration::from_millis(500));
        assert_eq!(policy.backoff(9), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried() {
        let calls = AtomicU32::new(0);

        let result = retry_with_backoff(RetryPolicy::default(), "apply", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(SubstrateError::Transient("503".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);

        let result: SubstrateResult<()> =
            retry_with_backoff(RetryPolicy::default(), "apply", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SubstrateError::Permanent("bad spec".into())) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_budget_becomes_permanent() {
        let result: SubstrateResult<()> =
            retry_with_backoff(RetryPolicy::default(), "rollout", || async {
                Err(SubstrateError::Transient("reset".into()))
            })
            .await;

        match result {
            Err(SubstrateError::Permanent(msg)) => {
                assert!(msg.contains("4 attempts"));
            }
            other => panic!("expected permanent error, got {:?}", other),
        }
    }
}

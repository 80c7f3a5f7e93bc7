//! Circuit breaker for rollout progress.
//!
//! A three-state FSM driven exclusively by metric samples. The strategy
//! engine consults it between consecutive phases and throughout every
//! stabilization wait; anything other than `Closed` refuses progress.

use chrono::{DateTime, Utc};
use plum_types::{BreakerConfig, BreakerState, CircuitState, DeploymentId};
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// A state change produced by a sample or a timeout check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerTransition {
    pub from: CircuitState,
    pub to: CircuitState,
}

/// Circuit breaker for a single deployment.
///
/// Accesses are serialized by the internal mutex; the only writers are the
/// sampler tick and the deployment driver, per the concurrency model.
pub struct CircuitBreaker {
    deployment_id: DeploymentId,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

struct Inner {
    state: BreakerState,
    /// Consecutive passing samples while half-open.
    half_open_successes: u32,
}

impl CircuitBreaker {
    /// Create a closed breaker for a deployment.
    pub fn new(deployment_id: DeploymentId, config: BreakerConfig) -> Self {
        Self {
            deployment_id,
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::closed(),
                half_open_successes: 0,
            }),
        }
    }

    /// Current state, applying any due open → half-open timeout move.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock().unwrap();
        self.check_timeout(&mut inner, Utc::now());
        inner.state.state
    }

    /// Snapshot of the full bookkeeping tuple for the owning deployment.
    pub fn snapshot(&self) -> BreakerState {
        let mut inner = self.inner.lock().unwrap();
        self.check_timeout(&mut inner, Utc::now());
        inner.state.clone()
    }

    /// Whether rollout progress is currently allowed.
    ///
    /// Only `Closed` allows progress; the engine treats an attempt to
    /// advance in any other state as a failure to roll back.
    pub fn allows_progress(&self) -> bool {
        self.state() == CircuitState::Closed
    }

    /// Feed one sample's error rate into the FSM.
    ///
    /// `sampled_at` guards against stale input: samples older than the
    /// monitoring window never transition the breaker. Returns the
    /// transition, if one occurred.
    pub fn on_sample(&self, error_rate: f64, sampled_at: DateTime<Utc>) -> Option<BreakerTransition> {
        let now = Utc::now();
        let age = now.signed_duration_since(sampled_at);
        let window = chrono::Duration::from_std(self.config.monitoring_window)
            .unwrap_or_else(|_| chrono::Duration::zero());
        if age > window {
            debug!(
                deployment_id = %self.deployment_id,
                age_ms = age.num_milliseconds(),
                "Ignoring stale sample"
            );
            return None;
        }

        let failing = error_rate > self.config.error_rate_threshold;
        let mut inner = self.inner.lock().unwrap();
        let before = inner.state.state;

        self.check_timeout(&mut inner, now);

        match inner.state.state {
            CircuitState::Closed => {
                if failing {
                    inner.state.failure_count += 1;
                    inner.state.last_failure_at = Some(now);

                    if inner.state.failure_count >= self.config.failure_threshold {
                        warn!(
                            deployment_id = %self.deployment_id,
                            failures = inner.state.failure_count,
                            error_rate = error_rate,
                            "Circuit breaker opening"
                        );
                        self.open(&mut inner, now);
                    }
                } else {
                    // Passing samples decay the count toward zero.
                    inner.state.failure_count = inner.state.failure_count.saturating_sub(1);
                }
            }
            CircuitState::Open => {
                // check_timeout already handled the open → half-open move;
                // samples arriving while still open are informational only.
            }
            CircuitState::HalfOpen => {
                if inner.state.half_open_calls >= self.config.half_open_max_calls {
                    debug!(
                        deployment_id = %self.deployment_id,
                        "Half-open call budget exhausted, dropping sample"
                    );
                } else {
                    inner.state.half_open_calls += 1;

                    if failing {
                        warn!(
                            deployment_id = %self.deployment_id,
                            error_rate = error_rate,
                            "Circuit breaker re-opening after half-open failure"
                        );
                        inner.state.last_failure_at = Some(now);
                        self.open(&mut inner, now);
                    } else {
                        inner.half_open_successes += 1;
                        if inner.half_open_successes >= self.config.success_threshold {
                            info!(
                                deployment_id = %self.deployment_id,
                                successes = inner.half_open_successes,
                                "Circuit breaker closing after recovery"
                            );
                            inner.state.state = CircuitState::Closed;
                            inner.state.failure_count = 0;
                            inner.state.next_attempt_at = None;
                            inner.state.half_open_calls = 0;
                            inner.half_open_successes = 0;
                        }
                    }
                }
            }
        }

        let after = inner.state.state;
        (before != after).then_some(BreakerTransition {
            from: before,
            to: after,
        })
    }

    fn open(&self, inner: &mut Inner, now: DateTime<Utc>) {
        inner.state.state = CircuitState::Open;
        inner.state.next_attempt_at =
            Some(
                now + chrono::Duration::from_std(self.config.timeout)
                    .unwrap_or_else(|_| chrono::Duration::zero()),
            );
        inner.state.half_open_calls = 0;
        inner.half_open_successes = 0;
    }

    /// Open → half-open once the reset timeout elapses.
    fn check_timeout(&self, inner: &mut Inner, now: DateTime<Utc>) {
        if inner.state.state != CircuitState::Open {
            return;
        }
        let Some(next_attempt) = inner.state.next_attempt_at else {
            return;
        };
        if now >= next_attempt {
            info!(
                deployment_id = %self.deployment_id,
                "Circuit breaker transitioning to half-open after timeout"
            );
            inner.state.state = CircuitState::HalfOpen;
            inner.state.half_open_calls = 0;
            inner.half_open_successes = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            error_rate_threshold: 0.05,
            timeout: Duration::from_millis(50),
            monitoring_window: Duration::from_secs(10),
            half_open_max_calls: 3,
        }
    }

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(DeploymentId::generate(), test_config())
    }

    #[test]
    fn test_closed_to_open_after_failing_samples() {
        let breaker = breaker();
        assert!(breaker.allows_progress());

        assert!(breaker.on_sample(0.25, Utc::now()).is_none());
        assert!(breaker.on_sample(0.25, Utc::now()).is_none());
        let transition = breaker.on_sample(0.25, Utc::now()).unwrap();

        assert_eq!(transition.from, CircuitState::Closed);
        assert_eq!(transition.to, CircuitState::Open);
        assert!(!breaker.allows_progress());

        let snapshot = breaker.snapshot();
        assert!(snapshot.next_attempt_at.is_some());
        assert!(snapshot.last_failure_at.is_some());
    }

    #[test]
    fn test_passing_samples_decay_failure_count() {
        let breaker = breaker();

        breaker.on_sample(0.25, Utc::now());
        breaker.on_sample(0.25, Utc::now());
        breaker.on_sample(0.01, Utc::now());
        breaker.on_sample(0.25, Utc::now());

        // Two failures, one decay, one failure: count is two, still closed.
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.snapshot().failure_count, 2);
    }

    #[test]
    fn test_stale_samples_never_transition() {
        let breaker = breaker();
        let stale = Utc::now() - chrono::Duration::seconds(60);

        for _ in 0..5 {
            assert!(breaker.on_sample(0.9, stale).is_none());
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.snapshot().failure_count, 0);
    }

    #[test]
    fn test_open_to_half_open_to_closed() {
        let breaker = breaker();
        for _ in 0..3 {
            breaker.on_sample(0.25, Utc::now());
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.on_sample(0.01, Utc::now());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        let transition = breaker.on_sample(0.01, Utc::now()).unwrap();
        assert_eq!(transition.to, CircuitState::Closed);
        assert_eq!(breaker.snapshot().failure_count, 0);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let breaker = breaker();
        for _ in 0..3 {
            breaker.on_sample(0.25, Utc::now());
        }
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        let transition = breaker.on_sample(0.5, Utc::now()).unwrap();
        assert_eq!(transition.to, CircuitState::Open);

        // The reopen extends the attempt window.
        assert!(breaker.snapshot().next_attempt_at.unwrap() > Utc::now());
    }

    #[test]
    fn test_open_never_jumps_to_closed() {
        let breaker = breaker();
        for _ in 0..3 {
            breaker.on_sample(0.25, Utc::now());
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        // Passing samples while open do not close the circuit.
        breaker.on_sample(0.0, Utc::now());
        breaker.on_sample(0.0, Utc::now());
        assert_ne!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_call_budget() {
        let breaker = CircuitBreaker::new(
            DeploymentId::generate(),
            BreakerConfig {
                half_open_max_calls: 1,
                success_threshold: 2,
                ..test_config()
            },
        );
        for _ in 0..3 {
            breaker.on_sample(0.25, Utc::now());
        }
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        // Budget of one: the second sample is dropped, state holds.
        breaker.on_sample(0.01, Utc::now());
        breaker.on_sample(0.01, Utc::now());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert_eq!(breaker.snapshot().half_open_calls, 1);
    }
}

//! Circuit breaker state tuple
//!
//! The transition logic lives in `plum-health`; this is the data that
//! travels inside the owning [`Deployment`](crate::Deployment) record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State of a deployment's circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Circuit is closed, rollout progress is allowed.
    Closed,

    /// Circuit is open, rollout progress is refused.
    Open,

    /// Circuit is testing whether the deployment has recovered.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Snapshot of a breaker's bookkeeping
///
/// Invariants: in `Open`, `next_attempt_at` is set and was in the future at
/// the moment of the transition; in `HalfOpen`, `half_open_calls` never
/// exceeds the configured maximum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerState {
    /// Current FSM state.
    pub state: CircuitState,

    /// Failing samples counted toward opening (decays on passing samples).
    pub failure_count: u32,

    /// When the most recent failing sample was observed.
    pub last_failure_at: Option<DateTime<Utc>>,

    /// When an open breaker may move to half-open.
    pub next_attempt_at: Option<DateTime<Utc>>,

    /// Samples admitted while half-open.
    pub half_open_calls: u32,
}

impl BreakerState {
    /// A fresh, closed breaker.
    pub fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_at: None,
            next_attempt_at: None,
            half_open_calls: 0,
        }
    }
}

impl Default for BreakerState {
    fn default() -> Self {
        Self::closed()
    }
}

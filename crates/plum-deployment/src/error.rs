//! Error types for plum-deployment.

use plum_substrate::SubstrateError;
use plum_types::{DeploymentId, PluginKey, StateTransitionError, ValidationError};
use thiserror::Error;

/// Errors that can occur during deployment orchestration.
#[derive(Debug, Error)]
pub enum DeploymentError {
    /// The request was malformed. No state was created.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The plugin's name was not admissible.
    #[error(transparent)]
    PluginKey(#[from] plum_types::PluginKeyError),

    /// A non-terminal deployment for the plugin already exists.
    #[error("plugin {0} already has an active deployment")]
    AlreadyActive(PluginKey),

    /// The orchestrator is shutting down and admits no new work.
    #[error("orchestrator is shutting down")]
    ShuttingDown,

    /// Unknown deployment id.
    #[error("deployment not found: {0}")]
    NotFound(DeploymentId),

    /// A phase step failed.
    #[error("phase {phase} failed: {reason}")]
    PhaseFailed { phase: String, reason: String },

    /// The circuit breaker refused rollout progress.
    #[error("circuit breaker is {state}, refusing progress")]
    BreakerOpen { state: String },

    /// Health left the acceptable range during observation.
    #[error("plugin health became {status} during observation")]
    UnhealthyDuringObserve { status: String },

    /// The per-phase progress deadline elapsed.
    #[error("progress deadline of {deadline_secs}s exceeded in phase {phase}")]
    ProgressDeadline { phase: String, deadline_secs: u64 },

    /// The driver observed cancellation at a suspension point.
    #[error("deployment cancelled: {reason}")]
    Cancelled { reason: String },

    /// Rollback itself failed. Double fault; never retried automatically.
    #[error("rollback failed: {0}")]
    RollbackFailed(String),

    /// A collaborator call failed past the retry budget.
    #[error(transparent)]
    Substrate(#[from] SubstrateError),

    /// Illegal status move on the deployment record.
    #[error(transparent)]
    State(#[from] StateTransitionError),

    /// Health monitor wiring failed.
    #[error("health monitor error: {0}")]
    Health(#[from] plum_health::HealthError),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for deployment operations.
pub type Result<T> = std::result::Result<T, DeploymentError>;

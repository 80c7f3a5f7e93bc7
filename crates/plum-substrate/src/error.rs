//! Error types for substrate collaborators.

use thiserror::Error;

/// Errors returned by collaborator calls.
///
/// The retryable/permanent split drives the core's retry policy: only
/// `Transient` errors are retried, and only at the collaborator boundary.
#[derive(Debug, Clone, Error)]
pub enum SubstrateError {
    /// The collaborator returned a retryable condition (timeout, 5xx,
    /// connection reset). The core retries within the phase's budget.
    #[error("transient substrate error: {0}")]
    Transient(String),

    /// The collaborator rejected the request permanently (bad spec,
    /// unknown service). Retrying cannot help.
    #[error("permanent substrate error: {0}")]
    Permanent(String),

    /// The referenced scope or workload does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

impl SubstrateError {
    /// Whether the retry policy may re-attempt this call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SubstrateError::Transient(_))
    }
}

/// Result type for substrate operations.
pub type SubstrateResult<T> = Result<T, SubstrateError>;

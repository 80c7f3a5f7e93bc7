//! Phase records
//!
//! A phase is one externally observable step of a strategy. Phases are
//! created `Pending` when the strategy is expanded, moved to `InProgress`
//! when the runner picks them up, and sealed exactly once.

use crate::ids::Region;
use crate::metrics::MetricsSample;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhaseStatus {
    /// Created, not yet picked up.
    Pending,

    /// Currently executing. At most one phase per deployment is here.
    InProgress,

    /// Sealed successfully.
    Completed,

    /// Sealed with a failure.
    Failed,

    /// Undone by a rollback.
    RolledBack,
}

impl PhaseStatus {
    /// Whether the phase can no longer change status.
    pub fn is_sealed(&self) -> bool {
        matches!(
            self,
            PhaseStatus::Completed | PhaseStatus::Failed | PhaseStatus::RolledBack
        )
    }
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PhaseStatus::Pending => write!(f, "pending"),
            PhaseStatus::InProgress => write!(f, "in-progress"),
            PhaseStatus::Completed => write!(f, "completed"),
            PhaseStatus::Failed => write!(f, "failed"),
            PhaseStatus::RolledBack => write!(f, "rolled-back"),
        }
    }
}

/// One step of a deployment strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    /// Phase name, e.g. `deploy-green` or `canary-50%`.
    pub name: String,

    /// Current status.
    pub status: PhaseStatus,

    /// Region this phase targets, when region-scoped.
    pub region: Option<Region>,

    /// Traffic percentage this phase shifts to the new variant (canary).
    pub percentage: Option<u8>,

    /// Most recent metrics observed while this phase ran.
    pub metrics: Option<MetricsSample>,

    /// When the runner picked the phase up.
    pub started_at: Option<DateTime<Utc>>,

    /// When the phase was sealed.
    pub ended_at: Option<DateTime<Utc>>,

    /// Human-readable reason, set when the phase failed.
    pub failure_reason: Option<String>,
}

impl Phase {
    /// Create a pending phase.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: PhaseStatus::Pending,
            region: None,
            percentage: None,
            metrics: None,
            started_at: None,
            ended_at: None,
            failure_reason: None,
        }
    }

    /// Scope the phase to a region.
    pub fn with_region(mut self, region: Region) -> Self {
        self.region = Some(region);
        self
    }

    /// Attach a canary traffic percentage.
    pub fn with_percentage(mut self, percentage: u8) -> Self {
        self.percentage = Some(percentage);
        self
    }

    /// Mark the phase in-progress. A no-op if already sealed.
    pub fn begin(&mut self) {
        if self.status.is_sealed() {
            return;
        }
        self.status = PhaseStatus::InProgress;
        self.started_at = Some(Utc::now());
    }

    /// Seal the phase as completed. A no-op if already sealed.
    pub fn complete(&mut self) {
        if self.status.is_sealed() {
            return;
        }
        self.status = PhaseStatus::Completed;
        self.ended_at = Some(Utc::now());
    }

    /// Seal the phase as failed with a reason. A no-op if already sealed.
    pub fn fail(&mut self, reason: impl Into<String>) {
        if self.status.is_sealed() {
            return;
        }
        self.status = PhaseStatus::Failed;
        self.failure_reason = Some(reason.into());
        self.ended_at = Some(Utc::now());
    }

    /// Mark a previously completed phase as rolled back.
    pub fn mark_rolled_back(&mut self) {
        if matches!(self.status, PhaseStatus::Completed | PhaseStatus::InProgress) {
            self.status = PhaseStatus::RolledBack;
        }
    }

    /// Record the latest observed metrics for this phase.
    pub fn observe(&mut self, sample: MetricsSample) {
        self.metrics = Some(sample);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_lifecycle() {
        let mut phase = Phase::new("canary-10%").with_percentage(10);
        assert_eq!(phase.status, PhaseStatus::Pending);

        phase.begin();
        assert_eq!(phase.status, PhaseStatus::InProgress);
        assert!(phase.started_at.is_some());

        phase.complete();
        assert_eq!(phase.status, PhaseStatus::Completed);
        assert!(phase.ended_at.is_some());
    }

    #[test]
    fn test_sealed_phase_is_immutable() {
        let mut phase = Phase::new("switch-traffic");
        phase.begin();
        phase.fail("router returned non-retryable");

        let failed_at = phase.ended_at;
        phase.complete();
        phase.begin();

        assert_eq!(phase.status, PhaseStatus::Failed);
        assert_eq!(phase.ended_at, failed_at);
        assert_eq!(
            phase.failure_reason.as_deref(),
            Some("router returned non-retryable")
        );
    }

    #[test]
    fn test_rollback_only_touches_committed_work() {
        let mut done = Phase::new("deploy-green");
        done.begin();
        done.complete();
        done.mark_rolled_back();
        assert_eq!(done.status, PhaseStatus::RolledBack);

        let mut untouched = Phase::new("cleanup-blue");
        untouched.mark_rolled_back();
        assert_eq!(untouched.status, PhaseStatus::Pending);
    }
}

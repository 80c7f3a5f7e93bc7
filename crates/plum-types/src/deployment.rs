//! Deployment records and the status lattice
//!
//! A Deployment is the run-time object created per rollout. Its status only
//! moves forward along the lattice
//! `preparing → deploying → (monitoring → completed) | (rolling-back →
//! rolled-back) | failed`, and once terminal the record is immutable.

use crate::breaker::BreakerState;
use crate::ids::{DeploymentId, PluginKey, Region};
use crate::phase::{Phase, PhaseStatus};
use crate::request::StrategyKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Overall status of a deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeploymentStatus {
    /// Admitted, wiring monitors and expanding phases.
    Preparing,

    /// Phases are executing.
    Deploying,

    /// All phases committed; post-install observation window.
    Monitoring,

    /// Terminal: rollout and observation finished cleanly.
    Completed,

    /// Terminal: the deployment failed and could not (or will not) be
    /// rolled back.
    Failed {
        /// Why the deployment failed.
        reason: String,
    },

    /// A rollback is executing.
    RollingBack,

    /// Terminal: rollback finished; the previous variant serves traffic.
    RolledBack,
}

impl DeploymentStatus {
    /// Whether the status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Completed
                | DeploymentStatus::Failed { .. }
                | DeploymentStatus::RolledBack
        )
    }

    /// Whether `next` is a legal forward move from this status.
    pub fn allows(&self, next: &DeploymentStatus) -> bool {
        use DeploymentStatus::*;
        match (self, next) {
            (Preparing, Deploying) => true,
            (Deploying, Monitoring) => true,
            (Monitoring, Completed) => true,
            (Deploying | Monitoring, RollingBack) => true,
            (RollingBack, RolledBack) => true,
            // Any non-terminal state may fail.
            (s, Failed { .. }) => !s.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeploymentStatus::Preparing => write!(f, "preparing"),
            DeploymentStatus::Deploying => write!(f, "deploying"),
            DeploymentStatus::Monitoring => write!(f, "monitoring"),
            DeploymentStatus::Completed => write!(f, "completed"),
            DeploymentStatus::Failed { .. } => write!(f, "failed"),
            DeploymentStatus::RollingBack => write!(f, "rolling-back"),
            DeploymentStatus::RolledBack => write!(f, "rolled-back"),
        }
    }
}

/// Rejected status transition.
#[derive(Debug, Error, PartialEq)]
#[error("illegal deployment transition {from} -> {to}")]
pub struct StateTransitionError {
    pub from: String,
    pub to: String,
}

/// Per-region rollout state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegionState {
    Pending,
    Deploying,
    Healthy,
    Unhealthy,
    Failed,
}

/// Per-region status entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionStatus {
    /// Current state.
    pub state: RegionState,

    /// Replicas the region should run.
    pub desired_replicas: u32,

    /// Replicas currently healthy.
    pub ready_replicas: u32,

    /// Errors observed in this region, oldest first.
    pub errors: Vec<String>,
}

impl RegionStatus {
    pub fn pending() -> Self {
        Self {
            state: RegionState::Pending,
            desired_replicas: 0,
            ready_replicas: 0,
            errors: Vec::new(),
        }
    }
}

/// One rollout of a plugin
///
/// Owned exclusively by the driver task executing it; the orchestrator and
/// read paths see cloned snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    /// Unique deployment identifier.
    pub id: DeploymentId,

    /// Plugin being rolled out.
    pub plugin: PluginKey,

    /// Strategy driving the rollout.
    pub strategy: StrategyKind,

    /// Target regions, in configured order.
    pub regions: Vec<Region>,

    /// Overall status.
    pub status: DeploymentStatus,

    /// Ordered phase list, expanded from the strategy.
    pub phases: Vec<Phase>,

    /// Index of the phase currently `InProgress`, if any.
    pub current_phase: Option<usize>,

    /// Per-region rollout status.
    pub region_status: HashMap<Region, RegionStatus>,

    /// Circuit breaker bookkeeping.
    pub breaker: BreakerState,

    /// Errors accumulated across the rollout, oldest first.
    pub error_log: Vec<String>,

    /// When the deployment was admitted.
    pub started_at: DateTime<Utc>,

    /// When the deployment reached a terminal status.
    pub ended_at: Option<DateTime<Utc>>,
}

impl Deployment {
    /// Create a freshly admitted deployment in `Preparing`.
    pub fn new(plugin: PluginKey, strategy: StrategyKind, regions: Vec<Region>) -> Self {
        let region_status = regions
            .iter()
            .map(|r| (r.clone(), RegionStatus::pending()))
            .collect();

        Self {
            id: DeploymentId::generate(),
            plugin,
            strategy,
            regions,
            status: DeploymentStatus::Preparing,
            phases: Vec::new(),
            current_phase: None,
            region_status,
            breaker: BreakerState::closed(),
            error_log: Vec::new(),
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Move the deployment forward along the status lattice.
    ///
    /// Rejects backward moves and any mutation of a terminal deployment.
    pub fn transition(&mut self, next: DeploymentStatus) -> Result<(), StateTransitionError> {
        if !self.status.allows(&next) {
            return Err(StateTransitionError {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }

        if next.is_terminal() {
            self.ended_at = Some(Utc::now());
        }
        self.status = next;
        Ok(())
    }

    /// Begin the phase at `index`, maintaining the single-in-progress
    /// invariant. A no-op when the phase is already sealed.
    pub fn begin_phase(&mut self, index: usize) -> Result<(), StateTransitionError> {
        if let Some(current) = self.current_phase {
            if current != index && self.phases[current].status == PhaseStatus::InProgress {
                return Err(StateTransitionError {
                    from: format!("phase {} in-progress", self.phases[current].name),
                    to: format!("phase {} in-progress", self.phases[index].name),
                });
            }
        }

        self.phases[index].begin();
        if self.phases[index].status == PhaseStatus::InProgress {
            self.current_phase = Some(index);
        }
        Ok(())
    }

    /// Seal the phase at `index` and clear the cursor.
    pub fn seal_phase(&mut self, index: usize, status: PhaseStatus, reason: Option<String>) {
        match status {
            PhaseStatus::Completed => self.phases[index].complete(),
            PhaseStatus::Failed => {
                let reason = reason.unwrap_or_else(|| "phase failed".to_string());
                self.error_log.push(format!(
                    "phase {}: {}",
                    self.phases[index].name, reason
                ));
                self.phases[index].fail(reason);
            }
            PhaseStatus::RolledBack => self.phases[index].mark_rolled_back(),
            _ => {}
        }

        if self.current_phase == Some(index) {
            self.current_phase = None;
        }
    }

    /// The phase currently in progress, if any.
    pub fn in_progress_phase(&self) -> Option<&Phase> {
        self.current_phase.map(|i| &self.phases[i])
    }

    /// Number of leading phases that have completed.
    pub fn completed_prefix(&self) -> usize {
        self.phases
            .iter()
            .take_while(|p| p.status == PhaseStatus::Completed)
            .count()
    }

    /// Record an error against a region, stamping the region `Failed` only
    /// if it is the first region to fail (later failures accumulate into
    /// the error log).
    pub fn record_region_failure(&mut self, region: &Region, reason: impl Into<String>) {
        let reason = reason.into();
        let first_failure = !self
            .region_status
            .values()
            .any(|s| s.state == RegionState::Failed);

        if let Some(status) = self.region_status.get_mut(region) {
            if first_failure {
                status.state = RegionState::Failed;
            }
            status.errors.push(reason.clone());
        }
        self.error_log.push(format!("region {}: {}", region, reason));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_deployment() -> Deployment {
        let plugin = PluginKey::new("payments", semver::Version::new(1, 2, 3)).unwrap();
        Deployment::new(plugin, StrategyKind::Canary, vec![Region::from("us-east")])
    }

    #[test]
    fn test_forward_only_lattice() {
        let mut d = test_deployment();

        d.transition(DeploymentStatus::Deploying).unwrap();
        d.transition(DeploymentStatus::Monitoring).unwrap();
        assert!(d.transition(DeploymentStatus::Deploying).is_err());

        d.transition(DeploymentStatus::Completed).unwrap();
        assert!(d.status.is_terminal());
        assert!(d.ended_at.is_some());

        // Terminal deployments never leave their status.
        assert!(d.transition(DeploymentStatus::RollingBack).is_err());
        assert!(d
            .transition(DeploymentStatus::Failed {
                reason: "late".into()
            })
            .is_err());
    }

    #[test]
    fn test_rollback_path() {
        let mut d = test_deployment();
        d.transition(DeploymentStatus::Deploying).unwrap();
        d.transition(DeploymentStatus::RollingBack).unwrap();
        d.transition(DeploymentStatus::RolledBack).unwrap();
        assert!(d.status.is_terminal());
    }

    #[test]
    fn test_single_in_progress_phase() {
        let mut d = test_deployment();
        d.phases.push(Phase::new("canary-10%"));
        d.phases.push(Phase::new("canary-100%"));

        d.begin_phase(0).unwrap();
        assert!(d.begin_phase(1).is_err());

        d.seal_phase(0, PhaseStatus::Completed, None);
        assert_eq!(d.current_phase, None);
        d.begin_phase(1).unwrap();
        assert_eq!(d.in_progress_phase().unwrap().name, "canary-100%");
    }

    #[test]
    fn test_completed_prefix() {
        let mut d = test_deployment();
        d.phases.push(Phase::new("a"));
        d.phases.push(Phase::new("b"));
        d.phases.push(Phase::new("c"));

        d.begin_phase(0).unwrap();
        d.seal_phase(0, PhaseStatus::Completed, None);
        assert_eq!(d.completed_prefix(), 1);

        d.begin_phase(1).unwrap();
        d.seal_phase(1, PhaseStatus::Failed, Some("boom".into()));
        assert_eq!(d.completed_prefix(), 1);
        assert_eq!(d.error_log.len(), 1);
    }

    #[test]
    fn test_first_region_failure_wins() {
        let plugin = PluginKey::new("payments", semver::Version::new(1, 0, 0)).unwrap();
        let mut d = Deployment::new(
            plugin,
            StrategyKind::Rolling,
            vec![Region::from("us-east"), Region::from("eu-west")],
        );

        d.record_region_failure(&Region::from("us-east"), "apply rejected");
        d.record_region_failure(&Region::from("eu-west"), "apply rejected");

        assert_eq!(
            d.region_status[&Region::from("us-east")].state,
            RegionState::Failed
        );
        // The later failure accumulates but does not become authoritative.
        assert_ne!(
            d.region_status[&Region::from("eu-west")].state,
            RegionState::Failed
        );
        assert_eq!(d.error_log.len(), 2);
    }
}

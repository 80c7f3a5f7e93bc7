//! Per-deployment driver
//!
//! One driver task owns one deployment: it expands the strategy, runs the
//! phases strictly in order with a breaker gate between every pair, and
//! owns the rollback path. The driver is sequential inside itself;
//! cancellation is observed at every suspension point, and every
//! deployment it touches reaches a terminal status exactly once.

use crate::context::DeploymentContext;
use crate::error::{DeploymentError, Result};
use crate::runner;
use crate::strategies::Strategy;
use plum_types::{
    CircuitState, DeploymentStatus, EventSource, Phase, PhaseStatus, PlumEvent, PlumEventEnvelope,
};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Name of the synthetic phase appended on failure.
pub const ROLLBACK_PHASE: &str = "automatic-rollback";

/// Drives one deployment to a terminal status.
pub struct DeploymentDriver {
    ctx: Arc<DeploymentContext>,
    strategy: Arc<dyn Strategy>,
}

impl DeploymentDriver {
    pub fn new(ctx: Arc<DeploymentContext>, strategy: Arc<dyn Strategy>) -> Self {
        Self { ctx, strategy }
    }

    /// Run to a terminal status. Never panics, never leaves the
    /// deployment non-terminal.
    #[instrument(skip(self), fields(deployment_id = %self.ctx.deployment_id(), strategy = self.strategy.name()))]
    pub async fn run(self) -> DeploymentStatus {
        match self.execute().await {
            Ok(()) => {
                let record = self.ctx.record().read().await;
                record.status.clone()
            }
            Err(e) => self.roll_back(e.to_string()).await,
        }
    }

    /// The forward path: expand, run phases in order, then the
    /// post-install monitoring window.
    async fn execute(&self) -> Result<()> {
        let phase_count = {
            let mut record = self.ctx.record().write().await;

            if record.status == DeploymentStatus::Preparing {
                record.phases = self.strategy.expand(self.ctx.request());
                record.transition(DeploymentStatus::Deploying)?;

                info!(
                    phases = record.phases.len(),
                    "Deployment starting"
                );
                let _ = self.ctx.event_tx().send(PlumEventEnvelope::new(
                    PlumEvent::DeploymentStarted {
                        deployment_id: record.id.clone(),
                    },
                    EventSource::Driver,
                ));
            }
            record.phases.len()
        };

        for index in 0..phase_count {
            // Re-issuing a completed phase is a no-op.
            let already_done = {
                let record = self.ctx.record().read().await;
                record.phases[index].status == PhaseStatus::Completed
            };
            if already_done {
                continue;
            }

            if self.ctx.cancel_token().is_cancelled() {
                return Err(DeploymentError::Cancelled {
                    reason: "shutdown requested".into(),
                });
            }

            // Breaker gate between consecutive phases.
            let state = self.ctx.breaker().state();
            if state != CircuitState::Closed {
                return Err(DeploymentError::BreakerOpen {
                    state: state.to_string(),
                });
            }

            runner::run_phase(index, self.strategy.as_ref(), &self.ctx).await?;
        }

        // All phases committed: post-install observation window.
        {
            let mut record = self.ctx.record().write().await;
            record.transition(DeploymentStatus::Monitoring)?;
        }
        self.ctx.observe(self.ctx.request().stabilization).await?;

        let mut record = self.ctx.record().write().await;
        record.breaker = self.ctx.breaker().snapshot();
        record.transition(DeploymentStatus::Completed)?;

        let duration_seconds = record
            .ended_at
            .map(|end| (end - record.started_at).num_seconds().max(0) as u64)
            .unwrap_or(0);
        info!(duration_seconds = duration_seconds, "Deployment completed");
        let _ = self.ctx.event_tx().send(PlumEventEnvelope::new(
            PlumEvent::DeploymentCompleted {
                deployment_id: record.id.clone(),
                duration_seconds,
            },
            EventSource::Driver,
        ));

        Ok(())
    }

    /// The rollback path. Stamps `RollingBack`, appends the synthetic
    /// rollback phase, runs the strategy's rollback, and seals the
    /// deployment `RolledBack` or, on a double fault, `Failed`.
    async fn roll_back(&self, reason: String) -> DeploymentStatus {
        let rollback_index = {
            let mut record = self.ctx.record().write().await;

            // Re-issuing rollback on a terminal deployment is a no-op.
            if record.status.is_terminal() {
                return record.status.clone();
            }

            if record.transition(DeploymentStatus::RollingBack).is_err() {
                // Failure before any phase ran (still Preparing): there is
                // nothing to unwind.
                let status = DeploymentStatus::Failed {
                    reason: reason.clone(),
                };
                let _ = record.transition(status.clone());
                return status;
            }

            warn!(reason = %reason, "Rolling back");
            let _ = self.ctx.event_tx().send(PlumEventEnvelope::new(
                PlumEvent::RollbackStarted {
                    deployment_id: record.id.clone(),
                    reason: reason.clone(),
                },
                EventSource::Driver,
            ));

            record.phases.push(Phase::new(ROLLBACK_PHASE));
            let index = record.phases.len() - 1;
            let _ = record.begin_phase(index);
            index
        };

        match self.strategy.rollback(&self.ctx).await {
            Ok(()) => {
                let mut record = self.ctx.record().write().await;
                record.seal_phase(rollback_index, PhaseStatus::Completed, None);
                record.breaker = self.ctx.breaker().snapshot();

                let status = DeploymentStatus::RolledBack;
                if let Err(e) = record.transition(status.clone()) {
                    error!(error = %e, "Rollback finished on an unexpected status");
                }

                info!("Rollback completed");
                let _ = self.ctx.event_tx().send(PlumEventEnvelope::new(
                    PlumEvent::RollbackCompleted {
                        deployment_id: record.id.clone(),
                    },
                    EventSource::Driver,
                ));
                record.status.clone()
            }
            Err(e) => {
                // Double fault: stamp failed, surface, never retry.
                let mut record = self.ctx.record().write().await;
                record.seal_phase(rollback_index, PhaseStatus::Failed, Some(e.to_string()));

                let status = DeploymentStatus::Failed {
                    reason: format!("{}; rollback failed: {}", reason, e),
                };
                let _ = record.transition(status.clone());

                error!(error = %e, "Rollback failed, deployment stamped failed");
                let _ = self.ctx.event_tx().send(PlumEventEnvelope::new(
                    PlumEvent::RollbackFailed {
                        deployment_id: record.id.clone(),
                        reason: e.to_string(),
                    },
                    EventSource::Driver,
                ));
                record.status.clone()
            }
        }
    }
}

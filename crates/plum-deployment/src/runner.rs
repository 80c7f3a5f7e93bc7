//! Phase runner
//!
//! Executes one phase as exactly four ordered steps: prepare, act,
//! observe, commit. The act and observe steps together run under the
//! deployment's progress deadline. Any step failing seals the phase
//! `Failed` and raises the error to the driver.

use crate::context::DeploymentContext;
use crate::error::{DeploymentError, Result};
use crate::strategies::Strategy;
use plum_types::{EventSource, Phase, PhaseStatus, PlumEvent, PlumEventEnvelope};
use tracing::{info, instrument, warn};

/// Run the phase at `index` through prepare, act, observe, commit.
#[instrument(skip(strategy, ctx), fields(deployment_id = %ctx.deployment_id()))]
pub async fn run_phase(
    index: usize,
    strategy: &dyn Strategy,
    ctx: &DeploymentContext,
) -> Result<()> {
    let phase: Phase = {
        let mut record = ctx.record().write().await;

        // Re-issuing a completed phase is a no-op.
        if record.phases[index].status == PhaseStatus::Completed {
            return Ok(());
        }

        record.begin_phase(index)?;
        record.phases[index].clone()
    };

    info!(phase = %phase.name, "Phase started");
    let _ = ctx.event_tx().send(PlumEventEnvelope::new(
        PlumEvent::PhaseStarted {
            deployment_id: ctx.deployment_id().clone(),
            phase: phase.name.clone(),
        },
        EventSource::Driver,
    ));

    let result = execute_steps(&phase, strategy, ctx).await;

    let mut record = ctx.record().write().await;
    match &result {
        Ok(()) => {
            record.seal_phase(index, PhaseStatus::Completed, None);
            info!(phase = %phase.name, "Phase committed");
        }
        Err(e) => {
            record.seal_phase(index, PhaseStatus::Failed, Some(e.to_string()));
            warn!(phase = %phase.name, error = %e, "Phase failed");
        }
    }
    let sealed = record.phases[index].status;
    drop(record);

    let _ = ctx.event_tx().send(PlumEventEnvelope::new(
        PlumEvent::PhaseSealed {
            deployment_id: ctx.deployment_id().clone(),
            phase: phase.name.clone(),
            status: sealed,
        },
        EventSource::Driver,
    ));

    result
}

/// Prepare, then act + observe under the progress deadline.
async fn execute_steps(
    phase: &Phase,
    strategy: &dyn Strategy,
    ctx: &DeploymentContext,
) -> Result<()> {
    strategy.prepare(phase, ctx).await?;

    let budget = ctx.request().progress_deadline;
    let stabilization = ctx.request().stabilization + ctx.request().min_ready;

    let bounded = tokio::time::timeout(budget, async {
        strategy.act(phase, ctx).await?;
        ctx.observe(stabilization).await
    });

    match bounded.await {
        Ok(result) => result,
        Err(_) => Err(DeploymentError::ProgressDeadline {
            phase: phase.name.clone(),
            deadline_secs: budget.as_secs(),
        }),
    }
}

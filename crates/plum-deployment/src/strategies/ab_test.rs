//! A/B rollout
//!
//! Runs the incumbent build (variant A) and the candidate (variant B)
//! side by side on an even traffic split, watches the sampler through the
//! monitor window, then promotes whichever variant the analysis picks.
//! The winner is derived from the live sampler; no experiment data is
//! persisted. Rollback promotes the incumbent.

use super::{base_name, phase_regions, Strategy};
use crate::context::DeploymentContext;
use crate::error::{DeploymentError, Result};
use async_trait::async_trait;
use plum_types::{DeployRequest, Phase, StrategyKind};
use tracing::info;

pub struct AbTestStrategy;

#[async_trait]
impl Strategy for AbTestStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::AbTest
    }

    fn name(&self) -> &'static str {
        "a-b"
    }

    fn expand(&self, request: &DeployRequest) -> Vec<Phase> {
        super::expand_over_regions(request, || {
            vec![
                Phase::new("deploy-a"),
                Phase::new("deploy-b"),
                Phase::new("split-traffic"),
                Phase::new("monitor"),
                Phase::new("analyze"),
                Phase::new("promote-winner"),
            ]
        })
    }

    async fn prepare(&self, phase: &Phase, ctx: &DeploymentContext) -> Result<()> {
        match base_name(phase) {
            "deploy-a" => ctx.ensure_scope(&ctx.scope_name("a")).await,
            "deploy-b" => ctx.ensure_scope(&ctx.scope_name("b")).await,
            _ => Ok(()),
        }
    }

    async fn act(&self, phase: &Phase, ctx: &DeploymentContext) -> Result<()> {
        let regions = phase_regions(phase, ctx);

        match base_name(phase) {
            "deploy-a" => ctx.deploy_regions("a", &regions).await,
            "deploy-b" => ctx.deploy_regions("b", &regions).await,
            "split-traffic" => ctx.set_split("b", 50).await,
            // The runner's observe step does the watching; the phase only
            // marks the window.
            "monitor" => Ok(()),
            "analyze" => {
                let threshold = ctx.request().circuit_breaker.error_rate_threshold;
                let winner = match ctx.latest_sample() {
                    Some(sample) if sample.error_rate <= threshold => "b",
                    // No sample or a failing candidate: the incumbent wins.
                    _ => "a",
                };
                info!(
                    deployment_id = %ctx.deployment_id(),
                    winner = winner,
                    "A/B analysis complete"
                );
                ctx.set_ab_winner(winner);
                Ok(())
            }
            "promote-winner" => {
                let winner = ctx.ab_winner().ok_or_else(|| {
                    DeploymentError::Internal("promote-winner before analyze".into())
                })?;
                let loser = if winner == "a" { "b" } else { "a" };

                ctx.set_split(&winner, 100).await?;
                ctx.delete_scope(&ctx.scope_name(loser)).await
            }
            other => Err(DeploymentError::Internal(format!(
                "a-b has no phase {:?}",
                other
            ))),
        }
    }

    async fn rollback(&self, ctx: &DeploymentContext) -> Result<()> {
        // Promote the incumbent and withdraw the candidate.
        ctx.set_split("a", 100).await?;
        ctx.delete_scope(&ctx.scope_name("b")).await
    }
}

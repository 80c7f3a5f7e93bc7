//! Canary rollout
//!
//! One phase per configured percentage: shift that share of traffic to
//! the canary fleet, then hold through stabilization. Rollback shifts the
//! canary's share back to zero.

use super::{phase_regions, Strategy};
use crate::context::DeploymentContext;
use crate::error::{DeploymentError, Result};
use async_trait::async_trait;
use plum_types::{DeployRequest, Phase, StrategyKind};
use tracing::info;

pub struct CanaryStrategy;

#[async_trait]
impl Strategy for CanaryStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Canary
    }

    fn name(&self) -> &'static str {
        "canary"
    }

    fn expand(&self, request: &DeployRequest) -> Vec<Phase> {
        let percentages = request.canary_percentages();
        super::expand_over_regions(request, || {
            percentages
                .iter()
                .map(|pct| Phase::new(format!("canary-{}%", pct)).with_percentage(*pct))
                .collect()
        })
    }

    async fn prepare(&self, phase: &Phase, ctx: &DeploymentContext) -> Result<()> {
        // Every canary phase converges the canary fleet before shifting
        // traffic; apply is idempotent so repeats are cheap.
        let regions = phase_regions(phase, ctx);
        ctx.ensure_scope(&ctx.scope_name("canary")).await?;
        ctx.deploy_regions("canary", &regions).await
    }

    async fn act(&self, phase: &Phase, ctx: &DeploymentContext) -> Result<()> {
        let percentage = phase.percentage.ok_or_else(|| {
            DeploymentError::Internal(format!("canary phase {} lacks a percentage", phase.name))
        })?;

        info!(
            deployment_id = %ctx.deployment_id(),
            percentage = percentage,
            "Shifting traffic to canary"
        );
        ctx.set_split("canary", percentage).await
    }

    async fn rollback(&self, ctx: &DeploymentContext) -> Result<()> {
        ctx.set_split("canary", 0).await
    }
}

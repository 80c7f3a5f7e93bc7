//! Rolling rollout
//!
//! Updates the stable fleet in place, bounded by max-unavailable and
//! max-surge. Rollback asks the substrate to revert the managed workload
//! to its previous revision.

use super::{base_name, phase_regions, Strategy};
use crate::context::DeploymentContext;
use crate::error::{DeploymentError, Result};
use async_trait::async_trait;
use plum_substrate::StrategyHint;
use plum_types::{DeployRequest, Phase, StrategyKind};

pub struct RollingStrategy;

impl RollingStrategy {
    fn hint(ctx: &DeploymentContext) -> StrategyHint {
        StrategyHint::Rolling {
            max_unavailable: ctx.request().max_unavailable.unwrap_or(1),
            max_surge: ctx.request().max_surge.unwrap_or(1),
        }
    }
}

#[async_trait]
impl Strategy for RollingStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Rolling
    }

    fn name(&self) -> &'static str {
        "rolling"
    }

    fn expand(&self, request: &DeployRequest) -> Vec<Phase> {
        super::expand_over_regions(request, || {
            vec![
                Phase::new("prepare-rolling"),
                Phase::new("execute-rolling"),
                Phase::new("verify"),
            ]
        })
    }

    async fn prepare(&self, phase: &Phase, ctx: &DeploymentContext) -> Result<()> {
        if base_name(phase) == "prepare-rolling" {
            ctx.ensure_scope(&ctx.scope_name("stable")).await?;
        }
        Ok(())
    }

    async fn act(&self, phase: &Phase, ctx: &DeploymentContext) -> Result<()> {
        let regions = phase_regions(phase, ctx);

        match base_name(phase) {
            "prepare-rolling" => {
                // Stage the new desired state; replacement begins in
                // execute-rolling.
                for region in &regions {
                    ctx.apply_variant("stable", region).await?;
                }
                Ok(())
            }
            "execute-rolling" => {
                for region in &regions {
                    ctx.rollout("stable", region, Self::hint(ctx)).await?;
                    ctx.wait_until_ready("stable", region).await?;
                }
                Ok(())
            }
            "verify" => ctx.verify_ready("stable", &regions).await,
            other => Err(DeploymentError::Internal(format!(
                "rolling has no phase {:?}",
                other
            ))),
        }
    }

    async fn rollback(&self, ctx: &DeploymentContext) -> Result<()> {
        for region in &ctx.request().regions {
            ctx.rollout("stable", region, StrategyHint::RollBack).await?;
        }
        Ok(())
    }
}

//! Blue-green rollout
//!
//! Builds a complete parallel green fleet, validates it, switches traffic
//! in one move, then tears the blue fleet down. Rollback reverts traffic
//! to blue and deletes the green scope, leaving client traffic untouched.

use super::{base_name, phase_regions, Strategy};
use crate::context::DeploymentContext;
use crate::error::{DeploymentError, Result};
use async_trait::async_trait;
use plum_types::{DeployRequest, Phase, StrategyKind};
use tracing::info;

pub struct BlueGreenStrategy;

#[async_trait]
impl Strategy for BlueGreenStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::BlueGreen
    }

    fn name(&self) -> &'static str {
        "blue-green"
    }

    fn expand(&self, request: &DeployRequest) -> Vec<Phase> {
        super::expand_over_regions(request, || {
            vec![
                Phase::new("prepare-green"),
                Phase::new("deploy-green"),
                Phase::new("validate-green"),
                Phase::new("switch-traffic"),
                Phase::new("cleanup-blue"),
            ]
        })
    }

    async fn prepare(&self, phase: &Phase, ctx: &DeploymentContext) -> Result<()> {
        if base_name(phase) == "prepare-green" {
            // Reuses a pre-existing green scope; ensure_scope is
            // idempotent at the substrate.
            ctx.ensure_scope(&ctx.scope_name("green")).await?;
        }
        Ok(())
    }

    async fn act(&self, phase: &Phase, ctx: &DeploymentContext) -> Result<()> {
        let regions = phase_regions(phase, ctx);

        match base_name(phase) {
            "prepare-green" => Ok(()),
            "deploy-green" => ctx.deploy_regions("green", &regions).await,
            "validate-green" => ctx.verify_ready("green", &regions).await,
            "switch-traffic" => {
                info!(deployment_id = %ctx.deployment_id(), "Switching traffic to green");
                ctx.set_split("green", 100).await
            }
            "cleanup-blue" => ctx.delete_scope(&ctx.scope_name("blue")).await,
            other => Err(DeploymentError::Internal(format!(
                "blue-green has no phase {:?}",
                other
            ))),
        }
    }

    async fn rollback(&self, ctx: &DeploymentContext) -> Result<()> {
        // Revert traffic to blue, then remove the green fleet. The blue
        // scope was never touched before cleanup-blue committed, so
        // client traffic is unchanged.
        ctx.set_split("green", 0).await?;
        ctx.delete_scope(&ctx.scope_name("green")).await?;
        Ok(())
    }
}

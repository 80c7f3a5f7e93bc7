//! Rollout strategy implementations
//!
//! A strategy expands into an ordered phase list and supplies the
//! prepare/act behavior for each phase plus a strategy-specific rollback.
//! Adding a strategy is adding one case to the dispatch table.

pub mod ab_test;
pub mod blue_green;
pub mod canary;
pub mod rolling;

pub use ab_test::AbTestStrategy;
pub use blue_green::BlueGreenStrategy;
pub use canary::CanaryStrategy;
pub use rolling::RollingStrategy;

use crate::context::DeploymentContext;
use crate::error::Result;
use async_trait::async_trait;
use plum_types::{DeployRequest, Phase, Region, RegionOrder, StrategyKind};
use std::sync::Arc;

/// Trait for rollout strategies
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Which strategy this is.
    fn kind(&self) -> StrategyKind;

    /// Strategy name for logging.
    fn name(&self) -> &'static str;

    /// Expand the request into the ordered phase list.
    fn expand(&self, request: &DeployRequest) -> Vec<Phase>;

    /// Strategy-specific setup for a phase. Idempotent.
    async fn prepare(&self, phase: &Phase, ctx: &DeploymentContext) -> Result<()>;

    /// The phase's irreversible change.
    async fn act(&self, phase: &Phase, ctx: &DeploymentContext) -> Result<()>;

    /// Undo the rollout: revert traffic and restore the incumbent.
    async fn rollback(&self, ctx: &DeploymentContext) -> Result<()>;
}

/// Dispatch table from strategy kind to implementation.
pub fn create_strategy(kind: StrategyKind) -> Arc<dyn Strategy> {
    match kind {
        StrategyKind::BlueGreen => Arc::new(BlueGreenStrategy),
        StrategyKind::Canary => Arc::new(CanaryStrategy),
        StrategyKind::Rolling => Arc::new(RollingStrategy),
        StrategyKind::AbTest => Arc::new(AbTestStrategy),
    }
}

/// Expand a single-region phase ladder across the request's regions.
///
/// Parallel rollouts keep one ladder whose phases fan out over every
/// region; sequential and canary-per-region rollouts repeat the ladder
/// per region, in configured order, with region-scoped phases.
pub(crate) fn expand_over_regions<F>(request: &DeployRequest, ladder: F) -> Vec<Phase>
where
    F: Fn() -> Vec<Phase>,
{
    match request.region_order {
        RegionOrder::Parallel => ladder(),
        RegionOrder::Sequential | RegionOrder::CanaryPerRegion => {
            let mut phases = Vec::new();
            for region in &request.regions {
                for phase in ladder() {
                    let name = format!("{}@{}", phase.name, region);
                    let mut scoped = phase.with_region(region.clone());
                    scoped.name = name;
                    phases.push(scoped);
                }
            }
            phases
        }
    }
}

/// The ladder-step name of a phase, with any region suffix stripped.
pub(crate) fn base_name(phase: &Phase) -> &str {
    phase.name.split('@').next().unwrap_or(&phase.name)
}

/// Regions a phase applies to.
pub(crate) fn phase_regions(phase: &Phase, ctx: &DeploymentContext) -> Vec<Region> {
    ctx.target_regions(phase.region.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(order: RegionOrder) -> DeployRequest {
        let mut req = DeployRequest::new(
            StrategyKind::BlueGreen,
            vec![Region::from("us-east"), Region::from("eu-west")],
        );
        req.region_order = order;
        req
    }

    #[test]
    fn test_parallel_keeps_one_ladder() {
        let req = request(RegionOrder::Parallel);
        let phases = expand_over_regions(&req, || vec![Phase::new("a"), Phase::new("b")]);

        assert_eq!(phases.len(), 2);
        assert!(phases.iter().all(|p| p.region.is_none()));
    }

    #[test]
    fn test_sequential_repeats_ladder_per_region_in_order() {
        let req = request(RegionOrder::Sequential);
        let phases = expand_over_regions(&req, || vec![Phase::new("a"), Phase::new("b")]);

        assert_eq!(phases.len(), 4);
        assert_eq!(phases[0].name, "a@us-east");
        assert_eq!(phases[1].name, "b@us-east");
        assert_eq!(phases[2].name, "a@eu-west");
        assert_eq!(phases[3].name, "b@eu-west");
        assert_eq!(phases[0].region, Some(Region::from("us-east")));
        assert_eq!(base_name(&phases[2]), "a");
    }
}

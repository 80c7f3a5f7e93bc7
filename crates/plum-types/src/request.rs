//! Deployment request payload and validation
//!
//! The request is an explicit configuration record; allowed values are
//! enumerated by the type system rather than checked against strings at
//! run time.

use crate::ids::Region;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Rollout strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyKind {
    /// Parallel green fleet, validate, switch, tear down blue.
    BlueGreen,

    /// Stepwise traffic shift through configured percentages.
    Canary,

    /// Gradual in-place replacement bounded by surge/unavailable.
    Rolling,

    /// Two variants, split traffic, promote the winner.
    AbTest,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyKind::BlueGreen => write!(f, "blue-green"),
            StrategyKind::Canary => write!(f, "canary"),
            StrategyKind::Rolling => write!(f, "rolling"),
            StrategyKind::AbTest => write!(f, "a-b"),
        }
    }
}

/// How regions are worked through during a rollout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegionOrder {
    /// All regions start concurrently; a phase commits when every region is
    /// healthy.
    Parallel,

    /// A region must commit before the next begins, in configured order.
    Sequential,

    /// Each region undergoes a full canary rollout before the next.
    CanaryPerRegion,
}

impl Default for RegionOrder {
    fn default() -> Self {
        RegionOrder::Parallel
    }
}

/// Circuit breaker configuration
///
/// A sample is *failing* when its error rate exceeds
/// `error_rate_threshold`. `failure_threshold` failing samples open the
/// breaker; `success_threshold` consecutive passing samples in half-open
/// close it again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Failing samples required to open the circuit.
    pub failure_threshold: u32,

    /// Consecutive passing half-open samples required to close the circuit.
    pub success_threshold: u32,

    /// Error rate above which a sample counts as failing (0.0 to 1.0).
    pub error_rate_threshold: f64,

    /// Time an open circuit waits before admitting half-open samples.
    #[serde(with = "duration_serde")]
    pub timeout: Duration,

    /// Sampler cadence; samples older than this never reach the breaker.
    #[serde(with = "duration_serde")]
    pub monitoring_window: Duration,

    /// Samples admitted while half-open.
    pub half_open_max_calls: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            error_rate_threshold: 0.05,
            timeout: Duration::from_secs(30),
            monitoring_window: Duration::from_secs(10),
            half_open_max_calls: 3,
        }
    }
}

/// Payload admitted to `Orchestrator::deploy`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployRequest {
    /// Strategy to drive the rollout.
    pub strategy: StrategyKind,

    /// Target regions; non-empty, order-significant when sequential.
    pub regions: Vec<Region>,

    /// Desired replicas per region.
    pub replicas: u32,

    /// Traffic percentages for canary steps; monotonically increasing and
    /// ending at 100. Defaults to `10, 25, 50, 100` when absent.
    pub rollout_percentages: Option<Vec<u8>>,

    /// Rolling: replicas that may be unavailable during the update.
    pub max_unavailable: Option<u32>,

    /// Rolling: extra replicas allowed during the update.
    pub max_surge: Option<u32>,

    /// Hard bound on each phase's act + observe steps.
    #[serde(with = "duration_serde")]
    pub progress_deadline: Duration,

    /// Added to every stabilization wait.
    #[serde(with = "duration_serde")]
    pub min_ready: Duration,

    /// Minimum interval during which health must hold for a phase to
    /// commit.
    #[serde(with = "duration_serde")]
    pub stabilization: Duration,

    /// How regions are ordered.
    pub region_order: RegionOrder,

    /// Circuit breaker configuration for this deployment.
    pub circuit_breaker: BreakerConfig,
}

impl DeployRequest {
    /// A request with sensible defaults for the given strategy and regions.
    pub fn new(strategy: StrategyKind, regions: Vec<Region>) -> Self {
        Self {
            strategy,
            regions,
            replicas: 2,
            rollout_percentages: None,
            max_unavailable: None,
            max_surge: None,
            progress_deadline: Duration::from_secs(600),
            min_ready: Duration::ZERO,
            stabilization: Duration::from_secs(60),
            region_order: RegionOrder::default(),
            circuit_breaker: BreakerConfig::default(),
        }
    }

    /// The canary percentage ladder, applying the default when unset.
    pub fn canary_percentages(&self) -> Vec<u8> {
        self.rollout_percentages
            .clone()
            .unwrap_or_else(|| vec![10, 25, 50, 100])
    }

    /// Validate the request. No state is created for an invalid request.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.regions.is_empty() {
            return Err(ValidationError::EmptyRegions);
        }
        if self.replicas == 0 {
            return Err(ValidationError::ZeroReplicas);
        }

        let mut seen = std::collections::HashSet::new();
        for region in &self.regions {
            if !seen.insert(region) {
                return Err(ValidationError::DuplicateRegion(region.to_string()));
            }
        }

        if let Some(percentages) = &self.rollout_percentages {
            if self.strategy != StrategyKind::Canary {
                return Err(ValidationError::PercentagesNotApplicable(self.strategy));
            }
            if percentages.is_empty() {
                return Err(ValidationError::EmptyPercentages);
            }
            if percentages.last() != Some(&100) {
                return Err(ValidationError::PercentagesMustEndAtHundred);
            }
            let monotonic = percentages.windows(2).all(|w| w[0] < w[1]);
            if !monotonic || percentages.iter().any(|p| *p == 0 || *p > 100) {
                return Err(ValidationError::PercentagesNotIncreasing);
            }
        }

        if (self.max_unavailable.is_some() || self.max_surge.is_some())
            && self.strategy != StrategyKind::Rolling
        {
            return Err(ValidationError::RollingBoundsNotApplicable(self.strategy));
        }

        if self.circuit_breaker.failure_threshold == 0
            || self.circuit_breaker.success_threshold == 0
        {
            return Err(ValidationError::BreakerThresholdZero);
        }
        if !(0.0..=1.0).contains(&self.circuit_breaker.error_rate_threshold) {
            return Err(ValidationError::BreakerRateOutOfRange(
                self.circuit_breaker.error_rate_threshold,
            ));
        }

        Ok(())
    }
}

/// Malformed request. Surfaced to the caller; no state is created.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("region list is empty")]
    EmptyRegions,

    #[error("region {0:?} appears more than once")]
    DuplicateRegion(String),

    #[error("replicas must be non-zero")]
    ZeroReplicas,

    #[error("rollout percentages are only valid for canary, not {0}")]
    PercentagesNotApplicable(StrategyKind),

    #[error("rollout percentage list is empty")]
    EmptyPercentages,

    #[error("rollout percentages must end at 100")]
    PercentagesMustEndAtHundred,

    #[error("rollout percentages must be strictly increasing within 1..=100")]
    PercentagesNotIncreasing,

    #[error("max_unavailable/max_surge are only valid for rolling, not {0}")]
    RollingBoundsNotApplicable(StrategyKind),

    #[error("circuit breaker thresholds must be non-zero")]
    BreakerThresholdZero,

    #[error("circuit breaker error rate threshold {0} outside 0.0..=1.0")]
    BreakerRateOutOfRange(f64),
}

/// Serde helper for Duration
pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_request_validates() {
        let req = DeployRequest::new(StrategyKind::BlueGreen, vec![Region::from("us-east")]);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_empty_regions_rejected() {
        let req = DeployRequest::new(StrategyKind::Rolling, vec![]);
        assert_eq!(req.validate(), Err(ValidationError::EmptyRegions));
    }

    #[test]
    fn test_canary_percentages_must_end_at_hundred() {
        let mut req = DeployRequest::new(StrategyKind::Canary, vec![Region::from("us-east")]);
        req.rollout_percentages = Some(vec![10, 50]);
        assert_eq!(
            req.validate(),
            Err(ValidationError::PercentagesMustEndAtHundred)
        );

        req.rollout_percentages = Some(vec![50, 10, 100]);
        assert_eq!(
            req.validate(),
            Err(ValidationError::PercentagesNotIncreasing)
        );

        req.rollout_percentages = Some(vec![100]);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_percentages_rejected_for_non_canary() {
        let mut req = DeployRequest::new(StrategyKind::Rolling, vec![Region::from("us-east")]);
        req.rollout_percentages = Some(vec![10, 100]);
        assert!(matches!(
            req.validate(),
            Err(ValidationError::PercentagesNotApplicable(_))
        ));
    }

    #[test]
    fn test_breaker_bounds() {
        let mut req = DeployRequest::new(StrategyKind::Canary, vec![Region::from("us-east")]);
        req.circuit_breaker.failure_threshold = 0;
        assert_eq!(req.validate(), Err(ValidationError::BreakerThresholdZero));

        req.circuit_breaker.failure_threshold = 3;
        req.circuit_breaker.error_rate_threshold = 1.5;
        assert!(matches!(
            req.validate(),
            Err(ValidationError::BreakerRateOutOfRange(_))
        ));
    }

    #[test]
    fn test_request_round_trips_through_json() {
        let req = DeployRequest::new(StrategyKind::Canary, vec![Region::from("us-east")]);
        let json = serde_json::to_string(&req).unwrap();
        let back: DeployRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, req);
    }
}

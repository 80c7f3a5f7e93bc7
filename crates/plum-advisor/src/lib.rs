//! PLUM Advisor - rightsizing and autoscaling recommendations
//!
//! A single coarse-cadence tick inspects each monitored plugin's rolling
//! resource-usage history and emits recommendations from a closed set:
//! reduce or raise CPU/memory requests, or enable horizontal autoscaling.
//! Applying a recommendation is the resource writer's job; by default the
//! advisor only emits.

#![deny(unsafe_code)]

pub mod advisor;
pub mod recommendation;

pub use advisor::{AdvisorConfig, ResourceAdvisor};
pub use recommendation::{Recommendation, RecommendationKind, RecommendationSeverity};

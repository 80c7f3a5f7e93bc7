//! PLUM Types - Core types for plugin deployment orchestration
//!
//! PLUM (Plugin Lifecycle & Upgrade Manager) is the control plane that
//! drives plugins through multi-phase rollouts on a container substrate.
//! This crate holds the shared data model; it has no I/O.
//!
//! ## Architectural Boundaries
//!
//! - **plum-deployment** owns: Deployment records, phase progression, rollback
//! - **plum-health** owns: per-plugin probe state, downtime and SLA accounting
//! - **plum-substrate** owns: the interfaces to the workload orchestrator,
//!   traffic router, observability collector, and resource writer
//!
//! ## Key Concepts
//!
//! - **PluginKey**: immutable `(name, version)` identity of a plugin
//! - **Deployment**: one rollout of a plugin, with an ordered phase list
//! - **Phase**: one externally observable step of a strategy
//! - **BreakerState**: the per-deployment circuit breaker tuple
//! - **Events**: unified observability stream

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod breaker;
pub mod deployment;
pub mod events;
pub mod ids;
pub mod metrics;
pub mod phase;
pub mod request;

// Re-export main types
pub use breaker::{BreakerState, CircuitState};
pub use deployment::{
    Deployment, DeploymentStatus, RegionState, RegionStatus, StateTransitionError,
};
pub use events::{EventSeverity, EventSource, PlumEvent, PlumEventEnvelope};
pub use ids::{DeploymentId, PluginKey, PluginKeyError, Region};
pub use metrics::{MetricsSample, ReplicaHealth, ResourceUsage};
pub use phase::{Phase, PhaseStatus};
pub use request::{
    BreakerConfig, DeployRequest, RegionOrder, StrategyKind, ValidationError,
};

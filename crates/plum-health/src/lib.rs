//! PLUM Health - probing, SLA accounting, sampling, circuit breaking
//!
//! The health side of the control plane is a pure observer: probes
//! classify, never raise; the monitor aggregates per-plugin results into
//! an overall status with downtime and SLA accounting; the sampler is the
//! single tick that feeds metric samples to circuit breakers and the
//! rolling history. Rollout decisions belong to `plum-deployment`.
//!
//! ## Ownership
//!
//! The monitor owns per-plugin probe state and exposes read-only
//! snapshots. Each circuit breaker lives with its deployment and is
//! mutated only through the sampler tick bound to it.

#![deny(unsafe_code)]

pub mod config;
pub mod downtime;
pub mod error;
pub mod monitor;
pub mod probes;
pub mod resilience;
pub mod sampler;
pub mod sla;

pub use config::{MonitorConfig, SlaTargets};
pub use downtime::{DowntimeEvent, DowntimeImpact, DowntimeLog};
pub use error::{HealthError, HealthResult};
pub use monitor::{FleetHealthSummary, HealthMonitor, HealthSnapshot, OverallHealth, PluginProbes};
pub use probes::{
    NetworkProbeExecutor, ProbeExecutor, ProbeKind, ProbeOutcome, ProbeSpec, ProbeStatus,
    StaticProbeExecutor,
};
pub use resilience::CircuitBreaker;
pub use sampler::MetricSampler;
pub use sla::{SlaPeriod, SlaReport, SlaViolation, ViolationSeverity};

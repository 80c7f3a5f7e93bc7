//! Observability collector interface
//!
//! The sole source of metric samples for the circuit breaker, and of the
//! resource usage readings the advisor consumes.

use crate::error::SubstrateResult;
use async_trait::async_trait;
use plum_types::{DeploymentId, MetricsSample, PluginKey, ResourceUsage};
use serde::{Deserialize, Serialize};

/// Liveness reading for a plugin's service endpoint
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EndpointStatus {
    /// Whether the endpoint answered.
    pub up: bool,

    /// Round-trip time in milliseconds.
    pub response_time_ms: f64,
}

/// Interface to the observability collaborator.
#[async_trait]
pub trait ObservabilityCollector: Send + Sync {
    /// Current error rate, latency percentiles, and throughput for a
    /// deployment's traffic.
    async fn sample(&self, deployment_id: &DeploymentId) -> SubstrateResult<MetricsSample>;

    /// Endpoint liveness for a plugin.
    async fn status(&self, plugin: &PluginKey) -> SubstrateResult<EndpointStatus>;

    /// Current resource consumption for a plugin's workload.
    async fn usage(&self, plugin: &PluginKey) -> SubstrateResult<ResourceUsage>;
}

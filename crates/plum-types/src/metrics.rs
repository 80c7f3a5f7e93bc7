//! Observed metric and resource records
//!
//! These are the wire shapes handed back by the observability collector and
//! the workload orchestrator. The sampler stamps them into phases and the
//! health monitor's rolling history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One sample of a deployment's observed behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSample {
    /// Fraction of requests that failed (0.0 to 1.0)
    pub error_rate: f64,

    /// Median latency in milliseconds
    pub latency_p50_ms: f64,

    /// 95th percentile latency in milliseconds
    pub latency_p95_ms: f64,

    /// 99th percentile latency in milliseconds
    pub latency_p99_ms: f64,

    /// Requests per second
    pub throughput_rps: f64,

    /// When the sample was taken
    pub sampled_at: DateTime<Utc>,
}

impl MetricsSample {
    /// A sample representing a quiet, healthy deployment. Useful as a
    /// starting point in tests and simulations.
    pub fn nominal() -> Self {
        Self {
            error_rate: 0.0,
            latency_p50_ms: 10.0,
            latency_p95_ms: 25.0,
            latency_p99_ms: 50.0,
            throughput_rps: 100.0,
            sampled_at: Utc::now(),
        }
    }

    /// Age of the sample relative to `now`.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.sampled_at)
    }
}

/// Replica readiness as reported by the workload orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaHealth {
    /// Replicas the workload wants running
    pub desired: u32,

    /// Replicas currently passing readiness
    pub ready: u32,
}

impl ReplicaHealth {
    /// Whether every desired replica is ready.
    pub fn is_ready(&self) -> bool {
        self.desired > 0 && self.ready >= self.desired
    }
}

/// One reading of a plugin's resource consumption
///
/// Feeds the resource advisor's rolling window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// Cores in use across replicas
    pub cpu_cores_used: f64,

    /// Cores requested per the workload spec
    pub cpu_cores_requested: f64,

    /// Bytes of memory in use across replicas
    pub memory_bytes_used: u64,

    /// Bytes of memory requested per the workload spec
    pub memory_bytes_requested: u64,

    /// Running replica count at observation time
    pub replicas: u32,

    /// When the reading was taken
    pub observed_at: DateTime<Utc>,
}

impl ResourceUsage {
    /// CPU utilization as a fraction of the request (0.0 to 1.0+).
    pub fn cpu_utilization(&self) -> f64 {
        if self.cpu_cores_requested <= 0.0 {
            return 0.0;
        }
        self.cpu_cores_used / self.cpu_cores_requested
    }

    /// Memory utilization as a fraction of the request (0.0 to 1.0+).
    pub fn memory_utilization(&self) -> f64 {
        if self.memory_bytes_requested == 0 {
            return 0.0;
        }
        self.memory_bytes_used as f64 / self.memory_bytes_requested as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replica_health_ready() {
        assert!(ReplicaHealth { desired: 3, ready: 3 }.is_ready());
        assert!(!ReplicaHealth { desired: 3, ready: 2 }.is_ready());
        assert!(!ReplicaHealth { desired: 0, ready: 0 }.is_ready());
    }

    #[test]
    fn test_utilization_fractions() {
        let usage = ResourceUsage {
            cpu_cores_used: 0.12,
            cpu_cores_requested: 1.0,
            memory_bytes_used: 256 << 20,
            memory_bytes_requested: 1024 << 20,
            replicas: 1,
            observed_at: Utc::now(),
        };

        assert!((usage.cpu_utilization() - 0.12).abs() < 1e-9);
        assert!((usage.memory_utilization() - 0.25).abs() < 1e-9);
    }
}

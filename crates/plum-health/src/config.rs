//! Health monitoring configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the health monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// How long sampled metrics and probe outcomes are retained.
    #[serde(with = "duration_secs")]
    pub retention: Duration,

    /// Cap on retained probe outcomes per plugin, independent of age.
    pub max_probe_history: usize,

    /// SLA targets checked by `sla_report`.
    pub sla: SlaTargets,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(24 * 60 * 60),
            max_probe_history: 4096,
            sla: SlaTargets::default(),
        }
    }
}

/// Targets against which SLA reports record violations.
///
/// A violation is `Critical` when the measured value crosses the target by
/// at least `hard_factor`, else `Warning`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaTargets {
    /// Minimum availability (0.0 to 1.0).
    pub availability: f64,

    /// Maximum p95 response time in milliseconds.
    pub response_time_p95_ms: f64,

    /// Maximum average error rate (0.0 to 1.0).
    pub error_rate: f64,

    /// Multiplier past which a violation is critical rather than warning.
    pub hard_factor: f64,
}

impl Default for SlaTargets {
    fn default() -> Self {
        Self {
            availability: 0.999,
            response_time_p95_ms: 500.0,
            error_rate: 0.01,
            hard_factor: 2.0,
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

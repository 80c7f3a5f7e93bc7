//! Recommendation records.

use chrono::{DateTime, Utc};
use plum_types::PluginKey;
use serde::{Deserialize, Serialize};

/// How urgently a recommendation should be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecommendationSeverity {
    /// Cost optimization; apply at leisure.
    Low,
    /// Sustained pressure; apply soon.
    Medium,
    /// Risk of throttling or OOM; apply now.
    High,
}

/// The closed set of actions the advisor can recommend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RecommendationKind {
    /// CPU request is far above sustained usage.
    ReduceCpuRequest {
        current_cores: f64,
        recommended_cores: f64,
    },

    /// CPU usage is pressing against the request.
    RaiseCpuRequest {
        current_cores: f64,
        recommended_cores: f64,
        recommended_limit_cores: f64,
    },

    /// Memory request is far above sustained usage.
    ReduceMemoryRequest {
        current_bytes: u64,
        recommended_bytes: u64,
    },

    /// Memory usage spiked near the request; raise before the OOM killer
    /// does it the hard way.
    RaiseMemoryLimit {
        current_bytes: u64,
        recommended_request_bytes: u64,
        recommended_limit_bytes: u64,
    },

    /// Single replica with volatile CPU; scale horizontally instead.
    EnableAutoscaling {
        min_replicas: u32,
        max_replicas: u32,
        target_cpu_percent: u8,
    },
}

impl RecommendationKind {
    /// Short slug for events and logs.
    pub fn label(&self) -> &'static str {
        match self {
            RecommendationKind::ReduceCpuRequest { .. } => "reduce-cpu-request",
            RecommendationKind::RaiseCpuRequest { .. } => "raise-cpu-request",
            RecommendationKind::ReduceMemoryRequest { .. } => "reduce-memory-request",
            RecommendationKind::RaiseMemoryLimit { .. } => "raise-memory-limit",
            RecommendationKind::EnableAutoscaling { .. } => "enable-autoscaling",
        }
    }
}

/// One recommendation for one plugin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    /// Plugin the recommendation targets.
    pub plugin: PluginKey,

    /// What to change.
    pub kind: RecommendationKind,

    /// Urgency.
    pub severity: RecommendationSeverity,

    /// Human-readable one-liner.
    pub summary: String,

    /// Projected monthly cost delta in dollars; positive is savings.
    pub projected_monthly_savings_usd: f64,

    /// When the advisor issued it.
    pub issued_at: DateTime<Utc>,
}

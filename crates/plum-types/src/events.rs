//! Event types for PLUM observability
//!
//! Events provide a unified, typed stream of rollout lifecycle activity.
//! Components emit them over a broadcast channel; the daemon forwards them
//! to the audit sink. There is no string-keyed subscription.

use crate::ids::{DeploymentId, PluginKey};
use crate::{CircuitState, PhaseStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope wrapping all PLUM events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlumEventEnvelope {
    /// Unique event ID
    pub id: Uuid,

    /// Event timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Event source
    pub source: EventSource,

    /// Event severity
    pub severity: EventSeverity,

    /// Correlation ID for tracing
    pub correlation_id: Option<String>,

    /// The actual event
    pub event: PlumEvent,
}

/// Event sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSource {
    /// Orchestrator admission and shutdown
    Orchestrator,
    /// Per-deployment driver
    Driver,
    /// Circuit breaker
    Breaker,
    /// Health monitoring
    Health,
    /// Metric sampler
    Sampler,
    /// Resource advisor
    Advisor,
}

/// Event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSeverity {
    /// Debug-level event
    Debug,
    /// Informational event
    Info,
    /// Warning event
    Warning,
    /// Error event
    Error,
    /// Critical event requiring immediate attention
    Critical,
}

/// PLUM events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PlumEvent {
    // ═══════════════════════════════════════════════════════════════════
    // DEPLOYMENT EVENTS
    // ═══════════════════════════════════════════════════════════════════
    /// Deployment admitted
    DeploymentAdmitted {
        deployment_id: DeploymentId,
        plugin: PluginKey,
    },

    /// Deployment's phase list started executing
    DeploymentStarted {
        deployment_id: DeploymentId,
    },

    /// Deployment completed
    DeploymentCompleted {
        deployment_id: DeploymentId,
        duration_seconds: u64,
    },

    /// Deployment failed
    DeploymentFailed {
        deployment_id: DeploymentId,
        reason: String,
    },

    /// Automatic rollback started
    RollbackStarted {
        deployment_id: DeploymentId,
        reason: String,
    },

    /// Rollback finished; the previous variant serves traffic
    RollbackCompleted {
        deployment_id: DeploymentId,
    },

    /// Rollback itself failed (double fault)
    RollbackFailed {
        deployment_id: DeploymentId,
        reason: String,
    },

    // ═══════════════════════════════════════════════════════════════════
    // PHASE EVENTS
    // ═══════════════════════════════════════════════════════════════════
    /// Phase picked up by the runner
    PhaseStarted {
        deployment_id: DeploymentId,
        phase: String,
    },

    /// Phase sealed
    PhaseSealed {
        deployment_id: DeploymentId,
        phase: String,
        status: PhaseStatus,
    },

    /// Traffic split changed
    TrafficShifted {
        deployment_id: DeploymentId,
        variant: String,
        percentage: u8,
    },

    // ═══════════════════════════════════════════════════════════════════
    // BREAKER EVENTS
    // ═══════════════════════════════════════════════════════════════════
    /// Circuit breaker changed state
    BreakerTransition {
        deployment_id: DeploymentId,
        from: CircuitState,
        to: CircuitState,
    },

    // ═══════════════════════════════════════════════════════════════════
    // HEALTH EVENTS
    // ═══════════════════════════════════════════════════════════════════
    /// Overall plugin health changed
    HealthChanged {
        plugin: PluginKey,
        old_status: String,
        new_status: String,
    },

    /// Downtime event opened
    DowntimeOpened {
        plugin: PluginKey,
        reason: String,
    },

    /// Downtime event resolved
    DowntimeResolved {
        plugin: PluginKey,
        duration_seconds: u64,
        impact: String,
    },

    /// An SLA target was crossed
    SlaViolation {
        plugin: PluginKey,
        metric: String,
        severity: String,
    },

    // ═══════════════════════════════════════════════════════════════════
    // ADVISOR EVENTS
    // ═══════════════════════════════════════════════════════════════════
    /// Rightsizing or autoscaling recommendation issued
    RecommendationIssued {
        plugin: PluginKey,
        kind: String,
        summary: String,
    },

    // ═══════════════════════════════════════════════════════════════════
    // LIFECYCLE EVENTS
    // ═══════════════════════════════════════════════════════════════════
    /// Graceful shutdown began
    ShutdownStarted,

    /// Shutdown finished
    ShutdownCompleted {
        /// Deployments that had to be force-failed past the timeout
        forced: u32,
    },
}

impl PlumEventEnvelope {
    /// Create a new event envelope
    pub fn new(event: PlumEvent, source: EventSource) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            source,
            severity: Self::infer_severity(&event),
            correlation_id: None,
            event,
        }
    }

    /// Create with correlation ID
    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Infer severity from event type
    fn infer_severity(event: &PlumEvent) -> EventSeverity {
        match event {
            PlumEvent::RollbackFailed { .. } => EventSeverity::Critical,

            PlumEvent::DeploymentFailed { .. } | PlumEvent::SlaViolation { .. } => {
                EventSeverity::Error
            }

            PlumEvent::RollbackStarted { .. }
            | PlumEvent::BreakerTransition { .. }
            | PlumEvent::DowntimeOpened { .. }
            | PlumEvent::HealthChanged { .. } => EventSeverity::Warning,

            _ => EventSeverity::Info,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_inference() {
        let id = DeploymentId::generate();

        let envelope = PlumEventEnvelope::new(
            PlumEvent::RollbackFailed {
                deployment_id: id.clone(),
                reason: "router unreachable".into(),
            },
            EventSource::Driver,
        );
        assert_eq!(envelope.severity, EventSeverity::Critical);

        let envelope = PlumEventEnvelope::new(
            PlumEvent::DeploymentStarted { deployment_id: id },
            EventSource::Driver,
        );
        assert_eq!(envelope.severity, EventSeverity::Info);
    }
}

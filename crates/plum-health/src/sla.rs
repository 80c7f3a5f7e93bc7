//! SLA reporting
//!
//! Availability, response time, and error rate over a requested period,
//! computed from the monitor's downtime ledger and sampled metrics. A
//! violation is recorded when a value crosses its configured target, with
//! `Critical` severity when it crosses by at least the hard factor.

use crate::config::SlaTargets;
use crate::downtime::DowntimeLog;
use chrono::{DateTime, Utc};
use plum_types::{MetricsSample, PluginKey};
use serde::{Deserialize, Serialize};

/// Reporting period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlaPeriod {
    Hour,
    Day,
    Week,
    Month,
}

impl SlaPeriod {
    /// Length of the period.
    pub fn duration(&self) -> chrono::Duration {
        match self {
            SlaPeriod::Hour => chrono::Duration::hours(1),
            SlaPeriod::Day => chrono::Duration::days(1),
            SlaPeriod::Week => chrono::Duration::weeks(1),
            SlaPeriod::Month => chrono::Duration::days(30),
        }
    }
}

impl std::fmt::Display for SlaPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SlaPeriod::Hour => write!(f, "hour"),
            SlaPeriod::Day => write!(f, "day"),
            SlaPeriod::Week => write!(f, "week"),
            SlaPeriod::Month => write!(f, "month"),
        }
    }
}

/// Severity of an SLA violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    Warning,
    Critical,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Warning => write!(f, "warning"),
            ViolationSeverity::Critical => write!(f, "critical"),
        }
    }
}

/// One crossed SLA target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaViolation {
    /// Which metric crossed: `availability`, `response_time_p95`, or
    /// `error_rate`.
    pub metric: String,

    /// Measured value over the period.
    pub measured: f64,

    /// Configured target.
    pub target: f64,

    /// Severity per the hard factor.
    pub severity: ViolationSeverity,
}

/// SLA metrics for one plugin over one period
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaReport {
    /// Plugin reported on.
    pub plugin: PluginKey,

    /// Reporting period.
    pub period: SlaPeriod,

    /// Fraction of the period the plugin was up (0.0 to 1.0).
    pub availability: f64,

    /// Total downtime within the period, in seconds.
    pub downtime_seconds: u64,

    /// Mean of sampled p95 response times, in milliseconds.
    pub response_time_p95_ms: f64,

    /// Mean of sampled error rates (0.0 to 1.0).
    pub error_rate: f64,

    /// Samples that informed the report.
    pub sample_count: usize,

    /// Targets crossed during the period.
    pub violations: Vec<SlaViolation>,

    /// When the report was generated.
    pub generated_at: DateTime<Utc>,
}

/// Build a report from the downtime ledger and the samples inside the
/// period window.
pub fn build_report(
    plugin: PluginKey,
    period: SlaPeriod,
    downtime: &DowntimeLog,
    samples: &[MetricsSample],
    targets: &SlaTargets,
) -> SlaReport {
    let now = Utc::now();
    let window_start = now - period.duration();

    let downtime_total = downtime.downtime_within(window_start, now);
    let period_seconds = period.duration().num_seconds() as f64;
    let downtime_seconds = downtime_total.num_seconds().max(0) as f64;
    let availability = (1.0 - downtime_seconds / period_seconds).clamp(0.0, 1.0);

    let in_window: Vec<&MetricsSample> = samples
        .iter()
        .filter(|s| s.sampled_at >= window_start)
        .collect();

    let (response_time_p95_ms, error_rate) = if in_window.is_empty() {
        (0.0, 0.0)
    } else {
        let n = in_window.len() as f64;
        (
            in_window.iter().map(|s| s.latency_p95_ms).sum::<f64>() / n,
            in_window.iter().map(|s| s.error_rate).sum::<f64>() / n,
        )
    };

    let mut violations = Vec::new();

    if availability < targets.availability {
        let unavailability = 1.0 - availability;
        let budget = 1.0 - targets.availability;
        violations.push(SlaViolation {
            metric: "availability".into(),
            measured: availability,
            target: targets.availability,
            severity: severity_for(unavailability, budget, targets.hard_factor),
        });
    }

    if !in_window.is_empty() && response_time_p95_ms > targets.response_time_p95_ms {
        violations.push(SlaViolation {
            metric: "response_time_p95".into(),
            measured: response_time_p95_ms,
            target: targets.response_time_p95_ms,
            severity: severity_for(
                response_time_p95_ms,
                targets.response_time_p95_ms,
                targets.hard_factor,
            ),
        });
    }

    if !in_window.is_empty() && error_rate > targets.error_rate {
        violations.push(SlaViolation {
            metric: "error_rate".into(),
            measured: error_rate,
            target: targets.error_rate,
            severity: severity_for(error_rate, targets.error_rate, targets.hard_factor),
        });
    }

    SlaReport {
        plugin,
        period,
        availability,
        downtime_seconds: downtime_seconds as u64,
        response_time_p95_ms,
        error_rate,
        sample_count: in_window.len(),
        violations,
        generated_at: now,
    }
}

/// Critical when the measured value crosses the target by at least the
/// hard factor.
fn severity_for(measured: f64, target: f64, hard_factor: f64) -> ViolationSeverity {
    if target > 0.0 && measured >= target * hard_factor {
        ViolationSeverity::Critical
    } else {
        ViolationSeverity::Warning
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plugin() -> PluginKey {
        PluginKey::new("payments", semver::Version::new(1, 0, 0)).unwrap()
    }

    fn sample(error_rate: f64, p95: f64) -> MetricsSample {
        MetricsSample {
            error_rate,
            latency_p50_ms: p95 / 2.0,
            latency_p95_ms: p95,
            latency_p99_ms: p95 * 1.5,
            throughput_rps: 50.0,
            sampled_at: Utc::now(),
        }
    }

    #[test]
    fn test_clean_period_has_no_violations() {
        let report = build_report(
            plugin(),
            SlaPeriod::Hour,
            &DowntimeLog::new(),
            &[sample(0.001, 80.0), sample(0.002, 90.0)],
            &SlaTargets::default(),
        );

        assert!(report.violations.is_empty());
        assert!((report.availability - 1.0).abs() < 1e-9);
        assert_eq!(report.sample_count, 2);
    }

    #[test]
    fn test_error_rate_violation_severity() {
        let targets = SlaTargets {
            error_rate: 0.01,
            hard_factor: 2.0,
            ..SlaTargets::default()
        };

        // Warning: above target but below target * hard_factor.
        let report = build_report(
            plugin(),
            SlaPeriod::Hour,
            &DowntimeLog::new(),
            &[sample(0.015, 80.0)],
            &targets,
        );
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].severity, ViolationSeverity::Warning);

        // Critical: at or past target * hard_factor.
        let report = build_report(
            plugin(),
            SlaPeriod::Hour,
            &DowntimeLog::new(),
            &[sample(0.05, 80.0)],
            &targets,
        );
        assert_eq!(report.violations[0].severity, ViolationSeverity::Critical);
    }

    #[test]
    fn test_downtime_reduces_availability() {
        use crate::downtime::{DowntimeEvent, DowntimeImpact};

        let started = Utc::now() - chrono::Duration::minutes(30);
        let log = DowntimeLog::from_events(vec![DowntimeEvent {
            started_at: started,
            ended_at: Some(started + chrono::Duration::minutes(6)),
            reason: "probe http failed".into(),
            impact: DowntimeImpact::Total,
            resolved: true,
            peak_failing: 1,
        }]);

        let report = build_report(
            plugin(),
            SlaPeriod::Hour,
            &log,
            &[],
            &SlaTargets::default(),
        );

        // Six minutes down in a one-hour window: 90% availability.
        assert!((report.availability - 0.9).abs() < 0.01);
        assert!(!report.violations.is_empty());
        assert_eq!(report.violations[0].metric, "availability");
        assert_eq!(
            report.violations[0].severity,
            ViolationSeverity::Critical
        );
    }
}

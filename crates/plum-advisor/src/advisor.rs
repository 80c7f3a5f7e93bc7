//! The resource advisor loop.
//!
//! On each tick the advisor reads current usage for every monitored
//! plugin from the observability collector, appends it to the plugin's
//! rolling window, and evaluates the window against the recommendation
//! rules. The evaluation itself is pure and separately testable.

use crate::recommendation::{Recommendation, RecommendationKind, RecommendationSeverity};
use chrono::Utc;
use dashmap::DashMap;
use plum_health::HealthMonitor;
use plum_substrate::{ObservabilityCollector, ResourceWriter};
use plum_types::{EventSource, PluginKey, PlumEvent, PlumEventEnvelope, ResourceUsage};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, instrument, warn};

const MIB: u64 = 1024 * 1024;

/// Advisor tuning.
#[derive(Debug, Clone)]
pub struct AdvisorConfig {
    /// Rolling window the rules evaluate over.
    pub window: Duration,

    /// Minimum samples before any rule fires.
    pub min_samples: usize,

    /// Dollars per core-month, for projected deltas.
    pub usd_per_core_month: f64,

    /// Dollars per GiB-month.
    pub usd_per_gib_month: f64,

    /// Apply recommendations through the resource writer instead of only
    /// emitting them.
    pub auto_apply: bool,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(24 * 60 * 60),
            min_samples: 12,
            usd_per_core_month: 30.0,
            usd_per_gib_month: 4.0,
            auto_apply: false,
        }
    }
}

/// Generates rightsizing and autoscaling recommendations.
pub struct ResourceAdvisor {
    config: AdvisorConfig,
    collector: Arc<dyn ObservabilityCollector>,
    monitor: Arc<HealthMonitor>,
    writer: Arc<dyn ResourceWriter>,
    history: DashMap<PluginKey, VecDeque<ResourceUsage>>,
    event_tx: broadcast::Sender<PlumEventEnvelope>,
}

impl ResourceAdvisor {
    pub fn new(
        config: AdvisorConfig,
        collector: Arc<dyn ObservabilityCollector>,
        monitor: Arc<HealthMonitor>,
        writer: Arc<dyn ResourceWriter>,
        event_tx: broadcast::Sender<PlumEventEnvelope>,
    ) -> Self {
        Self {
            config,
            collector,
            monitor,
            writer,
            history: DashMap::new(),
            event_tx,
        }
    }

    /// One advisor pass: refresh usage for every monitored plugin and
    /// evaluate the rules. Returns the recommendations issued.
    #[instrument(skip(self))]
    pub async fn tick(&self) -> Vec<Recommendation> {
        let mut issued = Vec::new();

        for plugin in self.monitor.monitored_plugins() {
            match self.collector.usage(&plugin).await {
                Ok(usage) => self.record_usage(&plugin, usage),
                Err(e) => {
                    debug!(plugin = %plugin, error = %e, "No usage reading");
                    continue;
                }
            }

            let window: Vec<ResourceUsage> = self
                .history
                .get(&plugin)
                .map(|h| h.iter().cloned().collect())
                .unwrap_or_default();

            for recommendation in self.evaluate(&plugin, &window) {
                info!(
                    plugin = %plugin,
                    kind = recommendation.kind.label(),
                    savings = recommendation.projected_monthly_savings_usd,
                    "Recommendation issued"
                );
                let _ = self.event_tx.send(PlumEventEnvelope::new(
                    PlumEvent::RecommendationIssued {
                        plugin: plugin.clone(),
                        kind: recommendation.kind.label().to_string(),
                        summary: recommendation.summary.clone(),
                    },
                    EventSource::Advisor,
                ));

                if self.config.auto_apply {
                    match serde_json::to_value(&recommendation) {
                        Ok(payload) => {
                            if let Err(e) =
                                self.writer.apply_recommendation(&plugin, payload).await
                            {
                                warn!(plugin = %plugin, error = %e, "Writer rejected recommendation");
                            }
                        }
                        Err(e) => {
                            warn!(plugin = %plugin, error = %e, "Recommendation not serializable")
                        }
                    }
                }

                issued.push(recommendation);
            }
        }

        issued
    }

    /// Append a usage reading, trimming the window.
    pub fn record_usage(&self, plugin: &PluginKey, usage: ResourceUsage) {
        let mut history = self.history.entry(plugin.clone()).or_default();
        history.push_back(usage);

        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.window)
                .unwrap_or_else(|_| chrono::Duration::zero());
        while history
            .front()
            .map(|u| u.observed_at < cutoff)
            .unwrap_or(false)
        {
            history.pop_front();
        }
    }

    /// Evaluate the recommendation rules over one plugin's window.
    pub fn evaluate(&self, plugin: &PluginKey, window: &[ResourceUsage]) -> Vec<Recommendation> {
        if window.len() < self.config.min_samples {
            return Vec::new();
        }

        let mut out = Vec::new();
        let latest = match window.last() {
            Some(l) => l,
            None => return Vec::new(),
        };
        let n = window.len() as f64;
        let replicas = latest.replicas.max(1) as f64;

        let cpu_utils: Vec<f64> = window.iter().map(|u| u.cpu_utilization()).collect();
        let mem_utils: Vec<f64> = window.iter().map(|u| u.memory_utilization()).collect();
        let mean_cpu_used = window.iter().map(|u| u.cpu_cores_used).sum::<f64>() / n;

        // Sustained CPU idleness: request far above what the plugin uses.
        let low_cpu_share = cpu_utils.iter().filter(|u| **u < 0.20).count() as f64 / n;
        if low_cpu_share >= 0.80 {
            let recommended = (mean_cpu_used * 1.2).max(0.1);
            if recommended < latest.cpu_cores_requested {
                let saved_cores = (latest.cpu_cores_requested - recommended) * replicas;
                out.push(Recommendation {
                    plugin: plugin.clone(),
                    kind: RecommendationKind::ReduceCpuRequest {
                        current_cores: latest.cpu_cores_requested,
                        recommended_cores: recommended,
                    },
                    severity: RecommendationSeverity::Low,
                    summary: format!(
                        "CPU request {:.2} cores, sustained usage {:.2}: reduce to {:.2}",
                        latest.cpu_cores_requested, mean_cpu_used, recommended
                    ),
                    projected_monthly_savings_usd: saved_cores * self.config.usd_per_core_month,
                    issued_at: Utc::now(),
                });
            }
        }

        // Sustained CPU pressure.
        let high_cpu_share = cpu_utils.iter().filter(|u| **u > 0.80).count() as f64 / n;
        if high_cpu_share >= 0.20 {
            let recommended = mean_cpu_used * 1.5;
            if recommended > latest.cpu_cores_requested {
                let added_cores = (recommended - latest.cpu_cores_requested) * replicas;
                out.push(Recommendation {
                    plugin: plugin.clone(),
                    kind: RecommendationKind::RaiseCpuRequest {
                        current_cores: latest.cpu_cores_requested,
                        recommended_cores: recommended,
                        recommended_limit_cores: mean_cpu_used * 2.0,
                    },
                    severity: RecommendationSeverity::Medium,
                    summary: format!(
                        "CPU pressure in {:.0}% of window: raise request to {:.2} cores",
                        high_cpu_share * 100.0,
                        recommended
                    ),
                    projected_monthly_savings_usd: -(added_cores
                        * self.config.usd_per_core_month),
                    issued_at: Utc::now(),
                });
            }
        }

        // Sustained memory idleness.
        let mean_mem_used = window.iter().map(|u| u.memory_bytes_used).sum::<u64>() / window.len() as u64;
        let low_mem_share = mem_utils.iter().filter(|u| **u < 0.30).count() as f64 / n;
        if low_mem_share >= 0.80 {
            let recommended = ((mean_mem_used as f64 * 1.3) as u64).max(64 * MIB);
            if recommended < latest.memory_bytes_requested {
                let saved_gib = (latest.memory_bytes_requested - recommended) as f64
                    / (1024.0 * 1024.0 * 1024.0)
                    * replicas;
                out.push(Recommendation {
                    plugin: plugin.clone(),
                    kind: RecommendationKind::ReduceMemoryRequest {
                        current_bytes: latest.memory_bytes_requested,
                        recommended_bytes: recommended,
                    },
                    severity: RecommendationSeverity::Low,
                    summary: format!(
                        "Memory request {} MiB, sustained usage {} MiB: reduce to {} MiB",
                        latest.memory_bytes_requested / MIB,
                        mean_mem_used / MIB,
                        recommended / MIB
                    ),
                    projected_monthly_savings_usd: saved_gib * self.config.usd_per_gib_month,
                    issued_at: Utc::now(),
                });
            }
        }

        // Any brush with the memory ceiling gets headroom immediately.
        if let Some(peak) = window
            .iter()
            .filter(|u| u.memory_utilization() > 0.90)
            .max_by(|a, b| a.memory_bytes_used.cmp(&b.memory_bytes_used))
        {
            let request = (peak.memory_bytes_used as f64 * 1.5) as u64;
            let limit = peak.memory_bytes_used * 2;
            let added_gib = request.saturating_sub(latest.memory_bytes_requested) as f64
                / (1024.0 * 1024.0 * 1024.0)
                * replicas;
            out.push(Recommendation {
                plugin: plugin.clone(),
                kind: RecommendationKind::RaiseMemoryLimit {
                    current_bytes: latest.memory_bytes_requested,
                    recommended_request_bytes: request,
                    recommended_limit_bytes: limit,
                },
                severity: RecommendationSeverity::High,
                summary: format!(
                    "Memory peaked at {} MiB ({:.0}% of request): raise request/limit to {}/{} MiB",
                    peak.memory_bytes_used / MIB,
                    peak.memory_utilization() * 100.0,
                    request / MIB,
                    limit / MIB
                ),
                projected_monthly_savings_usd: -(added_gib * self.config.usd_per_gib_month),
                issued_at: Utc::now(),
            });
        }

        // Single replica with volatile CPU: horizontal headroom beats a
        // bigger box.
        if latest.replicas == 1 && cpu_volatility(&cpu_utils) > 0.5 {
            out.push(Recommendation {
                plugin: plugin.clone(),
                kind: RecommendationKind::EnableAutoscaling {
                    min_replicas: 1,
                    max_replicas: 5,
                    target_cpu_percent: 70,
                },
                severity: RecommendationSeverity::Medium,
                summary: "Single replica with volatile CPU: enable autoscaling 1-5 at 70%".into(),
                projected_monthly_savings_usd: 0.0,
                issued_at: Utc::now(),
            });
        }

        out
    }

    /// Run the advisor until `shutdown` flips true.
    pub async fn run(
        self: Arc<Self>,
        cadence: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut interval = tokio::time::interval(cadence);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let issued = self.tick().await;
                    if !issued.is_empty() {
                        debug!(count = issued.len(), "Advisor pass issued recommendations");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }
}

/// Coefficient of variation of CPU utilization.
fn cpu_volatility(utils: &[f64]) -> f64 {
    if utils.is_empty() {
        return 0.0;
    }
    let n = utils.len() as f64;
    let mean = utils.iter().sum::<f64>() / n;
    if mean <= f64::EPSILON {
        return 0.0;
    }
    let variance = utils.iter().map(|u| (u - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt() / mean
}

#[cfg(test)]
mod tests {
    use super::*;
    use plum_health::{MonitorConfig, StaticProbeExecutor};
    use plum_substrate::{SimulatedCollector, SimulatedWriter};

    fn plugin() -> PluginKey {
        PluginKey::new("payments", semver::Version::new(1, 2, 3)).unwrap()
    }

    fn advisor() -> ResourceAdvisor {
        let (event_tx, _) = broadcast::channel(256);
        let collector = Arc::new(SimulatedCollector::new());
        let monitor = Arc::new(HealthMonitor::new(
            MonitorConfig::default(),
            Arc::new(StaticProbeExecutor::passing()),
            event_tx.clone(),
        ));
        ResourceAdvisor::new(
            AdvisorConfig::default(),
            collector,
            monitor,
            Arc::new(SimulatedWriter::new()),
            event_tx,
        )
    }

    fn usage(cpu_used: f64, cpu_req: f64, mem_used: u64, mem_req: u64, replicas: u32) -> ResourceUsage {
        ResourceUsage {
            cpu_cores_used: cpu_used,
            cpu_cores_requested: cpu_req,
            memory_bytes_used: mem_used,
            memory_bytes_requested: mem_req,
            replicas,
            observed_at: Utc::now(),
        }
    }

    #[test]
    fn test_sustained_idle_cpu_triggers_rightsizing() {
        let advisor = advisor();

        // 12% CPU utilization across the whole window, memory at half.
        let window: Vec<ResourceUsage> = (0..24)
            .map(|_| usage(0.12, 1.0, 512 * MIB, 1024 * MIB, 2))
            .collect();

        let recs = advisor.evaluate(&plugin(), &window);
        assert_eq!(recs.len(), 1);

        match &recs[0].kind {
            RecommendationKind::ReduceCpuRequest {
                recommended_cores, ..
            } => {
                // usage * 1.2
                assert!((recommended_cores - 0.144).abs() < 1e-6);
            }
            other => panic!("expected ReduceCpuRequest, got {:?}", other),
        }
        assert!(recs[0].projected_monthly_savings_usd > 0.0);
    }

    #[test]
    fn test_cpu_floor_is_applied() {
        let advisor = advisor();
        let window: Vec<ResourceUsage> = (0..24)
            .map(|_| usage(0.01, 1.0, 512 * MIB, 1024 * MIB, 1))
            .collect();

        let recs = advisor.evaluate(&plugin(), &window);
        let reduce = recs
            .iter()
            .find_map(|r| match &r.kind {
                RecommendationKind::ReduceCpuRequest {
                    recommended_cores, ..
                } => Some(*recommended_cores),
                _ => None,
            })
            .unwrap();
        assert!((reduce - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_memory_spike_raises_limit() {
        let advisor = advisor();

        let mut window: Vec<ResourceUsage> = (0..23)
            .map(|_| usage(0.5, 1.0, 512 * MIB, 1024 * MIB, 2))
            .collect();
        // One sample at 95% of the request.
        window.push(usage(0.5, 1.0, 973 * MIB, 1024 * MIB, 2));

        let recs = advisor.evaluate(&plugin(), &window);
        let raise = recs
            .iter()
            .find(|r| matches!(r.kind, RecommendationKind::RaiseMemoryLimit { .. }))
            .expect("expected RaiseMemoryLimit");

        assert_eq!(raise.severity, RecommendationSeverity::High);
        assert!(raise.projected_monthly_savings_usd <= 0.0);
    }

    #[test]
    fn test_volatile_single_replica_enables_autoscaling() {
        let advisor = advisor();

        // Alternate between idle and saturated CPU on one replica.
        let window: Vec<ResourceUsage> = (0..24)
            .map(|i| {
                let cpu = if i % 2 == 0 { 0.05 } else { 0.95 };
                usage(cpu, 1.0, 800 * MIB, 1024 * MIB, 1)
            })
            .collect();

        let recs = advisor.evaluate(&plugin(), &window);
        assert!(recs
            .iter()
            .any(|r| matches!(r.kind, RecommendationKind::EnableAutoscaling { .. })));
    }

    #[test]
    fn test_short_window_stays_quiet() {
        let advisor = advisor();
        let window: Vec<ResourceUsage> =
            (0..4).map(|_| usage(0.05, 1.0, 100 * MIB, 1024 * MIB, 1)).collect();

        assert!(advisor.evaluate(&plugin(), &window).is_empty());
    }
}

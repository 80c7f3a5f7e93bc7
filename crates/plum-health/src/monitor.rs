//! Health monitor for continuous plugin monitoring.
//!
//! One task per probe, independent timers. After every probe completion
//! the overall status is recomputed under the plugin's exclusion region;
//! downtime events open and close on the unhealthy boundary. The monitor
//! is a pure observer: it never fails a deployment itself.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use plum_types::{EventSource, MetricsSample, PluginKey, PlumEvent, PlumEventEnvelope};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use crate::config::MonitorConfig;
use crate::downtime::{DowntimeEvent, DowntimeLog};
use crate::error::{HealthError, HealthResult};
use crate::probes::{ProbeExecutor, ProbeOutcome, ProbeSpec, ProbeStatus};
use crate::sla::{self, SlaPeriod, SlaReport};

/// Overall health of a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverallHealth {
    /// Every completed probe passed.
    Healthy,

    /// No probe failed, but at least one warned.
    Degraded,

    /// At least one probe failed.
    Unhealthy,

    /// No probe has completed yet.
    Unknown,
}

impl std::fmt::Display for OverallHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverallHealth::Healthy => write!(f, "healthy"),
            OverallHealth::Degraded => write!(f, "degraded"),
            OverallHealth::Unhealthy => write!(f, "unhealthy"),
            OverallHealth::Unknown => write!(f, "unknown"),
        }
    }
}

/// Probe configuration for one plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginProbes {
    /// Probes to run, each on its own period.
    pub probes: Vec<ProbeSpec>,
}

impl PluginProbes {
    pub fn new(probes: Vec<ProbeSpec>) -> Self {
        Self { probes }
    }
}

/// Read-only view of a plugin's health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// Plugin observed.
    pub plugin: PluginKey,

    /// Overall status.
    pub overall: OverallHealth,

    /// Latest outcome per probe name.
    pub latest: HashMap<String, ProbeOutcome>,

    /// The unresolved downtime event, if one is open.
    pub open_downtime: Option<DowntimeEvent>,

    /// Count of downtime events in the retained window.
    pub downtime_events: usize,

    /// When the snapshot's state last changed.
    pub updated_at: DateTime<Utc>,
}

/// Aggregate health across every monitored plugin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetHealthSummary {
    pub total_plugins: usize,
    pub healthy_count: usize,
    pub degraded_count: usize,
    pub unhealthy_count: usize,
    pub unknown_count: usize,
    pub open_downtimes: usize,
    pub summarized_at: DateTime<Utc>,
}

struct PluginState {
    plugin: PluginKey,
    probes: Vec<ProbeSpec>,
    inner: Mutex<PluginInner>,
}

struct PluginInner {
    overall: OverallHealth,
    latest: HashMap<String, ProbeOutcome>,
    probe_history: VecDeque<ProbeOutcome>,
    samples: VecDeque<MetricsSample>,
    downtime: DowntimeLog,
    updated_at: DateTime<Utc>,
}

/// Health monitor for all registered plugins.
pub struct HealthMonitor {
    config: MonitorConfig,
    executor: Arc<dyn ProbeExecutor>,
    plugins: DashMap<PluginKey, Arc<PluginState>>,
    handles: DashMap<PluginKey, Vec<JoinHandle<()>>>,
    event_tx: broadcast::Sender<PlumEventEnvelope>,
}

impl HealthMonitor {
    /// Create a monitor that runs probes through `executor` and emits
    /// events on `event_tx`.
    pub fn new(
        config: MonitorConfig,
        executor: Arc<dyn ProbeExecutor>,
        event_tx: broadcast::Sender<PlumEventEnvelope>,
    ) -> Self {
        Self {
            config,
            executor,
            plugins: DashMap::new(),
            handles: DashMap::new(),
            event_tx,
        }
    }

    /// Begin periodic probing for a plugin.
    ///
    /// Fails with `AlreadyMonitored` when started twice without an
    /// intervening stop.
    #[instrument(skip(self, config), fields(plugin = %plugin))]
    pub fn start(&self, plugin: PluginKey, config: PluginProbes) -> HealthResult<()> {
        if config.probes.is_empty() {
            return Err(HealthError::NoProbes(plugin));
        }
        if self.plugins.contains_key(&plugin) {
            return Err(HealthError::AlreadyMonitored(plugin));
        }

        info!(plugin = %plugin, probes = config.probes.len(), "Starting health monitoring");

        let state = Arc::new(PluginState {
            plugin: plugin.clone(),
            probes: config.probes.clone(),
            inner: Mutex::new(PluginInner {
                overall: OverallHealth::Unknown,
                latest: HashMap::new(),
                probe_history: VecDeque::new(),
                samples: VecDeque::new(),
                downtime: DowntimeLog::new(),
                updated_at: Utc::now(),
            }),
        });
        self.plugins.insert(plugin.clone(), state.clone());

        // One independent timer per probe; a failing probe never cancels
        // its peers.
        let mut handles = Vec::with_capacity(config.probes.len());
        for spec in config.probes {
            let state = state.clone();
            let executor = self.executor.clone();
            let event_tx = self.event_tx.clone();
            let monitor_config = self.config.clone();

            handles.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(spec.period);
                loop {
                    interval.tick().await;
                    let outcome = executor.execute(&spec).await;
                    record_outcome(&state, outcome, &event_tx, &monitor_config);
                }
            }));
        }
        self.handles.insert(plugin, handles);

        Ok(())
    }

    /// Stop probing a plugin and drop its state. Idempotent.
    #[instrument(skip(self), fields(plugin = %plugin))]
    pub fn stop(&self, plugin: &PluginKey) {
        if let Some((_, handles)) = self.handles.remove(plugin) {
            for handle in handles {
                handle.abort();
            }
        }
        if self.plugins.remove(plugin).is_some() {
            info!(plugin = %plugin, "Stopped health monitoring");
        }
    }

    /// Whether the plugin is currently monitored.
    pub fn is_monitoring(&self, plugin: &PluginKey) -> bool {
        self.plugins.contains_key(plugin)
    }

    /// Latest health snapshot for a plugin.
    pub fn status(&self, plugin: &PluginKey) -> HealthResult<HealthSnapshot> {
        let state = self
            .plugins
            .get(plugin)
            .ok_or_else(|| HealthError::NotMonitored(plugin.clone()))?;

        let inner = state.inner.lock().unwrap();
        Ok(HealthSnapshot {
            plugin: plugin.clone(),
            overall: inner.overall,
            latest: inner.latest.clone(),
            open_downtime: inner.downtime.open_event().cloned(),
            downtime_events: inner.downtime.events().len(),
            updated_at: inner.updated_at,
        })
    }

    /// Overall health only; `Unknown` for unmonitored plugins.
    pub fn overall(&self, plugin: &PluginKey) -> OverallHealth {
        self.plugins
            .get(plugin)
            .map(|s| s.inner.lock().unwrap().overall)
            .unwrap_or(OverallHealth::Unknown)
    }

    /// Record a metric sample into the plugin's rolling history.
    ///
    /// Called by the metric sampler; history is trimmed to the configured
    /// retention.
    pub fn record_sample(&self, plugin: &PluginKey, sample: MetricsSample) {
        if let Some(state) = self.plugins.get(plugin) {
            let mut inner = state.inner.lock().unwrap();
            inner.samples.push_back(sample);

            let cutoff = Utc::now()
                - chrono::Duration::from_std(self.config.retention)
                    .unwrap_or_else(|_| chrono::Duration::zero());
            while inner
                .samples
                .front()
                .map(|s| s.sampled_at < cutoff)
                .unwrap_or(false)
            {
                inner.samples.pop_front();
            }
        }
    }

    /// Most recent metric samples, newest last, bounded by `limit`.
    pub fn recent_samples(&self, plugin: &PluginKey, limit: usize) -> Vec<MetricsSample> {
        self.plugins
            .get(plugin)
            .map(|state| {
                let inner = state.inner.lock().unwrap();
                inner
                    .samples
                    .iter()
                    .rev()
                    .take(limit)
                    .rev()
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Most recent probe outcomes, newest last, bounded by `limit`.
    pub fn recent_probes(&self, plugin: &PluginKey, limit: usize) -> Vec<ProbeOutcome> {
        self.plugins
            .get(plugin)
            .map(|state| {
                let inner = state.inner.lock().unwrap();
                inner
                    .probe_history
                    .iter()
                    .rev()
                    .take(limit)
                    .rev()
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// SLA report over the requested period.
    pub fn sla_report(&self, plugin: &PluginKey, period: SlaPeriod) -> HealthResult<SlaReport> {
        let state = self
            .plugins
            .get(plugin)
            .ok_or_else(|| HealthError::NotMonitored(plugin.clone()))?;

        let (downtime, samples) = {
            let inner = state.inner.lock().unwrap();
            (
                inner.downtime.clone(),
                inner.samples.iter().cloned().collect::<Vec<_>>(),
            )
        };

        let report = sla::build_report(plugin.clone(), period, &downtime, &samples, &self.config.sla);

        for violation in &report.violations {
            let _ = self.event_tx.send(PlumEventEnvelope::new(
                PlumEvent::SlaViolation {
                    plugin: plugin.clone(),
                    metric: violation.metric.clone(),
                    severity: violation.severity.to_string(),
                },
                EventSource::Health,
            ));
        }

        Ok(report)
    }

    /// Aggregate health across every monitored plugin.
    pub fn fleet_summary(&self) -> FleetHealthSummary {
        let mut summary = FleetHealthSummary {
            total_plugins: 0,
            healthy_count: 0,
            degraded_count: 0,
            unhealthy_count: 0,
            unknown_count: 0,
            open_downtimes: 0,
            summarized_at: Utc::now(),
        };

        for entry in self.plugins.iter() {
            let inner = entry.value().inner.lock().unwrap();
            summary.total_plugins += 1;
            match inner.overall {
                OverallHealth::Healthy => summary.healthy_count += 1,
                OverallHealth::Degraded => summary.degraded_count += 1,
                OverallHealth::Unhealthy => summary.unhealthy_count += 1,
                OverallHealth::Unknown => summary.unknown_count += 1,
            }
            if inner.downtime.open_event().is_some() {
                summary.open_downtimes += 1;
            }
        }

        summary
    }

    /// Plugins currently monitored.
    pub fn monitored_plugins(&self) -> Vec<PluginKey> {
        self.plugins.iter().map(|e| e.key().clone()).collect()
    }

    /// Abort every probe task. Used at shutdown.
    pub fn stop_all(&self) {
        info!("Stopping all health monitoring");
        for entry in self.handles.iter() {
            for handle in entry.value() {
                handle.abort();
            }
        }
        self.handles.clear();
        self.plugins.clear();
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        for entry in self.handles.iter() {
            for handle in entry.value() {
                handle.abort();
            }
        }
    }
}

/// Fold one probe outcome into the plugin's state and recompute overall
/// health, opening or closing downtime events on the unhealthy boundary.
fn record_outcome(
    state: &PluginState,
    outcome: ProbeOutcome,
    event_tx: &broadcast::Sender<PlumEventEnvelope>,
    config: &MonitorConfig,
) {
    let mut inner = state.inner.lock().unwrap();

    debug!(
        plugin = %state.plugin,
        probe = %outcome.probe,
        status = %outcome.status,
        "Probe completed"
    );

    inner.latest.insert(outcome.probe.clone(), outcome.clone());
    inner.probe_history.push_back(outcome);
    while inner.probe_history.len() > config.max_probe_history {
        inner.probe_history.pop_front();
    }

    let (failing_count, reason, warning, completed) = {
        let failing: Vec<&ProbeOutcome> = inner
            .latest
            .values()
            .filter(|o| o.status == ProbeStatus::Fail)
            .collect();
        let warning = inner
            .latest
            .values()
            .any(|o| o.status == ProbeStatus::Warn);
        let reason = failing
            .first()
            .map(|o| {
                o.message
                    .clone()
                    .unwrap_or_else(|| format!("probe {} failed", o.probe))
            })
            .unwrap_or_default();
        (failing.len(), reason, warning, !inner.latest.is_empty())
    };

    let new_overall = if failing_count > 0 {
        OverallHealth::Unhealthy
    } else if warning {
        OverallHealth::Degraded
    } else if !completed {
        OverallHealth::Unknown
    } else {
        OverallHealth::Healthy
    };

    let old_overall = inner.overall;
    inner.overall = new_overall;
    inner.updated_at = Utc::now();

    if new_overall == OverallHealth::Unhealthy {
        if old_overall != OverallHealth::Unhealthy {
            inner.downtime.open(reason.clone(), failing_count);
            let _ = event_tx.send(PlumEventEnvelope::new(
                PlumEvent::DowntimeOpened {
                    plugin: state.plugin.clone(),
                    reason,
                },
                EventSource::Health,
            ));
        }
        inner.downtime.observe_failing(failing_count);
    } else if new_overall == OverallHealth::Healthy && old_overall == OverallHealth::Unhealthy {
        if let Some(closed) = inner.downtime.close(state.probes.len()) {
            let _ = event_tx.send(PlumEventEnvelope::new(
                PlumEvent::DowntimeResolved {
                    plugin: state.plugin.clone(),
                    duration_seconds: closed
                        .duration()
                        .map(|d| d.num_seconds().max(0) as u64)
                        .unwrap_or(0),
                    impact: closed.impact.to_string(),
                },
                EventSource::Health,
            ));
        }
    }

    if old_overall != new_overall {
        info!(
            plugin = %state.plugin,
            old_status = %old_overall,
            new_status = %new_overall,
            "Health status changed"
        );
        let _ = event_tx.send(PlumEventEnvelope::new(
            PlumEvent::HealthChanged {
                plugin: state.plugin.clone(),
                old_status: old_overall.to_string(),
                new_status: new_overall.to_string(),
            },
            EventSource::Health,
        ));
    }

    // Age out probe outcomes past the retention window.
    let cutoff = Utc::now()
        - chrono::Duration::from_std(config.retention)
            .unwrap_or_else(|_| chrono::Duration::zero());
    while inner
        .probe_history
        .front()
        .map(|o| o.observed_at < cutoff)
        .unwrap_or(false)
    {
        inner.probe_history.pop_front();
    }
    inner.downtime.trim(cutoff);
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Executor returning scripted statuses per probe name, then passing.
    struct ScriptedExecutor {
        script: DashMap<String, VecDeque<ProbeStatus>>,
    }

    impl ScriptedExecutor {
        fn new() -> Self {
            Self {
                script: DashMap::new(),
            }
        }

        fn push(&self, probe: &str, statuses: Vec<ProbeStatus>) {
            self.script
                .entry(probe.to_string())
                .or_default()
                .extend(statuses);
        }
    }

    #[async_trait]
    impl ProbeExecutor for ScriptedExecutor {
        async fn execute(&self, spec: &ProbeSpec) -> ProbeOutcome {
            let status = self
                .script
                .get_mut(&spec.name)
                .and_then(|mut q| q.pop_front())
                .unwrap_or(ProbeStatus::Pass);

            match status {
                ProbeStatus::Pass => ProbeOutcome::pass(&spec.name, Duration::from_millis(1)),
                ProbeStatus::Warn => {
                    ProbeOutcome::warn(&spec.name, Duration::from_millis(1), "slow")
                }
                ProbeStatus::Fail => {
                    ProbeOutcome::fail(&spec.name, Duration::from_millis(1), "connection refused")
                }
            }
        }
    }

    fn plugin() -> PluginKey {
        PluginKey::new("payments", semver::Version::new(1, 2, 3)).unwrap()
    }

    fn monitor_with(executor: Arc<ScriptedExecutor>) -> HealthMonitor {
        let (event_tx, _) = broadcast::channel(256);
        HealthMonitor::new(MonitorConfig::default(), executor, event_tx)
    }

    fn fast_probe(name: &str) -> ProbeSpec {
        ProbeSpec::http_get(name, "http://localhost/health")
            .with_period(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let monitor = monitor_with(Arc::new(ScriptedExecutor::new()));

        monitor
            .start(plugin(), PluginProbes::new(vec![fast_probe("http")]))
            .unwrap();
        let err = monitor
            .start(plugin(), PluginProbes::new(vec![fast_probe("http")]))
            .unwrap_err();

        assert!(matches!(err, HealthError::AlreadyMonitored(_)));
    }

    #[tokio::test]
    async fn test_start_stop_start_matches_single_start() {
        let monitor = monitor_with(Arc::new(ScriptedExecutor::new()));
        let probes = PluginProbes::new(vec![fast_probe("http")]);

        monitor.start(plugin(), probes.clone()).unwrap();
        monitor.stop(&plugin());
        monitor.stop(&plugin()); // idempotent
        monitor.start(plugin(), probes).unwrap();

        assert!(monitor.is_monitoring(&plugin()));
        let snapshot = monitor.status(&plugin()).unwrap();
        assert_eq!(snapshot.downtime_events, 0);
    }

    #[tokio::test]
    async fn test_all_probes_failing_goes_unhealthy_within_one_period() {
        let executor = Arc::new(ScriptedExecutor::new());
        executor.push("http", vec![ProbeStatus::Fail; 8]);
        executor.push("tcp", vec![ProbeStatus::Fail; 8]);

        let monitor = monitor_with(executor);
        monitor
            .start(
                plugin(),
                PluginProbes::new(vec![fast_probe("http"), fast_probe("tcp")]),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        let snapshot = monitor.status(&plugin()).unwrap();
        assert_eq!(snapshot.overall, OverallHealth::Unhealthy);
        assert!(snapshot.open_downtime.is_some());
    }

    #[tokio::test]
    async fn test_downtime_opens_and_resolves_with_total_impact() {
        let executor = Arc::new(ScriptedExecutor::new());
        executor.push("http", vec![ProbeStatus::Fail, ProbeStatus::Fail]);

        let (event_tx, mut events) = broadcast::channel(256);
        let monitor = HealthMonitor::new(MonitorConfig::default(), executor, event_tx);

        monitor
            .start(plugin(), PluginProbes::new(vec![fast_probe("http")]))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;

        let snapshot = monitor.status(&plugin()).unwrap();
        assert_eq!(snapshot.overall, OverallHealth::Healthy);
        assert!(snapshot.open_downtime.is_none());
        assert_eq!(snapshot.downtime_events, 1);

        // The stream saw the open and the resolution, impact total.
        let mut saw_open = false;
        let mut saw_resolved_total = false;
        while let Ok(envelope) = events.try_recv() {
            match envelope.event {
                PlumEvent::DowntimeOpened { .. } => saw_open = true,
                PlumEvent::DowntimeResolved { ref impact, .. } if impact == "total" => {
                    saw_resolved_total = true
                }
                _ => {}
            }
        }
        assert!(saw_open);
        assert!(saw_resolved_total);

        drop(monitor);
    }

    #[tokio::test]
    async fn test_warn_probe_degrades() {
        let executor = Arc::new(ScriptedExecutor::new());
        executor.push("http", vec![ProbeStatus::Warn; 8]);

        let monitor = monitor_with(executor);
        monitor
            .start(
                plugin(),
                PluginProbes::new(vec![fast_probe("http"), fast_probe("tcp")]),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(monitor.overall(&plugin()), OverallHealth::Degraded);
    }

    #[tokio::test]
    async fn test_sample_history_projection() {
        let monitor = monitor_with(Arc::new(ScriptedExecutor::new()));
        monitor
            .start(plugin(), PluginProbes::new(vec![fast_probe("http")]))
            .unwrap();

        for _ in 0..5 {
            monitor.record_sample(&plugin(), MetricsSample::nominal());
        }

        assert_eq!(monitor.recent_samples(&plugin(), 3).len(), 3);
        assert_eq!(monitor.recent_samples(&plugin(), 100).len(), 5);
    }

    #[tokio::test]
    async fn test_fleet_summary_counts() {
        let executor = Arc::new(ScriptedExecutor::new());
        executor.push("http", vec![ProbeStatus::Fail; 8]);

        let monitor = monitor_with(executor);
        let healthy = PluginKey::new("checkout", semver::Version::new(1, 0, 0)).unwrap();

        monitor
            .start(plugin(), PluginProbes::new(vec![fast_probe("http")]))
            .unwrap();
        monitor
            .start(healthy, PluginProbes::new(vec![fast_probe("tcp")]))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        let summary = monitor.fleet_summary();
        assert_eq!(summary.total_plugins, 2);
        assert_eq!(summary.unhealthy_count, 1);
        assert_eq!(summary.healthy_count, 1);
        assert_eq!(summary.open_downtimes, 1);
    }
}

//! Metric sampler
//!
//! The single global tick that queries the observability collector for
//! every registered deployment and fans each sample out to (a) the
//! deployment's watch channel, where the driver stamps it into the
//! current phase, (b) the deployment's circuit breaker, and (c) the
//! plugin's rolling history in the health monitor. Samples are the sole
//! input to the circuit breaker.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use plum_substrate::ObservabilityCollector;
use plum_types::{
    DeploymentId, EventSource, MetricsSample, PluginKey, PlumEvent, PlumEventEnvelope,
};
use tokio::sync::{broadcast, watch};
use tracing::{debug, instrument, warn};

use crate::monitor::HealthMonitor;
use crate::resilience::CircuitBreaker;

struct SampleRoute {
    plugin: PluginKey,
    breaker: Arc<CircuitBreaker>,
    latest_tx: watch::Sender<Option<MetricsSample>>,
    window: std::time::Duration,
    last_sampled: std::sync::Mutex<Option<DateTime<Utc>>>,
}

/// Fans collector samples out to breakers, drivers, and the monitor.
pub struct MetricSampler {
    collector: Arc<dyn ObservabilityCollector>,
    monitor: Arc<HealthMonitor>,
    routes: DashMap<DeploymentId, SampleRoute>,
    event_tx: broadcast::Sender<PlumEventEnvelope>,
}

impl MetricSampler {
    pub fn new(
        collector: Arc<dyn ObservabilityCollector>,
        monitor: Arc<HealthMonitor>,
        event_tx: broadcast::Sender<PlumEventEnvelope>,
    ) -> Self {
        Self {
            collector,
            monitor,
            routes: DashMap::new(),
            event_tx,
        }
    }

    /// Register a deployment for sampling.
    ///
    /// Returns the watch channel on which the driver receives samples; a
    /// sample becomes visible there on the tick after the collector
    /// produced it, never sooner.
    pub fn register(
        &self,
        deployment_id: DeploymentId,
        plugin: PluginKey,
        breaker: Arc<CircuitBreaker>,
        window: std::time::Duration,
    ) -> watch::Receiver<Option<MetricsSample>> {
        let (latest_tx, latest_rx) = watch::channel(None);
        self.routes.insert(
            deployment_id,
            SampleRoute {
                plugin,
                breaker,
                latest_tx,
                window,
                last_sampled: std::sync::Mutex::new(None),
            },
        );
        latest_rx
    }

    /// Remove a deployment from sampling. Idempotent.
    pub fn unregister(&self, deployment_id: &DeploymentId) {
        self.routes.remove(deployment_id);
    }

    /// Number of registered deployments.
    pub fn registered(&self) -> usize {
        self.routes.len()
    }

    /// Run one fan-out pass over every registered deployment.
    ///
    /// Each route is sampled at most once per its own monitoring window,
    /// regardless of how fine the global tick is.
    #[instrument(skip(self))]
    pub async fn tick(&self) {
        let now = Utc::now();
        let due: Vec<DeploymentId> = self
            .routes
            .iter()
            .filter(|entry| {
                let last = entry.value().last_sampled.lock().unwrap();
                match *last {
                    None => true,
                    Some(at) => {
                        now.signed_duration_since(at)
                            >= chrono::Duration::from_std(entry.value().window)
                                .unwrap_or_else(|_| chrono::Duration::zero())
                    }
                }
            })
            .map(|entry| entry.key().clone())
            .collect();

        for deployment_id in due {
            self.sample_one(&deployment_id).await;
        }
    }

    /// Sample one deployment and fan the result out.
    pub async fn sample_one(&self, deployment_id: &DeploymentId) {
        let sample = match self.collector.sample(deployment_id).await {
            Ok(s) => s,
            Err(e) => {
                // A collector outage is not a deployment failure; the
                // breaker simply sees no sample this window.
                warn!(deployment_id = %deployment_id, error = %e, "Collector sample failed");
                return;
            }
        };

        let Some(route) = self.routes.get(deployment_id) else {
            return;
        };

        debug!(
            deployment_id = %deployment_id,
            error_rate = sample.error_rate,
            throughput = sample.throughput_rps,
            "Sample collected"
        );

        *route.last_sampled.lock().unwrap() = Some(Utc::now());

        if let Some(transition) = route.breaker.on_sample(sample.error_rate, sample.sampled_at) {
            let _ = self.event_tx.send(PlumEventEnvelope::new(
                PlumEvent::BreakerTransition {
                    deployment_id: deployment_id.clone(),
                    from: transition.from,
                    to: transition.to,
                },
                EventSource::Sampler,
            ));
        }

        self.monitor.record_sample(&route.plugin, sample.clone());
        let _ = route.latest_tx.send(Some(sample));
    }

    /// Run the sampler until `shutdown` flips true. This is the only
    /// periodic task that touches breakers; stopping it suspends every
    /// breaker without mutating state.
    pub async fn run(
        self: Arc<Self>,
        cadence: std::time::Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut interval = tokio::time::interval(cadence);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Metric sampler suspended");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorConfig;
    use crate::monitor::PluginProbes;
    use crate::probes::{ProbeSpec, StaticProbeExecutor};
    use plum_substrate::SimulatedCollector;
    use plum_types::{BreakerConfig, CircuitState};
    use std::time::Duration;

    fn plugin() -> PluginKey {
        PluginKey::new("payments", semver::Version::new(1, 2, 3)).unwrap()
    }

    fn fixture() -> (
        Arc<SimulatedCollector>,
        Arc<HealthMonitor>,
        Arc<MetricSampler>,
        broadcast::Receiver<PlumEventEnvelope>,
    ) {
        let (event_tx, event_rx) = broadcast::channel(256);
        let collector = Arc::new(SimulatedCollector::new());
        let monitor = Arc::new(HealthMonitor::new(
            MonitorConfig::default(),
            Arc::new(StaticProbeExecutor::passing()),
            event_tx.clone(),
        ));
        let sampler = Arc::new(MetricSampler::new(
            collector.clone(),
            monitor.clone(),
            event_tx,
        ));
        (collector, monitor, sampler, event_rx)
    }

    #[tokio::test]
    async fn test_sample_reaches_watch_and_monitor() {
        let (_collector, monitor, sampler, _events) = fixture();

        let id = DeploymentId::generate();
        let breaker = Arc::new(CircuitBreaker::new(id.clone(), BreakerConfig::default()));
        let mut rx = sampler.register(
            id.clone(),
            plugin(),
            breaker,
            Duration::from_millis(1),
        );

        // Monitor must know the plugin for history recording.
        monitor
            .start(
                plugin(),
                PluginProbes::new(vec![
                    ProbeSpec::http_get("http", "http://localhost/health")
                        .with_period(Duration::from_secs(3600)),
                ]),
            )
            .unwrap();

        sampler.tick().await;

        assert!(rx.borrow_and_update().is_some());
        assert_eq!(monitor.recent_samples(&plugin(), 10).len(), 1);
    }

    #[tokio::test]
    async fn test_failing_samples_open_breaker_and_emit_transition() {
        let (collector, _monitor, sampler, mut events) = fixture();

        let id = DeploymentId::generate();
        let mut bad = MetricsSample::nominal();
        bad.error_rate = 0.25;
        collector.push_samples(&id, vec![bad.clone(), bad.clone(), bad]);

        let breaker = Arc::new(CircuitBreaker::new(
            id.clone(),
            BreakerConfig {
                failure_threshold: 3,
                ..BreakerConfig::default()
            },
        ));
        let _rx = sampler.register(
            id.clone(),
            plugin(),
            breaker.clone(),
            Duration::from_millis(1),
        );

        for _ in 0..3 {
            sampler.sample_one(&id).await;
        }

        assert_eq!(breaker.state(), CircuitState::Open);

        let mut saw_transition = false;
        while let Ok(envelope) = events.try_recv() {
            if let PlumEvent::BreakerTransition { to, .. } = envelope.event {
                assert_eq!(to, CircuitState::Open);
                saw_transition = true;
            }
        }
        assert!(saw_transition);
    }

    #[tokio::test]
    async fn test_unregister_stops_fanout() {
        let (_collector, _monitor, sampler, _events) = fixture();

        let id = DeploymentId::generate();
        let breaker = Arc::new(CircuitBreaker::new(id.clone(), BreakerConfig::default()));
        let _rx = sampler.register(id.clone(), plugin(), breaker, Duration::from_millis(1));

        assert_eq!(sampler.registered(), 1);
        sampler.unregister(&id);
        sampler.unregister(&id); // idempotent
        assert_eq!(sampler.registered(), 0);
    }

    #[tokio::test]
    async fn test_window_limits_per_route_cadence() {
        let (_collector, _monitor, sampler, _events) = fixture();

        let id = DeploymentId::generate();
        let breaker = Arc::new(CircuitBreaker::new(id.clone(), BreakerConfig::default()));
        let mut rx = sampler.register(
            id.clone(),
            plugin(),
            breaker,
            Duration::from_secs(3600),
        );

        sampler.tick().await;
        assert!(rx.borrow_and_update().is_some());

        // Inside the window: the route is not due again.
        sampler.tick().await;
        assert!(!rx.has_changed().unwrap());
    }
}

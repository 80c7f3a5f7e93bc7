//! Orchestrator - admission, registry, shutdown
//!
//! The orchestrator is the only writer of the active-deployment registry.
//! Admission validates the request, wires the deployment to the metric
//! sampler (which feeds its circuit breaker) and the health monitor, and
//! spawns the driver task. Shutdown stops admissions, delivers
//! cancellation to every driver, waits within a bounded timeout, and
//! force-fails whatever remains.

use crate::cancel::CancelHandle;
use crate::context::DeploymentContext;
use crate::driver::DeploymentDriver;
use crate::error::{DeploymentError, Result};
use crate::strategies;
use dashmap::DashMap;
use plum_health::{CircuitBreaker, HealthMonitor, MetricSampler, PluginProbes};
use plum_substrate::{TrafficRouter, WorkloadOrchestrator};
use plum_types::{
    DeployRequest, Deployment, DeploymentId, DeploymentStatus, EventSource, PluginKey, PlumEvent,
    PlumEventEnvelope,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Default bound for `shutdown` when the caller gives none.
    pub shutdown_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Outcome of a shutdown pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Deployments that reached a terminal status within the timeout.
    pub completed: u32,

    /// Deployments force-failed past the timeout.
    pub forced: u32,
}

struct Inner {
    config: OrchestratorConfig,
    workload: Arc<dyn WorkloadOrchestrator>,
    router: Arc<dyn TrafficRouter>,
    monitor: Arc<HealthMonitor>,
    sampler: Arc<MetricSampler>,
    event_tx: broadcast::Sender<PlumEventEnvelope>,

    /// Active-deployment registry. Written only here; everyone else
    /// reads snapshots.
    deployments: DashMap<DeploymentId, Arc<RwLock<Deployment>>>,
    active: DashMap<PluginKey, DeploymentId>,
    drivers: DashMap<DeploymentId, JoinHandle<DeploymentStatus>>,
    cancels: DashMap<DeploymentId, CancelHandle>,
    shutting_down: AtomicBool,
}

/// Top-level deployment orchestrator.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        workload: Arc<dyn WorkloadOrchestrator>,
        router: Arc<dyn TrafficRouter>,
        monitor: Arc<HealthMonitor>,
        sampler: Arc<MetricSampler>,
        event_tx: broadcast::Sender<PlumEventEnvelope>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                workload,
                router,
                monitor,
                sampler,
                event_tx,
                deployments: DashMap::new(),
                active: DashMap::new(),
                drivers: DashMap::new(),
                cancels: DashMap::new(),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    /// Subscribe to the orchestrator's event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<PlumEventEnvelope> {
        self.inner.event_tx.subscribe()
    }

    /// Admit a deployment request.
    ///
    /// Fails with `AlreadyActive` while a previous deployment for the
    /// plugin is non-terminal, and with `ShuttingDown` once shutdown has
    /// begun. No state is created for an invalid request.
    #[instrument(skip(self, request, probes), fields(plugin = %plugin, strategy = %request.strategy))]
    pub async fn deploy(
        &self,
        plugin: PluginKey,
        request: DeployRequest,
        probes: PluginProbes,
    ) -> Result<Deployment> {
        let inner = &self.inner;

        if inner.shutting_down.load(Ordering::SeqCst) {
            return Err(DeploymentError::ShuttingDown);
        }
        request.validate()?;

        // One non-terminal deployment per plugin. Clone the shared record
        // out of the map before awaiting on it.
        let existing = inner.active.get(&plugin).map(|e| e.value().clone());
        if let Some(existing_id) = existing {
            let record = inner.deployments.get(&existing_id).map(|e| e.value().clone());
            if let Some(record) = record {
                if !record.read().await.status.is_terminal() {
                    return Err(DeploymentError::AlreadyActive(plugin));
                }
            }
        }

        let record = Deployment::new(plugin.clone(), request.strategy, request.regions.clone());
        let deployment_id = record.id.clone();
        let snapshot = record.clone();
        let shared = Arc::new(RwLock::new(record));

        // Wire the breaker to the sampler tick and the plugin to the
        // health monitor before the driver starts.
        let breaker = Arc::new(CircuitBreaker::new(
            deployment_id.clone(),
            request.circuit_breaker.clone(),
        ));
        let samples = inner.sampler.register(
            deployment_id.clone(),
            plugin.clone(),
            breaker.clone(),
            request.circuit_breaker.monitoring_window,
        );
        if !inner.monitor.is_monitoring(&plugin) {
            inner.monitor.start(plugin.clone(), probes)?;
        }

        let (cancel_handle, cancel_token) = CancelHandle::new();
        let strategy = strategies::create_strategy(request.strategy);
        let ctx = Arc::new(DeploymentContext::new(
            shared.clone(),
            plugin.clone(),
            request,
            deployment_id.clone(),
            inner.workload.clone(),
            inner.router.clone(),
            inner.monitor.clone(),
            breaker,
            samples,
            cancel_token,
            inner.event_tx.clone(),
        ));

        inner.deployments.insert(deployment_id.clone(), shared);
        inner.active.insert(plugin.clone(), deployment_id.clone());
        inner.cancels.insert(deployment_id.clone(), cancel_handle);

        let driver = DeploymentDriver::new(ctx, strategy);
        let task_inner = inner.clone();
        let task_id = deployment_id.clone();
        let handle = tokio::spawn(async move {
            let status = driver.run().await;
            task_inner.sampler.unregister(&task_id);
            status
        });
        inner.drivers.insert(deployment_id.clone(), handle);

        info!(deployment_id = %deployment_id, "Deployment admitted");
        let _ = inner.event_tx.send(PlumEventEnvelope::new(
            PlumEvent::DeploymentAdmitted {
                deployment_id,
                plugin,
            },
            EventSource::Orchestrator,
        ));

        Ok(snapshot)
    }

    /// Snapshot of a deployment.
    pub async fn get(&self, deployment_id: &DeploymentId) -> Result<Deployment> {
        let record = self
            .inner
            .deployments
            .get(deployment_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| DeploymentError::NotFound(deployment_id.clone()))?;
        let snapshot = record.read().await.clone();
        Ok(snapshot)
    }

    /// Snapshots of every known deployment.
    pub async fn list(&self) -> Vec<Deployment> {
        let mut snapshots = Vec::with_capacity(self.inner.deployments.len());
        let records: Vec<Arc<RwLock<Deployment>>> = self
            .inner
            .deployments
            .iter()
            .map(|e| e.value().clone())
            .collect();
        for record in records {
            snapshots.push(record.read().await.clone());
        }
        snapshots
    }

    /// Operator-initiated rollback of an in-flight deployment. The driver
    /// observes cancellation at its next suspension point and unwinds.
    pub fn cancel(&self, deployment_id: &DeploymentId) -> Result<()> {
        let handle = self
            .inner
            .cancels
            .get(deployment_id)
            .ok_or_else(|| DeploymentError::NotFound(deployment_id.clone()))?;
        handle.cancel();
        Ok(())
    }

    /// Whether shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    /// Graceful shutdown with the configured default timeout.
    pub async fn shutdown(&self) -> ShutdownReport {
        let timeout = self.inner.config.shutdown_timeout;
        self.shutdown_with_timeout(timeout).await
    }

    /// Stop admitting work, cancel every driver, wait up to `timeout`
    /// for terminal statuses, then force-fail the stragglers.
    ///
    /// A second call is equivalent to the first: it finds no drivers left
    /// and returns an empty report.
    #[instrument(skip(self))]
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> ShutdownReport {
        let inner = &self.inner;

        let first_call = !inner.shutting_down.swap(true, Ordering::SeqCst);
        if first_call {
            info!("Shutdown started");
            let _ = inner.event_tx.send(PlumEventEnvelope::new(
                PlumEvent::ShutdownStarted,
                EventSource::Orchestrator,
            ));
        }

        // Deliver cancellation to every driver.
        for entry in inner.cancels.iter() {
            entry.value().cancel();
        }

        let deadline = tokio::time::Instant::now() + timeout;
        let ids: Vec<DeploymentId> = inner.drivers.iter().map(|e| e.key().clone()).collect();

        let mut report = ShutdownReport::default();
        for id in ids {
            let Some((_, mut handle)) = inner.drivers.remove(&id) else {
                continue;
            };

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout(remaining, &mut handle).await {
                Ok(_) => report.completed += 1,
                Err(_) => {
                    // Forced shutdown: abort at the current suspension
                    // point, no unwinding, stamp the override reason.
                    warn!(deployment_id = %id, "Shutdown timeout elapsed, forcing");
                    handle.abort();
                    inner.sampler.unregister(&id);

                    let record = inner.deployments.get(&id).map(|e| e.value().clone());
                    if let Some(record) = record {
                        let mut record = record.write().await;
                        if !record.status.is_terminal() {
                            let _ = record.transition(DeploymentStatus::Failed {
                                reason: "shutdown-override".into(),
                            });
                        }
                    }
                    report.forced += 1;
                }
            }
        }

        // Release every monitor task.
        inner.monitor.stop_all();

        if first_call {
            info!(
                completed = report.completed,
                forced = report.forced,
                "Shutdown completed"
            );
            let _ = inner.event_tx.send(PlumEventEnvelope::new(
                PlumEvent::ShutdownCompleted {
                    forced: report.forced,
                },
                EventSource::Orchestrator,
            ));
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plum_health::{MonitorConfig, ProbeSpec, StaticProbeExecutor};
    use plum_substrate::{SimulatedCollector, SimulatedRouter, SimulatedWorkload};
    use plum_types::{Region, StrategyKind};

    fn plugin() -> PluginKey {
        PluginKey::new("payments", semver::Version::new(1, 2, 3)).unwrap()
    }

    fn probes() -> PluginProbes {
        PluginProbes::new(vec![
            ProbeSpec::http_get("http", "http://payments/health")
                .with_period(Duration::from_secs(1)),
        ])
    }

    fn quick_request(strategy: StrategyKind) -> DeployRequest {
        let mut request = DeployRequest::new(strategy, vec![Region::from("us-east")]);
        request.stabilization = Duration::from_millis(50);
        request.min_ready = Duration::ZERO;
        request.progress_deadline = Duration::from_secs(5);
        request
    }

    struct Fixture {
        orchestrator: Orchestrator,
        sampler: Arc<MetricSampler>,
        router: Arc<SimulatedRouter>,
    }

    fn fixture() -> Fixture {
        let (event_tx, _) = broadcast::channel(1024);
        let workload = Arc::new(SimulatedWorkload::new());
        let router = Arc::new(SimulatedRouter::new());
        let collector = Arc::new(SimulatedCollector::new());
        let monitor = Arc::new(HealthMonitor::new(
            MonitorConfig::default(),
            Arc::new(StaticProbeExecutor::passing()),
            event_tx.clone(),
        ));
        let sampler = Arc::new(MetricSampler::new(
            collector,
            monitor.clone(),
            event_tx.clone(),
        ));
        let orchestrator = Orchestrator::new(
            OrchestratorConfig::default(),
            workload,
            router.clone(),
            monitor,
            sampler.clone(),
            event_tx,
        );
        Fixture {
            orchestrator,
            sampler,
            router,
        }
    }

    async fn drive_to_terminal(fixture: &Fixture, id: &DeploymentId) -> DeploymentStatus {
        loop {
            fixture.sampler.tick().await;
            let snapshot = fixture.orchestrator.get(id).await.unwrap();
            if snapshot.status.is_terminal() {
                return snapshot.status;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deploy_rejects_double_admission() {
        let fixture = fixture();

        fixture
            .orchestrator
            .deploy(plugin(), quick_request(StrategyKind::Canary), probes())
            .await
            .unwrap();

        let err = fixture
            .orchestrator
            .deploy(plugin(), quick_request(StrategyKind::Canary), probes())
            .await
            .unwrap_err();
        assert!(matches!(err, DeploymentError::AlreadyActive(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_canary_completes_and_routes_full_traffic() {
        let fixture = fixture();

        let snapshot = fixture
            .orchestrator
            .deploy(plugin(), quick_request(StrategyKind::Canary), probes())
            .await
            .unwrap();

        let status = drive_to_terminal(&fixture, &snapshot.id).await;
        assert_eq!(status, DeploymentStatus::Completed);
        assert_eq!(fixture.router.split_of("payments", "canary"), 100);

        // Terminal: the plugin can deploy again.
        fixture
            .orchestrator
            .deploy(plugin(), quick_request(StrategyKind::Canary), probes())
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_rejects_new_work_and_is_idempotent() {
        let fixture = fixture();

        let report = fixture
            .orchestrator
            .shutdown_with_timeout(Duration::from_millis(100))
            .await;
        assert_eq!(report, ShutdownReport::default());

        let err = fixture
            .orchestrator
            .deploy(plugin(), quick_request(StrategyKind::Canary), probes())
            .await
            .unwrap_err();
        assert!(matches!(err, DeploymentError::ShuttingDown));

        // Second shutdown is equivalent to the first.
        let report = fixture
            .orchestrator
            .shutdown_with_timeout(Duration::from_millis(100))
            .await;
        assert_eq!(report, ShutdownReport::default());
    }
}

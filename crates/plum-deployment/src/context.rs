//! Deployment context - execution environment for strategies
//!
//! The bridge between the strategy engine and the outside world: every
//! substrate call a strategy makes goes through here, under the
//! deployment's retry policy, cancellation token, and region bookkeeping.

use crate::cancel::CancelToken;
use crate::error::{DeploymentError, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use plum_health::{CircuitBreaker, HealthMonitor, OverallHealth};
use plum_substrate::{
    retry_with_backoff, RetryPolicy, StrategyHint, TrafficRouter, WorkloadOrchestrator,
    WorkloadSpec,
};
use plum_types::{
    CircuitState, DeployRequest, Deployment, DeploymentId, EventSource, MetricsSample, PluginKey,
    PlumEvent, PlumEventEnvelope, Region, RegionState,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch, RwLock};
use tracing::{info, instrument};

/// How often readiness and observation loops wake up.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Context provided to strategies for one deployment
pub struct DeploymentContext {
    deployment_id: DeploymentId,
    plugin: PluginKey,
    request: DeployRequest,
    record: Arc<RwLock<Deployment>>,
    workload: Arc<dyn WorkloadOrchestrator>,
    router: Arc<dyn TrafficRouter>,
    monitor: Arc<HealthMonitor>,
    breaker: Arc<CircuitBreaker>,
    samples: watch::Receiver<Option<MetricsSample>>,
    cancel: CancelToken,
    retry: RetryPolicy,
    event_tx: broadcast::Sender<PlumEventEnvelope>,
    /// Winner chosen by an A/B analyze phase.
    ab_winner: Mutex<Option<String>>,
}

impl DeploymentContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        record: Arc<RwLock<Deployment>>,
        plugin: PluginKey,
        request: DeployRequest,
        deployment_id: DeploymentId,
        workload: Arc<dyn WorkloadOrchestrator>,
        router: Arc<dyn TrafficRouter>,
        monitor: Arc<HealthMonitor>,
        breaker: Arc<CircuitBreaker>,
        samples: watch::Receiver<Option<MetricsSample>>,
        cancel: CancelToken,
        event_tx: broadcast::Sender<PlumEventEnvelope>,
    ) -> Self {
        Self {
            deployment_id,
            plugin,
            request,
            record,
            workload,
            router,
            monitor,
            breaker,
            samples,
            cancel,
            retry: RetryPolicy::default(),
            event_tx,
            ab_winner: Mutex::new(None),
        }
    }

    pub fn deployment_id(&self) -> &DeploymentId {
        &self.deployment_id
    }

    pub fn plugin(&self) -> &PluginKey {
        &self.plugin
    }

    pub fn request(&self) -> &DeployRequest {
        &self.request
    }

    pub fn record(&self) -> &Arc<RwLock<Deployment>> {
        &self.record
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    pub fn event_tx(&self) -> &broadcast::Sender<PlumEventEnvelope> {
        &self.event_tx
    }

    /// The routed service name for this plugin.
    pub fn service(&self) -> &str {
        self.plugin.name()
    }

    /// Scope name for a variant. The stable variant lives in the bare
    /// plugin scope; every other variant gets its own suffix.
    pub fn scope_name(&self, variant: &str) -> String {
        if variant == "stable" {
            self.plugin.name().to_string()
        } else {
            format!("{}-{}", self.plugin.name(), variant)
        }
    }

    /// Workload spec for a variant in a region.
    pub fn spec_for(&self, variant: &str, region: &Region) -> WorkloadSpec {
        WorkloadSpec::new(
            self.plugin.clone(),
            self.scope_name(variant),
            region.clone(),
            variant,
        )
        .with_replicas(self.request.replicas)
    }

    /// Regions a phase targets: its own region when region-scoped, every
    /// requested region otherwise.
    pub fn target_regions(&self, phase_region: Option<&Region>) -> Vec<Region> {
        match phase_region {
            Some(r) => vec![r.clone()],
            None => self.request.regions.clone(),
        }
    }

    // --- Substrate operations, retried at this boundary only ---

    /// Ensure an isolated scope exists. Idempotent at the substrate.
    pub async fn ensure_scope(&self, scope: &str) -> Result<()> {
        retry_with_backoff(self.retry, "ensure_scope", || {
            self.workload.ensure_scope(scope)
        })
        .await?;
        Ok(())
    }

    /// Delete a scope, tolerating absence.
    pub async fn delete_scope(&self, scope: &str) -> Result<()> {
        retry_with_backoff(self.retry, "delete_scope", || {
            self.workload.delete_scope(scope)
        })
        .await?;
        Ok(())
    }

    /// Apply one variant's workload in one region and mark the region
    /// deploying.
    pub async fn apply_variant(&self, variant: &str, region: &Region) -> Result<()> {
        let spec = self.spec_for(variant, region);
        retry_with_backoff(self.retry, "apply", || self.workload.apply(&spec)).await?;

        let mut record = self.record.write().await;
        if let Some(status) = record.region_status.get_mut(region) {
            status.state = RegionState::Deploying;
            status.desired_replicas = spec.replicas;
        }
        Ok(())
    }

    /// Ask the substrate to roll a workload per the hint.
    pub async fn rollout(&self, variant: &str, region: &Region, hint: StrategyHint) -> Result<()> {
        let identity = self.spec_for(variant, region).identity();
        retry_with_backoff(self.retry, "rollout", || {
            self.workload.rollout(&identity, hint)
        })
        .await?;
        Ok(())
    }

    /// Poll readiness until every desired replica is ready, observing
    /// cancellation. Marks the region healthy on success.
    pub async fn wait_until_ready(&self, variant: &str, region: &Region) -> Result<()> {
        let identity = self.spec_for(variant, region).identity();

        loop {
            if self.cancel.is_cancelled() {
                return Err(DeploymentError::Cancelled {
                    reason: "cancelled while waiting for readiness".into(),
                });
            }

            let health = retry_with_backoff(self.retry, "read_health", || {
                self.workload.read_health(&identity)
            })
            .await?;

            {
                let mut record = self.record.write().await;
                if let Some(status) = record.region_status.get_mut(region) {
                    status.desired_replicas = health.desired;
                    status.ready_replicas = health.ready;
                    if health.is_ready() {
                        status.state = RegionState::Healthy;
                    }
                }
            }

            if health.is_ready() {
                return Ok(());
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Apply and wait for readiness across several regions concurrently.
    ///
    /// All regions run to completion; the first region to report failure
    /// is authoritative and later failures accumulate into the error log.
    pub async fn deploy_regions(&self, variant: &str, regions: &[Region]) -> Result<()> {
        let mut tasks = FuturesUnordered::new();
        for region in regions {
            let region = region.clone();
            tasks.push(async move {
                let result = async {
                    self.apply_variant(variant, &region).await?;
                    self.wait_until_ready(variant, &region).await
                }
                .await;
                (region, result)
            });
        }

        let mut first_error = None;
        while let Some((region, result)) = tasks.next().await {
            if let Err(e) = result {
                let mut record = self.record.write().await;
                record.record_region_failure(&region, e.to_string());
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        match first_error {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    /// Check that every region's workload reports full readiness.
    pub async fn verify_ready(&self, variant: &str, regions: &[Region]) -> Result<()> {
        for region in regions {
            let identity = self.spec_for(variant, region).identity();
            let health = retry_with_backoff(self.retry, "read_health", || {
                self.workload.read_health(&identity)
            })
            .await?;

            if !health.is_ready() {
                return Err(DeploymentError::PhaseFailed {
                    phase: "verify".into(),
                    reason: format!(
                        "region {}: {}/{} replicas ready",
                        region, health.ready, health.desired
                    ),
                });
            }
        }
        Ok(())
    }

    /// Shift traffic for this service to a variant.
    #[instrument(skip(self), fields(deployment_id = %self.deployment_id))]
    pub async fn set_split(&self, variant: &str, percentage: u8) -> Result<()> {
        retry_with_backoff(self.retry, "set_split", || {
            self.router.set_split(self.service(), variant, percentage)
        })
        .await?;

        info!(
            service = self.service(),
            variant = variant,
            percentage = percentage,
            "Traffic split updated"
        );
        let _ = self.event_tx.send(PlumEventEnvelope::new(
            PlumEvent::TrafficShifted {
                deployment_id: self.deployment_id.clone(),
                variant: variant.to_string(),
                percentage,
            },
            EventSource::Driver,
        ));
        Ok(())
    }

    // --- Observation ---

    /// Latest sample delivered by the metric sampler, if any.
    pub fn latest_sample(&self) -> Option<MetricsSample> {
        self.samples.borrow().clone()
    }

    /// Hold for at least `duration`, requiring health to stay
    /// not-unhealthy and the breaker to stay closed throughout.
    ///
    /// This is the `observe` step of every phase and the post-install
    /// monitoring wait. Cancellation is observed at every tick.
    pub async fn observe(&self, duration: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + duration;

        loop {
            if self.cancel.is_cancelled() {
                return Err(DeploymentError::Cancelled {
                    reason: "cancelled during stabilization".into(),
                });
            }

            let state = self.breaker.state();
            if state != CircuitState::Closed {
                return Err(DeploymentError::BreakerOpen {
                    state: state.to_string(),
                });
            }

            let overall = self.monitor.overall(&self.plugin);
            if overall == OverallHealth::Unhealthy {
                return Err(DeploymentError::UnhealthyDuringObserve {
                    status: overall.to_string(),
                });
            }

            // Stamp the freshest sample into the in-progress phase.
            if let Some(sample) = self.latest_sample() {
                let mut record = self.record.write().await;
                if let Some(index) = record.current_phase {
                    record.phases[index].observe(sample);
                }
                record.breaker = self.breaker.snapshot();
            }

            if tokio::time::Instant::now() >= deadline {
                return Ok(());
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    // --- A/B bookkeeping ---

    /// Record the winning variant chosen by the analyze phase.
    pub fn set_ab_winner(&self, variant: impl Into<String>) {
        *self.ab_winner.lock().unwrap() = Some(variant.into());
    }

    /// The winning variant, once analysis has run.
    pub fn ab_winner(&self) -> Option<String> {
        self.ab_winner.lock().unwrap().clone()
    }
}

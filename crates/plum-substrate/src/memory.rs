//! In-memory simulated collaborators
//!
//! Suitable for the daemon's local mode and for tests. Behavior is
//! scriptable: metric samples can be queued per deployment, individual
//! operations can be made to fail or hang, and every mutation is recorded
//! for assertions.

use crate::collector::{EndpointStatus, ObservabilityCollector};
use crate::error::{SubstrateError, SubstrateResult};
use crate::router::TrafficRouter;
use crate::workload::{StrategyHint, WorkloadOrchestrator, WorkloadSpec};
use crate::writer::ResourceWriter;
use async_trait::async_trait;
use dashmap::DashMap;
use plum_types::{DeploymentId, MetricsSample, PluginKey, ReplicaHealth, ResourceUsage};
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::debug;

/// Scripted failure/hang behavior shared by the simulated collaborators.
#[derive(Default)]
struct FaultPlan {
    /// Errors to return, popped front-first, keyed by operation name.
    failures: DashMap<String, VecDeque<SubstrateError>>,
    /// Operations that never return.
    hangs: DashMap<String, ()>,
}

impl FaultPlan {
    fn fail_next(&self, op: &str, error: SubstrateError) {
        self.failures.entry(op.to_string()).or_default().push_back(error);
    }

    fn hang(&self, op: &str) {
        self.hangs.insert(op.to_string(), ());
    }

    async fn check(&self, op: &str) -> SubstrateResult<()> {
        if self.hangs.contains_key(op) {
            futures::future::pending::<()>().await;
        }
        if let Some(mut queue) = self.failures.get_mut(op) {
            if let Some(error) = queue.pop_front() {
                return Err(error);
            }
        }
        Ok(())
    }
}

/// In-memory workload orchestrator
///
/// Workloads become ready after a configurable number of `read_health`
/// polls (zero by default, so tests are fast).
pub struct SimulatedWorkload {
    scopes: DashMap<String, ()>,
    workloads: DashMap<String, WorkloadRecord>,
    readiness_polls: u32,
    faults: FaultPlan,
}

struct WorkloadRecord {
    spec: WorkloadSpec,
    polls_seen: u32,
}

impl SimulatedWorkload {
    pub fn new() -> Self {
        Self {
            scopes: DashMap::new(),
            workloads: DashMap::new(),
            readiness_polls: 0,
            faults: FaultPlan::default(),
        }
    }

    /// Require `polls` health reads before replicas report ready.
    pub fn with_readiness_polls(mut self, polls: u32) -> Self {
        self.readiness_polls = polls;
        self
    }

    /// Queue an error for the next call to `op`.
    pub fn fail_next(&self, op: &str, error: SubstrateError) {
        self.faults.fail_next(op, error);
    }

    /// Make every future call to `op` hang forever.
    pub fn hang_on(&self, op: &str) {
        self.faults.hang(op);
    }

    /// Whether the named scope currently exists.
    pub fn scope_exists(&self, name: &str) -> bool {
        self.scopes.contains_key(name)
    }

    /// Spec most recently applied under the identity, if any.
    pub fn applied_spec(&self, identity: &str) -> Option<WorkloadSpec> {
        self.workloads.get(identity).map(|r| r.spec.clone())
    }
}

impl Default for SimulatedWorkload {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkloadOrchestrator for SimulatedWorkload {
    async fn ensure_scope(&self, name: &str) -> SubstrateResult<()> {
        self.faults.check("ensure_scope").await?;
        self.scopes.insert(name.to_string(), ());
        Ok(())
    }

    async fn apply(&self, spec: &WorkloadSpec) -> SubstrateResult<()> {
        self.faults.check("apply").await?;
        debug!(identity = %spec.identity(), replicas = spec.replicas, "Simulated apply");

        self.workloads
            .entry(spec.identity())
            .and_modify(|r| r.spec = spec.clone())
            .or_insert_with(|| WorkloadRecord {
                spec: spec.clone(),
                polls_seen: 0,
            });
        Ok(())
    }

    async fn rollout(&self, identity: &str, _hint: StrategyHint) -> SubstrateResult<()> {
        self.faults.check("rollout").await?;
        if !self.workloads.contains_key(identity) {
            return Err(SubstrateError::NotFound(identity.to_string()));
        }
        Ok(())
    }

    async fn read_health(&self, identity: &str) -> SubstrateResult<ReplicaHealth> {
        self.faults.check("read_health").await?;

        let mut record = self
            .workloads
            .get_mut(identity)
            .ok_or_else(|| SubstrateError::NotFound(identity.to_string()))?;

        record.polls_seen += 1;
        let ready = if record.polls_seen > self.readiness_polls {
            record.spec.replicas
        } else {
            0
        };

        Ok(ReplicaHealth {
            desired: record.spec.replicas,
            ready,
        })
    }

    async fn delete_scope(&self, name: &str) -> SubstrateResult<()> {
        self.faults.check("delete_scope").await?;
        self.scopes.remove(name);
        self.workloads
            .retain(|_, record| record.spec.scope != name);
        Ok(())
    }
}

/// In-memory traffic router recording splits per (service, variant)
pub struct SimulatedRouter {
    splits: DashMap<(String, String), u8>,
    faults: FaultPlan,
}

impl SimulatedRouter {
    pub fn new() -> Self {
        Self {
            splits: DashMap::new(),
            faults: FaultPlan::default(),
        }
    }

    /// Queue an error for the next call to `op`.
    pub fn fail_next(&self, op: &str, error: SubstrateError) {
        self.faults.fail_next(op, error);
    }

    /// Make every future call to `op` hang forever.
    pub fn hang_on(&self, op: &str) {
        self.faults.hang(op);
    }

    /// Current split for a (service, variant) pair, zero when unset.
    pub fn split_of(&self, service: &str, variant: &str) -> u8 {
        self.splits
            .get(&(service.to_string(), variant.to_string()))
            .map(|s| *s)
            .unwrap_or(0)
    }
}

impl Default for SimulatedRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TrafficRouter for SimulatedRouter {
    async fn set_split(&self, service: &str, variant: &str, percentage: u8) -> SubstrateResult<()> {
        self.faults.check("set_split").await?;
        debug!(service = service, variant = variant, percentage = percentage, "Simulated split");
        self.splits
            .insert((service.to_string(), variant.to_string()), percentage);
        Ok(())
    }

    async fn get_split(&self, service: &str, variant: &str) -> SubstrateResult<u8> {
        Ok(self.split_of(service, variant))
    }
}

/// In-memory observability collector with scriptable samples
///
/// Samples queued with [`push_samples`](Self::push_samples) are returned
/// front-first; once the queue drains, the configured steady-state sample
/// repeats.
pub struct SimulatedCollector {
    queued: DashMap<DeploymentId, VecDeque<MetricsSample>>,
    steady: Mutex<MetricsSample>,
    usage: DashMap<PluginKey, ResourceUsage>,
    endpoint: DashMap<PluginKey, EndpointStatus>,
    faults: FaultPlan,
}

impl SimulatedCollector {
    pub fn new() -> Self {
        Self {
            queued: DashMap::new(),
            steady: Mutex::new(MetricsSample::nominal()),
            usage: DashMap::new(),
            endpoint: DashMap::new(),
            faults: FaultPlan::default(),
        }
    }

    /// Queue samples to hand out for a deployment, front-first.
    pub fn push_samples(&self, deployment_id: &DeploymentId, samples: Vec<MetricsSample>) {
        self.queued
            .entry(deployment_id.clone())
            .or_default()
            .extend(samples);
    }

    /// Set the sample repeated once any queue drains.
    pub fn set_steady_state(&self, sample: MetricsSample) {
        *self.steady.lock().unwrap() = sample;
    }

    /// Set the resource usage reading for a plugin.
    pub fn set_usage(&self, plugin: &PluginKey, usage: ResourceUsage) {
        self.usage.insert(plugin.clone(), usage);
    }

    /// Set the endpoint status for a plugin.
    pub fn set_endpoint(&self, plugin: &PluginKey, status: EndpointStatus) {
        self.endpoint.insert(plugin.clone(), status);
    }

    /// Queue an error for the next call to `op`.
    pub fn fail_next(&self, op: &str, error: SubstrateError) {
        self.faults.fail_next(op, error);
    }
}

impl Default for SimulatedCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObservabilityCollector for SimulatedCollector {
    async fn sample(&self, deployment_id: &DeploymentId) -> SubstrateResult<MetricsSample> {
        self.faults.check("sample").await?;

        if let Some(mut queue) = self.queued.get_mut(deployment_id) {
            if let Some(mut sample) = queue.pop_front() {
                sample.sampled_at = chrono::Utc::now();
                return Ok(sample);
            }
        }

        let mut sample = self.steady.lock().unwrap().clone();
        sample.sampled_at = chrono::Utc::now();
        Ok(sample)
    }

    async fn status(&self, plugin: &PluginKey) -> SubstrateResult<EndpointStatus> {
        self.faults.check("status").await?;
        Ok(self
            .endpoint
            .get(plugin)
            .map(|s| *s)
            .unwrap_or(EndpointStatus {
                up: true,
                response_time_ms: 5.0,
            }))
    }

    async fn usage(&self, plugin: &PluginKey) -> SubstrateResult<ResourceUsage> {
        self.faults.check("usage").await?;
        self.usage
            .get(plugin)
            .map(|u| u.clone())
            .ok_or_else(|| SubstrateError::NotFound(plugin.to_string()))
    }
}

/// In-memory resource writer recording applied recommendations
pub struct SimulatedWriter {
    applied: DashMap<PluginKey, Vec<serde_json::Value>>,
}

impl SimulatedWriter {
    pub fn new() -> Self {
        Self {
            applied: DashMap::new(),
        }
    }

    /// Recommendations applied for a plugin, oldest first.
    pub fn applied_for(&self, plugin: &PluginKey) -> Vec<serde_json::Value> {
        self.applied
            .get(plugin)
            .map(|v| v.clone())
            .unwrap_or_default()
    }
}

impl Default for SimulatedWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceWriter for SimulatedWriter {
    async fn apply_recommendation(
        &self,
        plugin: &PluginKey,
        recommendation: serde_json::Value,
    ) -> SubstrateResult<()> {
        self.applied
            .entry(plugin.clone())
            .or_default()
            .push(recommendation);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plum_types::Region;

    fn plugin() -> PluginKey {
        PluginKey::new("payments", semver::Version::new(1, 2, 3)).unwrap()
    }

    #[tokio::test]
    async fn test_apply_is_idempotent() {
        let workload = SimulatedWorkload::new();
        let spec = WorkloadSpec::new(plugin(), "payments-green", Region::from("us-east"), "green")
            .with_replicas(3);

        workload.ensure_scope("payments-green").await.unwrap();
        workload.apply(&spec).await.unwrap();
        workload.apply(&spec).await.unwrap();

        let health = workload.read_health(&spec.identity()).await.unwrap();
        assert_eq!(health.desired, 3);
        assert!(health.is_ready());
    }

    #[tokio::test]
    async fn test_delete_scope_tolerates_absence() {
        let workload = SimulatedWorkload::new();
        workload.delete_scope("never-created").await.unwrap();
    }

    #[tokio::test]
    async fn test_readiness_polls_delay() {
        let workload = SimulatedWorkload::new().with_readiness_polls(2);
        let spec = WorkloadSpec::new(plugin(), "scope", Region::from("us-east"), "green");
        workload.apply(&spec).await.unwrap();

        let id = spec.identity();
        assert!(!workload.read_health(&id).await.unwrap().is_ready());
        assert!(!workload.read_health(&id).await.unwrap().is_ready());
        assert!(workload.read_health(&id).await.unwrap().is_ready());
    }

    #[tokio::test]
    async fn test_scripted_failure_is_consumed() {
        let router = SimulatedRouter::new();
        router.fail_next("set_split", SubstrateError::Permanent("mesh rejected".into()));

        assert!(router.set_split("payments", "green", 100).await.is_err());
        assert!(router.set_split("payments", "green", 100).await.is_ok());
        assert_eq!(router.split_of("payments", "green"), 100);
    }

    #[tokio::test]
    async fn test_collector_queue_then_steady_state() {
        let collector = SimulatedCollector::new();
        let id = DeploymentId::generate();

        let mut bad = MetricsSample::nominal();
        bad.error_rate = 0.25;
        collector.push_samples(&id, vec![bad.clone()]);

        assert!((collector.sample(&id).await.unwrap().error_rate - 0.25).abs() < 1e-9);
        assert!(collector.sample(&id).await.unwrap().error_rate < 0.01);
    }
}

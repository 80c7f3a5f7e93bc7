//! Workload orchestrator interface
//!
//! The collaborator that actually creates, updates, and deletes running
//! plugin instances on the container substrate. `apply` is idempotent,
//! `read_health` is side-effect-free, and `delete_scope` tolerates absence.

use crate::error::SubstrateResult;
use async_trait::async_trait;
use plum_types::{PluginKey, Region, ReplicaHealth};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Desired state handed to the substrate for one plugin in one scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadSpec {
    /// Plugin being run.
    pub plugin: PluginKey,

    /// Isolated scope (namespace-like) the workload lives in.
    pub scope: String,

    /// Region the workload targets.
    pub region: Region,

    /// Desired replica count.
    pub replicas: u32,

    /// Variant label, e.g. `blue`, `green`, `canary`, `a`, `b`.
    pub variant: String,

    /// Free-form labels passed through to the substrate.
    pub labels: HashMap<String, String>,
}

impl WorkloadSpec {
    /// A single-replica spec for the given plugin, scope, and variant.
    pub fn new(
        plugin: PluginKey,
        scope: impl Into<String>,
        region: Region,
        variant: impl Into<String>,
    ) -> Self {
        Self {
            plugin,
            scope: scope.into(),
            region,
            replicas: 1,
            variant: variant.into(),
            labels: HashMap::new(),
        }
    }

    /// Set the desired replica count.
    pub fn with_replicas(mut self, replicas: u32) -> Self {
        self.replicas = replicas;
        self
    }

    /// Identity of the workload this spec produces.
    pub fn identity(&self) -> String {
        format!("{}/{}-{}", self.scope, self.plugin.name(), self.variant)
    }
}

/// Hint passed to `rollout` describing how the substrate should replace
/// replicas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyHint {
    /// Replace replicas gradually within surge/unavailable bounds.
    Rolling {
        max_unavailable: u32,
        max_surge: u32,
    },

    /// Replace everything at once.
    Recreate,

    /// Revert the workload to its previous revision.
    RollBack,
}

/// Interface to the workload orchestrator collaborator.
#[async_trait]
pub trait WorkloadOrchestrator: Send + Sync {
    /// Ensure the named isolated scope exists. Idempotent.
    async fn ensure_scope(&self, name: &str) -> SubstrateResult<()>;

    /// Apply the desired workload state. Idempotent.
    async fn apply(&self, spec: &WorkloadSpec) -> SubstrateResult<()>;

    /// Ask the substrate to roll the workload per the hint.
    async fn rollout(&self, identity: &str, hint: StrategyHint) -> SubstrateResult<()>;

    /// Read replica readiness. Side-effect-free.
    async fn read_health(&self, identity: &str) -> SubstrateResult<ReplicaHealth>;

    /// Delete the named scope and everything in it. Tolerates absence.
    async fn delete_scope(&self, name: &str) -> SubstrateResult<()>;
}

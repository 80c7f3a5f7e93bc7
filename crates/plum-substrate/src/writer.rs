//! Resource writer interface
//!
//! Consumes the output of the resource advisor. Applying a recommendation
//! (patching requests/limits, enabling autoscaling) is the writer's
//! responsibility; the core only hands the decision over.

use crate::error::SubstrateResult;
use async_trait::async_trait;
use plum_types::PluginKey;

/// Interface to the resource-writing collaborator.
#[async_trait]
pub trait ResourceWriter: Send + Sync {
    /// Apply a serialized recommendation to the plugin's workload.
    ///
    /// The payload is the advisor's recommendation record as JSON; the
    /// writer maps it onto substrate-specific patches.
    async fn apply_recommendation(
        &self,
        plugin: &PluginKey,
        recommendation: serde_json::Value,
    ) -> SubstrateResult<()>;
}

//! Traffic router interface
//!
//! Called once per canary step and per blue/green switch. Percentages for
//! a service's variants sum to 100; the router owns the remainder
//! bookkeeping for the incumbent variant.

use crate::error::SubstrateResult;
use async_trait::async_trait;

/// Interface to the traffic routing collaborator.
#[async_trait]
pub trait TrafficRouter: Send + Sync {
    /// Route `percentage` percent of the service's traffic to `variant`.
    ///
    /// The remaining traffic stays on the incumbent variant.
    async fn set_split(&self, service: &str, variant: &str, percentage: u8) -> SubstrateResult<()>;

    /// Current percentage routed to `variant`, if the service is known.
    async fn get_split(&self, service: &str, variant: &str) -> SubstrateResult<u8>;
}

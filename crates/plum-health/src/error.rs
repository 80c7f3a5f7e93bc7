//! Error types for plum-health.

use plum_types::PluginKey;
use thiserror::Error;

/// Errors that can occur during health monitoring and sampling.
#[derive(Debug, Error)]
pub enum HealthError {
    /// A plugin was started twice without an intervening stop.
    #[error("plugin {0} is already monitored")]
    AlreadyMonitored(PluginKey),

    /// The plugin is not registered with the monitor.
    #[error("plugin {0} is not monitored")]
    NotMonitored(PluginKey),

    /// The plugin was registered with no probes.
    #[error("plugin {0} has no probes configured")]
    NoProbes(PluginKey),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for health operations.
pub type HealthResult<T> = Result<T, HealthError>;

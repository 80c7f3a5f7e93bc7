//! plumd - the PLUM orchestration daemon
//!
//! Wires the control plane together: the simulated substrate (the real
//! workload orchestrator, router, collector, and writer live behind the
//! same traits), the health monitor, the two global tick sources (metric
//! sampler and resource advisor), and the orchestrator. Termination
//! signals trigger graceful shutdown with the configured timeout; the
//! process exits zero once shutdown completes.

use anyhow::Result;
use clap::Parser;
use plum_advisor::{AdvisorConfig, ResourceAdvisor};
use plum_deployment::{Orchestrator, OrchestratorConfig};
use plum_health::{HealthMonitor, MetricSampler, MonitorConfig, NetworkProbeExecutor};
use plum_substrate::{SimulatedCollector, SimulatedRouter, SimulatedWorkload, SimulatedWriter};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "plumd", about = "Plugin deployment orchestration daemon")]
struct Args {
    /// Metric sampler tick cadence in seconds.
    #[arg(long, env = "PLUM_SAMPLER_CADENCE_SECS", default_value_t = 5)]
    sampler_cadence_secs: u64,

    /// Resource advisor tick cadence in seconds.
    #[arg(long, env = "PLUM_ADVISOR_CADENCE_SECS", default_value_t = 300)]
    advisor_cadence_secs: u64,

    /// Bound on graceful shutdown.
    #[arg(long, env = "PLUM_SHUTDOWN_TIMEOUT_SECS", default_value_t = 30)]
    shutdown_timeout_secs: u64,

    /// Apply advisor recommendations through the resource writer instead
    /// of only emitting them.
    #[arg(long, env = "PLUM_AUTO_APPLY_RECOMMENDATIONS", default_value_t = false)]
    auto_apply_recommendations: bool,
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();

    let exit_code = match run(Args::parse()).await {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %e, "plumd failed");
            1
        }
    };
    std::process::exit(exit_code);
}

async fn run(args: Args) -> Result<()> {
    info!(
        sampler_cadence_secs = args.sampler_cadence_secs,
        advisor_cadence_secs = args.advisor_cadence_secs,
        "plumd starting"
    );

    let (event_tx, _) = broadcast::channel(4096);

    // Substrate collaborators. In-memory implementations stand in until
    // real integrations are configured behind the same traits.
    let workload = Arc::new(SimulatedWorkload::new());
    let router = Arc::new(SimulatedRouter::new());
    let collector = Arc::new(SimulatedCollector::new());
    let writer = Arc::new(SimulatedWriter::new());

    let monitor = Arc::new(HealthMonitor::new(
        MonitorConfig::default(),
        Arc::new(NetworkProbeExecutor::new()),
        event_tx.clone(),
    ));
    let sampler = Arc::new(MetricSampler::new(
        collector.clone(),
        monitor.clone(),
        event_tx.clone(),
    ));
    let advisor = Arc::new(ResourceAdvisor::new(
        AdvisorConfig {
            auto_apply: args.auto_apply_recommendations,
            ..AdvisorConfig::default()
        },
        collector,
        monitor.clone(),
        writer,
        event_tx.clone(),
    ));
    let orchestrator = Orchestrator::new(
        OrchestratorConfig {
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout_secs),
        },
        workload,
        router,
        monitor,
        sampler.clone(),
        event_tx.clone(),
    );

    // The enumerable set of periodic tasks: sampler tick, advisor tick,
    // and the audit forwarder.
    let (tick_shutdown_tx, tick_shutdown_rx) = watch::channel(false);
    let sampler_task = tokio::spawn(sampler.run(
        Duration::from_secs(args.sampler_cadence_secs),
        tick_shutdown_rx.clone(),
    ));
    let advisor_task = tokio::spawn(advisor.run(
        Duration::from_secs(args.advisor_cadence_secs),
        tick_shutdown_rx,
    ));
    let audit_task = tokio::spawn(forward_audit(event_tx.subscribe()));

    wait_for_termination().await;
    info!("Termination signal received, shutting down");

    let report = orchestrator.shutdown().await;
    info!(
        completed = report.completed,
        forced = report.forced,
        "Shutdown complete"
    );

    let _ = tick_shutdown_tx.send(true);
    let _ = sampler_task.await;
    let _ = advisor_task.await;
    audit_task.abort();

    Ok(())
}

/// Forward every control-plane event to the audit log.
async fn forward_audit(mut events: broadcast::Receiver<plum_types::PlumEventEnvelope>) {
    loop {
        match events.recv().await {
            Ok(envelope) => match serde_json::to_string(&envelope) {
                Ok(line) => info!(target: "plum::audit", "{}", line),
                Err(e) => error!(error = %e, "Unserializable audit event"),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                error!(skipped = skipped, "Audit stream lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

/// Resolve on SIGTERM or ctrl-c.
async fn wait_for_termination() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = tokio::signal::ctrl_c() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

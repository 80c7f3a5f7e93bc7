//! TCP connect probe.

use super::ProbeOutcome;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;

pub(super) async fn probe(
    name: &str,
    host: &str,
    port: u16,
    timeout: Duration,
    started: Instant,
) -> ProbeOutcome {
    let address = format!("{}:{}", host, port);

    match tokio::time::timeout(timeout, TcpStream::connect(&address)).await {
        Ok(Ok(_stream)) => ProbeOutcome::pass(name, started.elapsed()),
        Ok(Err(e)) => ProbeOutcome::fail(
            name,
            started.elapsed(),
            format!("connect to {} failed: {}", address, e),
        ),
        Err(_) => ProbeOutcome::fail(
            name,
            started.elapsed(),
            format!("connect to {} timed out after {}ms", address, timeout.as_millis()),
        ),
    }
}

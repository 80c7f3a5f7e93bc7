//! gRPC health probe using the standard `grpc.health.v1` protocol.

use super::ProbeOutcome;
use std::time::{Duration, Instant};
use tonic_health::pb::health_check_response::ServingStatus;
use tonic_health::pb::health_client::HealthClient;
use tonic_health::pb::HealthCheckRequest;

pub(super) async fn probe(
    name: &str,
    host: &str,
    port: u16,
    service: &str,
    timeout: Duration,
    started: Instant,
) -> ProbeOutcome {
    let uri = format!("http://{}:{}", host, port);

    let endpoint = match tonic::transport::Endpoint::from_shared(uri.clone()) {
        Ok(e) => e.connect_timeout(timeout).timeout(timeout),
        Err(e) => {
            return ProbeOutcome::fail(
                name,
                started.elapsed(),
                format!("invalid gRPC endpoint {}: {}", uri, e),
            )
        }
    };

    let channel = match endpoint.connect().await {
        Ok(c) => c,
        Err(e) => {
            return ProbeOutcome::fail(
                name,
                started.elapsed(),
                format!("connect to {} failed: {}", uri, e),
            )
        }
    };

    let mut client = HealthClient::new(channel);
    let request = HealthCheckRequest {
        service: service.to_string(),
    };

    match client.check(request).await {
        Ok(response) => {
            let status = response.into_inner().status;
            if status == ServingStatus::Serving as i32 {
                ProbeOutcome::pass(name, started.elapsed())
            } else {
                ProbeOutcome::fail(
                    name,
                    started.elapsed(),
                    format!("service {:?} reported status {}", service, status),
                )
            }
        }
        Err(status) => ProbeOutcome::fail(
            name,
            started.elapsed(),
            format!("health check failed: {}", status),
        ),
    }
}

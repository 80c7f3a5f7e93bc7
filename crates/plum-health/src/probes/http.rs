//! HTTP health probe.
//!
//! Passes only when the status code is in the expected set AND, if a body
//! matcher is configured, the body contains it.

use super::ProbeOutcome;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[allow(clippy::too_many_arguments)]
pub(super) async fn probe(
    client: &reqwest::Client,
    name: &str,
    url: &str,
    method: &str,
    headers: &HashMap<String, String>,
    expected_status: &[u16],
    body_matcher: Option<&str>,
    timeout: Duration,
    started: Instant,
) -> ProbeOutcome {
    let method = match reqwest::Method::from_bytes(method.as_bytes()) {
        Ok(m) => m,
        Err(_) => {
            return ProbeOutcome::fail(
                name,
                started.elapsed(),
                format!("invalid HTTP method {:?}", method),
            )
        }
    };

    let mut request = client.request(method, url).timeout(timeout);
    for (key, value) in headers {
        request = request.header(key, value);
    }

    let response = match request.send().await {
        Ok(r) => r,
        Err(e) if e.is_timeout() => {
            return ProbeOutcome::fail(
                name,
                started.elapsed(),
                format!("request timed out after {}ms", timeout.as_millis()),
            )
        }
        Err(e) => {
            return ProbeOutcome::fail(name, started.elapsed(), format!("request failed: {}", e))
        }
    };

    let status = response.status().as_u16();
    if !expected_status.contains(&status) {
        return ProbeOutcome::fail(
            name,
            started.elapsed(),
            format!("unexpected status {} (expected {:?})", status, expected_status),
        );
    }

    if let Some(matcher) = body_matcher {
        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => {
                return ProbeOutcome::fail(
                    name,
                    started.elapsed(),
                    format!("failed reading body: {}", e),
                )
            }
        };
        if !body.contains(matcher) {
            return ProbeOutcome::fail(
                name,
                started.elapsed(),
                format!("body does not contain {:?}", matcher),
            );
        }
    }

    ProbeOutcome::pass(name, started.elapsed())
}

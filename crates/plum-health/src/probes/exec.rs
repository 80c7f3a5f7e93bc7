//! Command execution probe.

use super::ProbeOutcome;
use std::time::{Duration, Instant};
use tokio::process::Command;

pub(super) async fn probe(
    name: &str,
    argv: &[String],
    expected_exit: i32,
    timeout: Duration,
    started: Instant,
) -> ProbeOutcome {
    let Some((program, args)) = argv.split_first() else {
        return ProbeOutcome::fail(name, started.elapsed(), "empty argv");
    };

    let output = Command::new(program).args(args).kill_on_drop(true).output();

    let output = match tokio::time::timeout(timeout, output).await {
        Ok(Ok(o)) => o,
        Ok(Err(e)) => {
            return ProbeOutcome::fail(
                name,
                started.elapsed(),
                format!("failed to spawn {:?}: {}", program, e),
            )
        }
        Err(_) => {
            return ProbeOutcome::fail(
                name,
                started.elapsed(),
                format!("{:?} timed out after {}ms", program, timeout.as_millis()),
            )
        }
    };

    let code = output.status.code().unwrap_or(-1);
    if code == expected_exit {
        ProbeOutcome::pass(name, started.elapsed())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = stderr.trim();
        let message = if detail.is_empty() {
            format!("exit code {} (expected {})", code, expected_exit)
        } else {
            format!("exit code {} (expected {}): {}", code, expected_exit, detail)
        };
        ProbeOutcome::fail(name, started.elapsed(), message)
    }
}

//! Health probes
//!
//! A probe descriptor says how to interrogate one aspect of a running
//! plugin: an HTTP endpoint, a TCP port, a gRPC health service, or a
//! command. The executor enforces the probe's own timeout and always
//! classifies — a probe outcome is `Pass`, `Warn`, or `Fail` with a
//! message; probes never raise.

mod exec;
mod grpc;
mod http;
mod tcp;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Classification of a completed probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbeStatus {
    /// The probed aspect is healthy.
    Pass,
    /// The probed aspect answered but outside comfortable bounds.
    Warn,
    /// The probed aspect is broken or unreachable.
    Fail,
}

impl std::fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeStatus::Pass => write!(f, "pass"),
            ProbeStatus::Warn => write!(f, "warn"),
            ProbeStatus::Fail => write!(f, "fail"),
        }
    }
}

/// Result of one probe execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeOutcome {
    /// Name of the probe that ran.
    pub probe: String,

    /// Classification.
    pub status: ProbeStatus,

    /// How long the probe took.
    #[serde(with = "millis_serde")]
    pub response_time: Duration,

    /// Human-readable detail, always present on `Warn` and `Fail`.
    pub message: Option<String>,

    /// When the probe completed.
    pub observed_at: DateTime<Utc>,
}

impl ProbeOutcome {
    /// A passing outcome.
    pub fn pass(probe: impl Into<String>, response_time: Duration) -> Self {
        Self {
            probe: probe.into(),
            status: ProbeStatus::Pass,
            response_time,
            message: None,
            observed_at: Utc::now(),
        }
    }

    /// A warning outcome.
    pub fn warn(
        probe: impl Into<String>,
        response_time: Duration,
        message: impl Into<String>,
    ) -> Self {
        Self {
            probe: probe.into(),
            status: ProbeStatus::Warn,
            response_time,
            message: Some(message.into()),
            observed_at: Utc::now(),
        }
    }

    /// A failing outcome.
    pub fn fail(
        probe: impl Into<String>,
        response_time: Duration,
        message: impl Into<String>,
    ) -> Self {
        Self {
            probe: probe.into(),
            status: ProbeStatus::Fail,
            response_time,
            message: Some(message.into()),
            observed_at: Utc::now(),
        }
    }
}

/// What a probe interrogates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProbeKind {
    /// HTTP request; passes when the status code is expected and, if a
    /// matcher is given, the body contains it.
    Http {
        url: String,
        method: String,
        headers: HashMap<String, String>,
        expected_status: Vec<u16>,
        body_matcher: Option<String>,
    },

    /// TCP connect; passes when the connection opens before the timeout.
    Tcp { host: String, port: u16 },

    /// Standard `grpc.health.v1` check; passes on `SERVING`.
    Grpc {
        host: String,
        port: u16,
        service: String,
    },

    /// Run a command; passes when the exit code matches.
    Exec {
        argv: Vec<String>,
        expected_exit: i32,
    },
}

/// One probe: a kind plus its schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeSpec {
    /// Name, unique within a plugin's probe set.
    pub name: String,

    /// What to interrogate.
    pub kind: ProbeKind,

    /// How often the probe runs.
    #[serde(with = "millis_serde")]
    pub period: Duration,

    /// Budget for one execution; the executor never blocks meaningfully
    /// longer than this.
    #[serde(with = "millis_serde")]
    pub timeout: Duration,

    /// Soft latency bound: a passing probe slower than this classifies as
    /// `Warn` instead.
    #[serde(default, with = "opt_millis_serde")]
    pub warn_after: Option<Duration>,
}

impl ProbeSpec {
    /// An HTTP GET probe expecting a 200.
    pub fn http_get(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ProbeKind::Http {
                url: url.into(),
                method: "GET".into(),
                headers: HashMap::new(),
                expected_status: vec![200],
                body_matcher: None,
            },
            period: Duration::from_secs(10),
            timeout: Duration::from_secs(5),
            warn_after: None,
        }
    }

    /// A TCP connect probe.
    pub fn tcp(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            kind: ProbeKind::Tcp {
                host: host.into(),
                port,
            },
            period: Duration::from_secs(10),
            timeout: Duration::from_secs(3),
            warn_after: None,
        }
    }

    /// Override the probe period.
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Override the probe timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Classify passing-but-slow probes as `Warn`.
    pub fn with_warn_after(mut self, warn_after: Duration) -> Self {
        self.warn_after = Some(warn_after);
        self
    }
}

/// Executes probe descriptors.
///
/// The monitor holds one executor; tests substitute a scripted one.
#[async_trait]
pub trait ProbeExecutor: Send + Sync {
    /// Run the probe, enforcing its timeout. Classifies, never raises.
    async fn execute(&self, spec: &ProbeSpec) -> ProbeOutcome;
}

/// Executor that performs real network and process I/O.
pub struct NetworkProbeExecutor {
    client: reqwest::Client,
}

impl NetworkProbeExecutor {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for NetworkProbeExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProbeExecutor for NetworkProbeExecutor {
    async fn execute(&self, spec: &ProbeSpec) -> ProbeOutcome {
        let started = std::time::Instant::now();

        // Outer guard: whatever the transport does, the probe resolves
        // within timeout plus a small grace period.
        let grace = spec.timeout + Duration::from_millis(250);
        let run = async {
            match &spec.kind {
                ProbeKind::Http {
                    url,
                    method,
                    headers,
                    expected_status,
                    body_matcher,
                } => {
                    http::probe(
                        &self.client,
                        &spec.name,
                        url,
                        method,
                        headers,
                        expected_status,
                        body_matcher.as_deref(),
                        spec.timeout,
                        started,
                    )
                    .await
                }
                ProbeKind::Tcp { host, port } => {
                    tcp::probe(&spec.name, host, *port, spec.timeout, started).await
                }
                ProbeKind::Grpc {
                    host,
                    port,
                    service,
                } => grpc::probe(&spec.name, host, *port, service, spec.timeout, started).await,
                ProbeKind::Exec {
                    argv,
                    expected_exit,
                } => exec::probe(&spec.name, argv, *expected_exit, spec.timeout, started).await,
            }
        };

        let outcome = match tokio::time::timeout(grace, run).await {
            Ok(outcome) => outcome,
            Err(_) => ProbeOutcome::fail(
                &spec.name,
                started.elapsed(),
                format!("probe timed out after {}ms", spec.timeout.as_millis()),
            ),
        };

        // Passing but slow is a degradation signal, not a failure.
        if outcome.status == ProbeStatus::Pass {
            if let Some(warn_after) = spec.warn_after {
                if outcome.response_time > warn_after {
                    return ProbeOutcome::warn(
                        &spec.name,
                        outcome.response_time,
                        format!(
                            "responded in {}ms (soft bound {}ms)",
                            outcome.response_time.as_millis(),
                            warn_after.as_millis()
                        ),
                    );
                }
            }
        }
        outcome
    }
}

/// Executor that returns a fixed status without any I/O.
///
/// Used by the daemon's local simulation mode and by tests that exercise
/// the monitor's aggregation rather than probe transports.
pub struct StaticProbeExecutor {
    status: ProbeStatus,
}

impl StaticProbeExecutor {
    /// An executor whose probes always pass.
    pub fn passing() -> Self {
        Self {
            status: ProbeStatus::Pass,
        }
    }

    /// An executor returning the given status for every probe.
    pub fn with_status(status: ProbeStatus) -> Self {
        Self { status }
    }
}

#[async_trait]
impl ProbeExecutor for StaticProbeExecutor {
    async fn execute(&self, spec: &ProbeSpec) -> ProbeOutcome {
        match self.status {
            ProbeStatus::Pass => ProbeOutcome::pass(&spec.name, Duration::from_millis(1)),
            ProbeStatus::Warn => {
                ProbeOutcome::warn(&spec.name, Duration::from_millis(1), "static warn")
            }
            ProbeStatus::Fail => {
                ProbeOutcome::fail(&spec.name, Duration::from_millis(1), "static fail")
            }
        }
    }
}

mod millis_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

mod opt_millis_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.map(|d| d.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tcp_probe_against_local_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let executor = NetworkProbeExecutor::new();
        let spec = ProbeSpec::tcp("tcp", "127.0.0.1", port);

        let outcome = executor.execute(&spec).await;
        assert_eq!(outcome.status, ProbeStatus::Pass);
    }

    #[tokio::test]
    async fn test_tcp_probe_refused_connection_fails() {
        // Bind then drop to get a port that refuses connections.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let executor = NetworkProbeExecutor::new();
        let spec = ProbeSpec::tcp("tcp", "127.0.0.1", port);

        let outcome = executor.execute(&spec).await;
        assert_eq!(outcome.status, ProbeStatus::Fail);
        assert!(outcome.message.is_some());
    }

    #[tokio::test]
    async fn test_exec_probe_exit_codes() {
        let executor = NetworkProbeExecutor::new();

        let pass = ProbeSpec {
            name: "exec".into(),
            kind: ProbeKind::Exec {
                argv: vec!["true".into()],
                expected_exit: 0,
            },
            period: Duration::from_secs(10),
            timeout: Duration::from_secs(5),
            warn_after: None,
        };
        assert_eq!(executor.execute(&pass).await.status, ProbeStatus::Pass);

        let fail = ProbeSpec {
            name: "exec".into(),
            kind: ProbeKind::Exec {
                argv: vec!["false".into()],
                expected_exit: 0,
            },
            period: Duration::from_secs(10),
            timeout: Duration::from_secs(5),
            warn_after: None,
        };
        assert_eq!(executor.execute(&fail).await.status, ProbeStatus::Fail);
    }

    #[tokio::test]
    async fn test_slow_pass_becomes_warn() {
        let executor = NetworkProbeExecutor::new();

        // A sleep that passes but blows through the soft latency bound.
        let slow = ProbeSpec {
            name: "exec".into(),
            kind: ProbeKind::Exec {
                argv: vec!["sleep".into(), "0.05".into()],
                expected_exit: 0,
            },
            period: Duration::from_secs(10),
            timeout: Duration::from_secs(5),
            warn_after: Some(Duration::from_millis(1)),
        };

        let outcome = executor.execute(&slow).await;
        assert_eq!(outcome.status, ProbeStatus::Warn);
        assert!(outcome.message.unwrap().contains("soft bound"));
    }
}

//! Readiness monitoring - waiting for a launched process to accept work

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, timeout};
use tracing::{debug, info};

use crate::error::{E2eError, E2eResult};
use crate::process::{ExitInfo, ProcessHandle};

/// Condition that marks a process as ready
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Readiness {
    /// A line of output contains `pattern`
    OutputContains { pattern: String },

    /// Polling `url` yields a request whose success equals `expect_success`.
    /// With `check_status` off any HTTP response counts as success;
    /// with it on only 2xx does.
    HttpPoll {
        url: String,
        #[serde(default = "default_expect_success")]
        expect_success: bool,
        #[serde(default)]
        check_status: bool,
    },
}

fn default_expect_success() -> bool {
    true
}

impl Readiness {
    pub fn output(pattern: impl Into<String>) -> Self {
        Readiness::OutputContains { pattern: pattern.into() }
    }

    /// Wait until `url` answers at all
    pub fn reachable(url: impl Into<String>) -> Self {
        Readiness::HttpPoll {
            url: url.into(),
            expect_success: true,
            check_status: false,
        }
    }
}

/// Outcome of one HTTP probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    Unreachable,
    Responded(u16),
}

impl ProbeResult {
    pub fn is_success(&self, check_status: bool) -> bool {
        match self {
            ProbeResult::Unreachable => false,
            ProbeResult::Responded(status) => !check_status || (200..300).contains(status),
        }
    }
}

/// Issues a single HTTP readiness probe
#[async_trait]
pub trait HttpProbe: Send + Sync {
    async fn probe(&self, url: &str) -> ProbeResult;
}

/// HTTP probe over reqwest
#[derive(Debug, Clone)]
pub struct ReqwestProbe {
    client: reqwest::Client,
}

impl ReqwestProbe {
    pub fn new() -> E2eResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpProbe for ReqwestProbe {
    async fn probe(&self, url: &str) -> ProbeResult {
        match self.client.get(url).send().await {
            Ok(resp) => ProbeResult::Responded(resp.status().as_u16()),
            Err(e) => {
                // Connection refused is expected while the server starts
                if !e.is_connect() {
                    debug!(url = %url, error = %e, "Probe error");
                }
                ProbeResult::Unreachable
            }
        }
    }
}

fn premature_exit(name: &str, exit: ExitInfo) -> E2eError {
    E2eError::PrematureExit {
        name: name.to_string(),
        status: exit.to_string(),
    }
}

/// Wait until `readiness` holds for `handle`.
///
/// Fails with `PrematureExit` if the process exits first. Has no time
/// limit of its own; see [`wait_ready_within`].
pub async fn wait_ready(
    handle: &mut dyn ProcessHandle,
    readiness: &Readiness,
    probe: &dyn HttpProbe,
    poll_interval: Duration,
) -> E2eResult<()> {
    let name = handle.name().to_string();
    let mut exited = handle.exited();

    match readiness {
        Readiness::OutputContains { pattern } => loop {
            tokio::select! {
                biased;
                line = handle.next_line() => match line {
                    Some(line) if line.contains(pattern.as_str()) => {
                        info!(process = %name, "Ready: output matched '{}'", pattern);
                        return Ok(());
                    }
                    Some(_) => {}
                    None => return Err(premature_exit(&name, (&mut exited).await)),
                },
                exit = &mut exited => return Err(premature_exit(&name, exit)),
            }
        },
        Readiness::HttpPoll {
            url,
            expect_success,
            check_status,
        } => {
            let mut attempts = 0u32;
            loop {
                attempts += 1;
                let result = tokio::select! {
                    biased;
                    exit = &mut exited => return Err(premature_exit(&name, exit)),
                    result = probe.probe(url) => result,
                };
                debug!(process = %name, url = %url, attempt = attempts, result = ?result, "Readiness probe");

                if result.is_success(*check_status) == *expect_success {
                    info!(process = %name, url = %url, "Ready after {} probe(s)", attempts);
                    return Ok(());
                }

                tokio::select! {
                    biased;
                    exit = &mut exited => return Err(premature_exit(&name, exit)),
                    _ = sleep(poll_interval) => {}
                }
            }
        }
    }
}

/// [`wait_ready`] bounded by `limit`; expiry is `ReadinessTimeout`
pub async fn wait_ready_within(
    handle: &mut dyn ProcessHandle,
    readiness: &Readiness,
    probe: &dyn HttpProbe,
    poll_interval: Duration,
    limit: Duration,
) -> E2eResult<()> {
    let name = handle.name().to_string();
    match timeout(limit, wait_ready(handle, readiness, probe, poll_interval)).await {
        Ok(result) => result,
        Err(_) => Err(E2eError::ReadinessTimeout { name, waited: limit }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_success_without_status_check() {
        assert!(ProbeResult::Responded(200).is_success(false));
        assert!(ProbeResult::Responded(404).is_success(false));
        assert!(ProbeResult::Responded(503).is_success(false));
        assert!(!ProbeResult::Unreachable.is_success(false));
    }

    #[test]
    fn test_probe_success_with_status_check() {
        assert!(ProbeResult::Responded(200).is_success(true));
        assert!(ProbeResult::Responded(204).is_success(true));
        assert!(!ProbeResult::Responded(301).is_success(true));
        assert!(!ProbeResult::Responded(500).is_success(true));
        assert!(!ProbeResult::Unreachable.is_success(true));
    }

    #[test]
    fn test_readiness_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            readiness: Readiness,
        }

        let output: Wrapper = toml::from_str(
            r#"
[readiness]
kind = "output_contains"
pattern = "running on port 4444"
"#,
        )
        .unwrap();
        assert_eq!(output.readiness, Readiness::output("running on port 4444"));

        let poll: Wrapper = toml::from_str(
            r#"
[readiness]
kind = "http_poll"
url = "http://localhost:8080/"
"#,
        )
        .unwrap();
        assert_eq!(poll.readiness, Readiness::reachable("http://localhost:8080/"));
    }

    #[test]
    fn test_readiness_wait_until_down() {
        #[derive(Deserialize)]
        struct Wrapper {
            readiness: Readiness,
        }

        let down: Wrapper = toml::from_str(
            r#"
[readiness]
kind = "http_poll"
url = "http://localhost:8080/"
expect_success = false
check_status = true
"#,
        )
        .unwrap();
        match down.readiness {
            Readiness::HttpPoll {
                expect_success,
                check_status,
                ..
            } => {
                assert!(!expect_success);
                assert!(check_status);
            }
            other => panic!("unexpected readiness {:?}", other),
        }
    }
}

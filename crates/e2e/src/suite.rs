//! Test suite execution step
//!
//! A suite runs while both managed processes are up. Its failure is a
//! value in the [`SuiteReport`], never an error: teardown must still run.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::SuiteConfig;
use crate::error::E2eResult;
use crate::process::{forward_lines, ExitInfo, OutputStream};

/// Where the suite should point its browser and webdriver client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteContext {
    /// Address of the application under test
    pub base_url: String,
    /// Address of the webdriver hub
    pub driver_url: String,
}

/// Result of one suite run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteReport {
    pub name: String,
    pub success: bool,
    pub exit_code: Option<i32>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub error: Option<String>,
}

impl SuiteReport {
    fn finish(
        name: &str,
        started_at: DateTime<Utc>,
        start: Instant,
        exit_code: Option<i32>,
        error: Option<String>,
    ) -> Self {
        Self {
            name: name.to_string(),
            success: error.is_none(),
            exit_code,
            started_at,
            duration_ms: start.elapsed().as_millis() as u64,
            error,
        }
    }
}

/// A test suite run against the managed processes
#[async_trait]
pub trait TestSuite: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, ctx: &SuiteContext) -> SuiteReport;
}

/// Runs an external test runner (protractor, playwright, ...).
///
/// `{base_url}` and `{driver_url}` in arguments are replaced from the
/// [`SuiteContext`].
#[derive(Debug, Clone)]
pub struct CommandSuite {
    name: String,
    command: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    cwd: Option<PathBuf>,
}

impl CommandSuite {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn from_config(config: &SuiteConfig) -> Self {
        Self {
            name: config.name.clone(),
            command: config.command.clone(),
            args: config.args.clone(),
            env: config.env.clone(),
            cwd: config.cwd.clone(),
        }
    }

    /// Arguments with context placeholders substituted
    pub fn expand_args(&self, ctx: &SuiteContext) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{base_url}", &ctx.base_url)
                    .replace("{driver_url}", &ctx.driver_url)
            })
            .collect()
    }

    /// Run the test runner to completion: `(exit code, failure reason)`
    async fn execute(&self, ctx: &SuiteContext) -> (Option<i32>, Option<String>) {
        let args = self.expand_args(ctx);
        info!(suite = %self.name, command = %self.command, args = ?args, "Starting test runner");

        let mut cmd = Command::new(&self.command);
        cmd.args(&args)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return (None, Some(format!("failed to start {}: {}", self.command, e))),
        };

        let mut forwarders = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            forwarders.push(tokio::spawn(forward_lines(
                self.name.clone(),
                OutputStream::Stdout,
                stdout,
                None,
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            forwarders.push(tokio::spawn(forward_lines(
                self.name.clone(),
                OutputStream::Stderr,
                stderr,
                None,
            )));
        }

        let status = child.wait().await;
        for forwarder in forwarders {
            let _ = forwarder.await;
        }

        let exit = match status {
            Ok(status) => ExitInfo::from(status),
            Err(e) => return (None, Some(format!("failed waiting for {}: {}", self.command, e))),
        };
        debug!(suite = %self.name, status = %exit, "Test runner finished");
        if exit.success() {
            (exit.code, None)
        } else {
            (exit.code, Some(format!("test runner failed ({})", exit)))
        }
    }
}

#[async_trait]
impl TestSuite for CommandSuite {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &SuiteContext) -> SuiteReport {
        let started_at = Utc::now();
        let start = Instant::now();
        let (exit_code, error) = self.execute(ctx).await;
        SuiteReport::finish(&self.name, started_at, start, exit_code, error)
    }
}

/// Suite backed by an async closure returning `Err(reason)` on failure
pub struct FnSuite<F> {
    name: String,
    f: F,
}

impl<F, Fut> FnSuite<F>
where
    F: Fn(SuiteContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), String>> + Send,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

#[async_trait]
impl<F, Fut> TestSuite for FnSuite<F>
where
    F: Fn(SuiteContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), String>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &SuiteContext) -> SuiteReport {
        let started_at = Utc::now();
        let start = Instant::now();
        let error = (self.f)(ctx.clone()).await.err();
        SuiteReport::finish(&self.name, started_at, start, None, error)
    }
}

/// Write `report` as `test-results.json` under `dir`
pub fn write_report(dir: &Path, report: &SuiteReport) -> E2eResult<PathBuf> {
    std::fs::create_dir_all(dir)?;

    let path = dir.join("test-results.json");
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(&path, json)?;

    info!("Results written to: {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> SuiteContext {
        SuiteContext {
            base_url: "http://localhost:8080/".into(),
            driver_url: "http://localhost:4444/wd/hub".into(),
        }
    }

    #[test]
    fn test_expand_args() {
        let suite = CommandSuite::new("protractor", "protractor").with_args([
            "protractor.config.js",
            "--seleniumAddress",
            "{driver_url}",
            "--baseUrl",
            "{base_url}",
        ]);
        assert_eq!(
            suite.expand_args(&ctx()),
            vec![
                "protractor.config.js",
                "--seleniumAddress",
                "http://localhost:4444/wd/hub",
                "--baseUrl",
                "http://localhost:8080/",
            ]
        );
    }

    #[test]
    fn test_expand_args_inline_placeholder() {
        let suite = CommandSuite::new("runner", "runner").with_args(["--url={base_url}login"]);
        assert_eq!(suite.expand_args(&ctx()), vec!["--url=http://localhost:8080/login"]);
    }

    #[tokio::test]
    async fn test_fn_suite_reports_failure_as_value() {
        let suite = FnSuite::new("failing", |_ctx| async { Err("boom".to_string()) });
        let report = suite.run(&ctx()).await;
        assert!(!report.success);
        assert_eq!(report.error.as_deref(), Some("boom"));
        assert_eq!(report.name, "failing");
    }

    #[tokio::test]
    async fn test_fn_suite_sees_context() {
        let suite = FnSuite::new("ctx", |ctx: SuiteContext| async move {
            if ctx.driver_url.ends_with("/wd/hub") {
                Ok(())
            } else {
                Err(format!("unexpected driver url {}", ctx.driver_url))
            }
        });
        assert!(suite.run(&ctx()).await.success);
    }

    #[tokio::test]
    async fn test_command_suite_missing_binary_is_a_failed_report() {
        let suite = CommandSuite::new("missing", "/definitely/not/a/test-runner");
        let report = suite.run(&ctx()).await;
        assert!(!report.success);
        assert!(report.error.unwrap().contains("failed to start"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_suite_exit_codes() {
        let passing = CommandSuite::new("pass", "sh").with_args(["-c", "echo {base_url}; exit 0"]);
        let report = passing.run(&ctx()).await;
        assert!(report.success);
        assert_eq!(report.exit_code, Some(0));

        let failing = CommandSuite::new("fail", "sh").with_args(["-c", "exit 3"]);
        let report = failing.run(&ctx()).await;
        assert!(!report.success);
        assert_eq!(report.exit_code, Some(3));
    }

    #[test]
    fn test_write_report() {
        let dir = tempfile::tempdir().unwrap();
        let report = SuiteReport {
            name: "protractor".into(),
            success: true,
            exit_code: Some(0),
            started_at: Utc::now(),
            duration_ms: 1200,
            error: None,
        };
        let path = write_report(&dir.path().join("out"), &report).unwrap();
        let written: SuiteReport =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(written.name, "protractor");
        assert!(written.success);
    }
}

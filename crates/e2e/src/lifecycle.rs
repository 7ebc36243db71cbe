//! Lifecycle manager for the test server and browser driver
//!
//! ```text
//! Idle ──setup──▶ Starting ──both ready──▶ Running ──teardown / interrupt──▶ TearingDown ──▶ Stopped
//!                    │                                                           ▲
//!                    └──────── launch or readiness failure, interrupt ───────────┘
//! ```
//!
//! Startup is strictly sequential: the server is launched and fully ready
//! before the driver is launched. Teardown is the exact reverse: driver,
//! then server.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::{Config, Timeouts};
use crate::error::{E2eError, E2eResult};
use crate::interrupt::Interrupt;
use crate::process::{CommandLauncher, Launcher, ProcessHandle, ProcessSpec, StopOutcome};
use crate::readiness::{wait_ready_within, HttpProbe, ReqwestProbe};
use crate::suite::{SuiteContext, SuiteReport, TestSuite};
use crate::watch::ChangeStream;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LifecycleState {
    Idle,
    Starting,
    Running,
    TearingDown,
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::TearingDown => "tearing down",
            LifecycleState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// How a run ended
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// The suite finished (passed or failed) and teardown ran
    Completed(SuiteReport),
    /// An interrupt arrived first; teardown ran
    Interrupted,
}

/// What teardown did to each process, in stop order
#[derive(Debug, Default)]
pub struct TeardownReport {
    pub stopped: Vec<(String, StopOutcome)>,
    pub failures: Vec<E2eError>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Owns the server and driver processes for one run
pub struct Lifecycle {
    launcher: Arc<dyn Launcher>,
    probe: Arc<dyn HttpProbe>,
    server_spec: ProcessSpec,
    driver_spec: ProcessSpec,
    timeouts: Timeouts,
    context: SuiteContext,
    server: Option<Box<dyn ProcessHandle>>,
    driver: Option<Box<dyn ProcessHandle>>,
    state: LifecycleState,
    interrupt_armed: bool,
}

impl Lifecycle {
    pub fn new(launcher: Arc<dyn Launcher>, probe: Arc<dyn HttpProbe>, config: &Config) -> Self {
        Self {
            launcher,
            probe,
            server_spec: config.server.clone(),
            driver_spec: config.driver.clone(),
            timeouts: config.timeouts.clone(),
            context: config.suite.context(),
            server: None,
            driver: None,
            state: LifecycleState::Idle,
            interrupt_armed: false,
        }
    }

    /// Lifecycle over real processes and HTTP
    pub fn from_config(config: &Config) -> E2eResult<Self> {
        Ok(Self::new(
            Arc::new(CommandLauncher),
            Arc::new(ReqwestProbe::new()?),
            config,
        ))
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn context(&self) -> &SuiteContext {
        &self.context
    }

    fn transition(&mut self, to: LifecycleState) {
        debug!(from = %self.state, to = %to, "Lifecycle transition");
        self.state = to;
    }

    fn expect_state(&self, expected: LifecycleState, op: &'static str) -> E2eResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(E2eError::InvalidState {
                from: self.state.to_string(),
                op,
            })
        }
    }

    /// Start the server, then the driver, each only after the previous one
    /// is ready. On failure whatever was started is stopped before the
    /// error is returned, and the lifecycle ends in `Stopped`.
    pub async fn setup(&mut self) -> E2eResult<()> {
        self.expect_state(LifecycleState::Idle, "set up")?;
        self.transition(LifecycleState::Starting);

        if let Err(e) = self.start_all().await {
            error!(error = %e, "Setup failed, stopping anything already started");
            let report = self.teardown().await;
            if !report.is_clean() {
                warn!(failures = report.failures.len(), "Cleanup after failed setup was incomplete");
            }
            return Err(e);
        }

        self.transition(LifecycleState::Running);
        info!("Server and driver are ready");
        Ok(())
    }

    async fn start_all(&mut self) -> E2eResult<()> {
        let poll = self.timeouts.poll_interval();
        let limit = self.timeouts.readiness();

        // Stored before waiting so a readiness failure still tears it down
        let server = self.server.insert(self.launcher.launch(&self.server_spec).await?);
        wait_ready_within(
            &mut **server,
            &self.server_spec.readiness,
            self.probe.as_ref(),
            poll,
            limit,
        )
        .await?;
        server.release_output();

        let driver = self.driver.insert(self.launcher.launch(&self.driver_spec).await?);
        wait_ready_within(
            &mut **driver,
            &self.driver_spec.readiness,
            self.probe.as_ref(),
            poll,
            limit,
        )
        .await?;
        driver.release_output();

        Ok(())
    }

    /// Run `suite` against the running processes. A failing suite is a
    /// report with `success == false`, not an error.
    pub async fn run_suite(&self, suite: &dyn TestSuite) -> E2eResult<SuiteReport> {
        self.expect_state(LifecycleState::Running, "run the test suite")?;

        info!(suite = suite.name(), base_url = %self.context.base_url, "Running test suite");
        let report = suite.run(&self.context).await;
        if report.success {
            info!(suite = %report.name, duration_ms = report.duration_ms, "Suite passed");
        } else {
            warn!(
                suite = %report.name,
                duration_ms = report.duration_ms,
                error = report.error.as_deref().unwrap_or("unknown error"),
                "Suite failed"
            );
        }
        Ok(report)
    }

    /// Stop the driver, then the server. Failures are logged and collected,
    /// never returned. A second call is a no-op.
    pub async fn teardown(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();
        if matches!(self.state, LifecycleState::Idle | LifecycleState::Stopped) {
            debug!(state = %self.state, "Nothing to tear down");
            return report;
        }

        self.transition(LifecycleState::TearingDown);
        let grace = self.timeouts.stop_grace();

        for mut handle in [self.driver.take(), self.server.take()].into_iter().flatten() {
            let name = handle.name().to_string();
            match handle.stop(grace).await {
                Ok(outcome) => {
                    debug!(process = %name, outcome = %outcome, "Teardown step complete");
                    report.stopped.push((name, outcome));
                }
                Err(e) => {
                    error!(process = %name, error = %e, "Teardown step failed");
                    report.failures.push(e);
                }
            }
        }

        self.transition(LifecycleState::Stopped);
        info!(stopped = report.stopped.len(), failures = report.failures.len(), "Teardown complete");
        report
    }

    /// Arm `interrupt` for this run. Only allowed once `Running`; arms at
    /// most once, returning `false` for any later call.
    pub fn arm_interrupt(&mut self, interrupt: &Interrupt) -> E2eResult<bool> {
        self.expect_state(LifecycleState::Running, "arm the interrupt handler")?;
        if self.interrupt_armed {
            debug!("Interrupt handler already armed for this run");
            return Ok(false);
        }
        self.interrupt_armed = true;
        interrupt.arm();
        Ok(true)
    }

    /// `setup` raced against `interrupt`, which starts listening first.
    /// Returns `false` when the interrupt won; whatever was already
    /// launched has been stopped by then.
    async fn setup_unless_interrupted(&mut self, interrupt: &Interrupt) -> E2eResult<bool> {
        interrupt.listen();

        let setup = tokio::select! {
            biased;
            _ = interrupt.triggered() => None,
            result = self.setup() => Some(result),
        };
        match setup {
            Some(result) => result.map(|()| true),
            None => {
                warn!(state = %self.state, "Interrupted during setup");
                self.teardown().await;
                if self.state == LifecycleState::Idle {
                    self.transition(LifecycleState::Stopped);
                }
                Ok(false)
            }
        }
    }

    /// Setup, run the suite once, teardown. An interrupt during setup or
    /// while running abandons the step and goes straight to teardown.
    pub async fn run(&mut self, suite: &dyn TestSuite, interrupt: &Interrupt) -> E2eResult<RunOutcome> {
        if !self.setup_unless_interrupted(interrupt).await? {
            return Ok(RunOutcome::Interrupted);
        }
        self.arm_interrupt(interrupt)?;

        let outcome = tokio::select! {
            biased;
            _ = interrupt.triggered() => Ok(RunOutcome::Interrupted),
            report = self.run_suite(suite) => report.map(RunOutcome::Completed),
        };

        self.teardown().await;
        outcome
    }

    /// Setup once, then run the suite on start and after every batch of
    /// changes until interrupted or the change stream ends. `on_report`
    /// sees every suite report.
    pub async fn watch<F>(
        &mut self,
        suite: &dyn TestSuite,
        changes: &mut ChangeStream,
        interrupt: &Interrupt,
        mut on_report: F,
    ) -> E2eResult<RunOutcome>
    where
        F: FnMut(&SuiteReport),
    {
        if !self.setup_unless_interrupted(interrupt).await? {
            return Ok(RunOutcome::Interrupted);
        }
        self.arm_interrupt(interrupt)?;

        let outcome = self.watch_loop(suite, changes, interrupt, &mut on_report).await;

        self.teardown().await;
        outcome
    }

    async fn watch_loop<F>(
        &self,
        suite: &dyn TestSuite,
        changes: &mut ChangeStream,
        interrupt: &Interrupt,
        on_report: &mut F,
    ) -> E2eResult<RunOutcome>
    where
        F: FnMut(&SuiteReport),
    {
        loop {
            let report = tokio::select! {
                biased;
                _ = interrupt.triggered() => return Ok(RunOutcome::Interrupted),
                report = self.run_suite(suite) => report?,
            };
            on_report(&report);

            let batch = tokio::select! {
                biased;
                _ = interrupt.triggered() => return Ok(RunOutcome::Interrupted),
                batch = changes.next_batch() => batch,
            };
            match batch {
                Some(paths) => {
                    info!("Change detected in {} file(s), rerunning suite", paths.len());
                    debug!(paths = ?paths, "Changed paths");
                }
                None => {
                    info!("File watcher stopped");
                    return Ok(RunOutcome::Completed(report));
                }
            }
        }
    }
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("state", &self.state)
            .field("server", &self.server_spec.name)
            .field("driver", &self.driver_spec.name)
            .field("interrupt_armed", &self.interrupt_armed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(LifecycleState::Idle.to_string(), "idle");
        assert_eq!(LifecycleState::TearingDown.to_string(), "tearing down");
    }

    #[test]
    fn test_teardown_report_clean() {
        let mut report = TeardownReport::default();
        assert!(report.is_clean());
        report.failures.push(E2eError::TeardownFailure {
            name: "server".into(),
            reason: "stuck".into(),
        });
        assert!(!report.is_clean());
    }
}

//! Scripted launcher, process and probe that record what the lifecycle
//! did to them, in order.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use webrig_e2e::{
    Config, E2eError, E2eResult, ExitInfo, HttpProbe, Launcher, ProbeResult, ProcessHandle,
    ProcessSpec, StopOutcome,
};

pub const SERVER: &str = "test-server";
pub const DRIVER: &str = "ghostdriver";
pub const SERVER_URL: &str = "http://localhost:8080/";
pub const DRIVER_READY: &str = "GhostDriver - Main - running on port 4444";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Launched(String),
    Probed(String),
    Stopped(String),
}

#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<Event>>>);

impl Journal {
    pub fn record(&self, event: Event) {
        self.0.lock().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().clone()
    }

    /// Everything except readiness probes
    pub fn lifecycle_events(&self) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| !matches!(e, Event::Probed(_)))
            .collect()
    }

    pub fn count(&self, event: &Event) -> usize {
        self.0.lock().iter().filter(|e| *e == event).count()
    }
}

pub fn launched(name: &str) -> Event {
    Event::Launched(name.to_string())
}

pub fn stopped(name: &str) -> Event {
    Event::Stopped(name.to_string())
}

/// How a mock process behaves once launched
#[derive(Debug, Clone, Default)]
pub struct Script {
    /// Output lines emitted immediately
    pub lines: Vec<String>,
    /// Exit right after the output, with this status
    pub exit: Option<ExitInfo>,
    /// Fail the launch itself
    pub fail_launch: bool,
}

impl Script {
    pub fn lines(lines: &[&str]) -> Self {
        Self {
            lines: lines.iter().map(|l| l.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn exits(code: i32) -> Self {
        Self {
            exit: Some(ExitInfo::code(code)),
            ..Self::default()
        }
    }

    pub fn unlaunchable() -> Self {
        Self {
            fail_launch: true,
            ..Self::default()
        }
    }
}

pub struct MockLauncher {
    journal: Journal,
    scripts: HashMap<String, Script>,
}

impl MockLauncher {
    pub fn new(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            scripts: HashMap::new(),
        }
    }

    pub fn script(mut self, name: &str, script: Script) -> Self {
        self.scripts.insert(name.to_string(), script);
        self
    }
}

#[async_trait]
impl Launcher for MockLauncher {
    async fn launch(&self, spec: &ProcessSpec) -> E2eResult<Box<dyn ProcessHandle>> {
        let script = self.scripts.get(&spec.name).cloned().unwrap_or_default();
        if script.fail_launch {
            return Err(E2eError::LaunchFailure {
                name: spec.name.clone(),
                command: spec.command.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            });
        }
        self.journal.record(Event::Launched(spec.name.clone()));

        let (line_tx, lines) = mpsc::unbounded_channel();
        for line in &script.lines {
            let _ = line_tx.send(line.clone());
        }
        let (exit_tx, exit_rx) = watch::channel(None);
        let line_tx = match script.exit {
            Some(exit) => {
                exit_tx.send_replace(Some(exit));
                None
            }
            None => Some(line_tx),
        };

        Ok(Box::new(MockProcess {
            name: spec.name.clone(),
            journal: self.journal.clone(),
            lines: Some(lines),
            _line_tx: line_tx,
            exit_tx,
            exit_rx,
        }))
    }
}

pub struct MockProcess {
    name: String,
    journal: Journal,
    lines: Option<mpsc::UnboundedReceiver<String>>,
    // Held open so a live process's output never ends
    _line_tx: Option<mpsc::UnboundedSender<String>>,
    exit_tx: watch::Sender<Option<ExitInfo>>,
    exit_rx: watch::Receiver<Option<ExitInfo>>,
}

#[async_trait]
impl ProcessHandle for MockProcess {
    fn name(&self) -> &str {
        &self.name
    }

    fn pid(&self) -> Option<u32> {
        None
    }

    async fn next_line(&mut self) -> Option<String> {
        match self.lines.as_mut() {
            Some(lines) => lines.recv().await,
            None => None,
        }
    }

    fn release_output(&mut self) {
        self.lines = None;
    }

    fn exited(&self) -> BoxFuture<'static, ExitInfo> {
        let mut exit = self.exit_rx.clone();
        async move {
            match exit.wait_for(Option::is_some).await {
                Ok(status) => status.unwrap_or_default(),
                Err(_) => ExitInfo::default(),
            }
        }
        .boxed()
    }

    fn exit_status(&self) -> Option<ExitInfo> {
        *self.exit_rx.borrow()
    }

    async fn stop(&mut self, _grace: Duration) -> E2eResult<StopOutcome> {
        if self.exit_status().is_some() {
            return Ok(StopOutcome::AlreadyStopped);
        }
        self.journal.record(Event::Stopped(self.name.clone()));
        let exit = ExitInfo::signalled(15);
        self.exit_tx.send_replace(Some(exit));
        Ok(StopOutcome::Exited(exit))
    }
}

/// Probe that answers 200 from the `ready_after`-th call onwards
pub struct MockProbe {
    journal: Journal,
    ready_after: u32,
    calls: AtomicU32,
}

impl MockProbe {
    pub fn ready_after(journal: &Journal, polls: u32) -> Self {
        Self {
            journal: journal.clone(),
            ready_after: polls,
            calls: AtomicU32::new(0),
        }
    }

    pub fn never_ready(journal: &Journal) -> Self {
        Self::ready_after(journal, u32::MAX)
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpProbe for MockProbe {
    async fn probe(&self, url: &str) -> ProbeResult {
        self.journal.record(Event::Probed(url.to_string()));
        let calls = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if calls >= self.ready_after {
            ProbeResult::Responded(200)
        } else {
            ProbeResult::Unreachable
        }
    }
}

/// Default configuration with test-sized timeouts
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.timeouts.readiness_secs = 5;
    config.timeouts.poll_interval_ms = 5;
    config.timeouts.stop_grace_ms = 200;
    config
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("webrig_e2e=debug")
        .try_init();
}

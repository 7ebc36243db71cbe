//! Process launcher - spawning managed processes, forwarding their output,
//! and stopping them with a bounded grace period

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep, timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::error::{E2eError, E2eResult};
use crate::readiness::Readiness;

/// How long to wait for exit after SIGKILL before giving up on a process.
const KILL_WAIT: Duration = Duration::from_secs(5);

/// Interval between checks for remaining process-group members
const GROUP_POLL: Duration = Duration::from_millis(20);

/// A managed external process: what to run and how to tell it is ready
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSpec {
    /// Display name used in logs and errors
    pub name: String,

    /// Program to execute
    pub command: String,

    /// Arguments, in order
    #[serde(default)]
    pub args: Vec<String>,

    /// Condition that marks the process as ready
    pub readiness: Readiness,

    /// Signal sent on stop (`SIGTERM`, `TERM`, `15`, ...)
    #[serde(default = "default_stop_signal")]
    pub stop_signal: String,

    /// Extra environment variables
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Working directory (inherits ours when unset)
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

fn default_stop_signal() -> String {
    "SIGTERM".to_string()
}

impl ProcessSpec {
    pub fn new(name: impl Into<String>, command: impl Into<String>, readiness: Readiness) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            readiness,
            stop_signal: default_stop_signal(),
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

    pub fn with_stop_signal(mut self, signal: impl Into<String>) -> Self {
        self.stop_signal = signal.into();
        self
    }

    /// The program actually executed. npm-style shims on Windows are
    /// `.cmd` files and are not found without the extension.
    pub fn program(&self) -> String {
        if cfg!(windows) && std::path::Path::new(&self.command).extension().is_none() {
            format!("{}.cmd", self.command)
        } else {
            self.command.clone()
        }
    }
}

/// Parse a signal name or number into a signal number.
///
/// Accepts `SIGTERM`, `TERM`, `term` and plain numbers.
pub fn parse_signal(name: &str) -> Option<i32> {
    let upper = name.trim().to_ascii_uppercase();
    let bare = upper.strip_prefix("SIG").unwrap_or(&upper);
    match bare {
        "HUP" => Some(1),
        "INT" => Some(2),
        "QUIT" => Some(3),
        "KILL" => Some(9),
        "TERM" => Some(15),
        other => other.parse::<i32>().ok().filter(|n| (1..=64).contains(n)),
    }
}

/// How a process ended
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitInfo {
    /// Exit code if the process exited normally
    pub code: Option<i32>,
    /// Signal that terminated the process (unix)
    pub signal: Option<i32>,
}

impl ExitInfo {
    pub fn code(code: i32) -> Self {
        Self { code: Some(code), signal: None }
    }

    pub fn signalled(signal: i32) -> Self {
        Self { code: None, signal: Some(signal) }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for ExitInfo {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self { code: status.code(), signal }
    }
}

impl fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(signal)) => write!(f, "killed by signal {}", signal),
            (None, None) => write!(f, "unknown exit status"),
        }
    }
}

/// Result of a stop request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Exited within the grace period after the stop signal
    Exited(ExitInfo),
    /// Ignored the stop signal, or left group members that did, and was
    /// force-killed
    Killed,
    /// Had already exited before the stop request
    AlreadyStopped,
}

impl fmt::Display for StopOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopOutcome::Exited(exit) => write!(f, "stopped ({})", exit),
            StopOutcome::Killed => write!(f, "force-killed after grace period"),
            StopOutcome::AlreadyStopped => write!(f, "already stopped"),
        }
    }
}

/// A handle to a launched process
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    fn name(&self) -> &str;

    fn pid(&self) -> Option<u32>;

    /// Next line of combined stdout/stderr; `None` once both streams closed
    /// or output was released with [`ProcessHandle::release_output`].
    async fn next_line(&mut self) -> Option<String>;

    /// Stop keeping output lines for `next_line`. Lines are still logged.
    fn release_output(&mut self);

    /// Future resolving with the exit status once the process has exited.
    /// Owns its state, so it can be polled alongside `next_line`.
    fn exited(&self) -> BoxFuture<'static, ExitInfo>;

    /// Exit status if the process has already exited
    fn exit_status(&self) -> Option<ExitInfo>;

    /// Send the stop signal, wait up to `grace`, then force-kill.
    /// Stopping an exited process with nothing left of it is a no-op
    /// returning `AlreadyStopped`.
    async fn stop(&mut self, grace: Duration) -> E2eResult<StopOutcome>;
}

/// Starts processes described by a [`ProcessSpec`]
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, spec: &ProcessSpec) -> E2eResult<Box<dyn ProcessHandle>>;
}

/// Launches real OS processes through `tokio::process`
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandLauncher;

#[async_trait]
impl Launcher for CommandLauncher {
    async fn launch(&self, spec: &ProcessSpec) -> E2eResult<Box<dyn ProcessHandle>> {
        Ok(Box::new(ChildProcess::spawn(spec)?))
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum OutputStream {
    Stdout,
    Stderr,
}

/// A running child process owned through its reaper task
pub struct ChildProcess {
    name: String,
    pid: Option<u32>,
    stop_signal: i32,
    lines: Option<mpsc::UnboundedReceiver<String>>,
    exit: watch::Receiver<Option<ExitInfo>>,
    kill: Option<oneshot::Sender<()>>,
}

impl ChildProcess {
    /// Spawn the process with piped output in its own process group
    pub fn spawn(spec: &ProcessSpec) -> E2eResult<Self> {
        let stop_signal = parse_signal(&spec.stop_signal).ok_or_else(|| {
            E2eError::Config(format!(
                "unknown stop signal '{}' for {}",
                spec.stop_signal, spec.name
            ))
        })?;

        let program = spec.program();
        info!(process = %spec.name, command = %program, args = ?spec.args, "Launching process");

        let mut cmd = Command::new(&program);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }
        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        let mut child = cmd.spawn().map_err(|source| E2eError::LaunchFailure {
            name: spec.name.clone(),
            command: program.clone(),
            source,
        })?;
        let pid = child.id();
        debug!(process = %spec.name, pid = ?pid, "Process spawned");

        let (line_tx, lines) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(
                spec.name.clone(),
                OutputStream::Stdout,
                stdout,
                Some(line_tx.clone()),
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(
                spec.name.clone(),
                OutputStream::Stderr,
                stderr,
                Some(line_tx),
            ));
        }

        let (exit_tx, exit) = watch::channel(None);
        let (kill, kill_rx) = oneshot::channel();
        tokio::spawn(reap(spec.name.clone(), child, kill_rx, exit_tx));

        Ok(Self {
            name: spec.name.clone(),
            pid,
            stop_signal,
            lines: Some(lines),
            exit,
            kill: Some(kill),
        })
    }

    #[cfg(unix)]
    fn send_stop_signal(&self) -> E2eResult<()> {
        use nix::errno::Errno;
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.pid else {
            return Ok(());
        };
        let signal = Signal::try_from(self.stop_signal).map_err(|e| E2eError::TeardownFailure {
            name: self.name.clone(),
            reason: format!("signal {}: {}", self.stop_signal, e),
        })?;
        let pid = Pid::from_raw(pid as i32);

        debug!(process = %self.name, pgid = %pid, signal = %signal, "Sending stop signal");
        match killpg(pid, signal) {
            // Group already empty; the reaper publishes the leader's exit
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(E2eError::TeardownFailure {
                name: self.name.clone(),
                reason: format!("sending {}: {}", signal, e),
            }),
        }
    }

    #[cfg(not(unix))]
    fn send_stop_signal(&mut self) -> E2eResult<()> {
        // No signals here; the stop request is the kill request.
        self.force_kill();
        Ok(())
    }

    /// Whether anything is left in the process group. The leader may be
    /// gone while children it started are still running.
    #[cfg(unix)]
    fn group_alive(&self) -> bool {
        use nix::errno::Errno;
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        // Signal "none" only checks whether the group exists
        match self.pid {
            Some(pid) => !matches!(
                killpg(Pid::from_raw(pid as i32), None::<Signal>),
                Err(Errno::ESRCH)
            ),
            None => false,
        }
    }

    #[cfg(not(unix))]
    fn group_alive(&self) -> bool {
        false
    }

    /// Resolves once the process group has no members left
    async fn group_drained(&self) {
        while self.group_alive() {
            sleep(GROUP_POLL).await;
        }
    }

    fn force_kill(&mut self) {
        #[cfg(unix)]
        {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;
            if let Some(pid) = self.pid {
                let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
            }
        }
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
    }
}

#[async_trait]
impl ProcessHandle for ChildProcess {
    fn name(&self) -> &str {
        &self.name
    }

    fn pid(&self) -> Option<u32> {
        self.pid
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
        let mut exit = self.exit.clone();
        async move {
            match exit.wait_for(Option::is_some).await {
                Ok(status) => {
                    let status: Option<ExitInfo> = *status;
                    status.unwrap_or_default()
                }
                // Reaper went away without publishing
                Err(_) => ExitInfo::default(),
            }
        }
        .boxed()
    }

    fn exit_status(&self) -> Option<ExitInfo> {
        *self.exit.borrow()
    }

    async fn stop(&mut self, grace: Duration) -> E2eResult<StopOutcome> {
        let already = self.exit_status();
        if let Some(exit) = already {
            if !self.group_alive() {
                debug!(process = %self.name, status = %exit, "Stop requested for exited process");
                return Ok(StopOutcome::AlreadyStopped);
            }
            info!(process = %self.name, status = %exit, "Process exited but its group did not, stopping the rest");
        } else {
            info!(process = %self.name, pid = ?self.pid, signal = self.stop_signal, "Stopping process");
        }
        self.send_stop_signal()?;

        let deadline = Instant::now() + grace;
        match timeout_at(deadline, self.exited()).await {
            Ok(exit) => {
                if timeout_at(deadline, self.group_drained()).await.is_ok() {
                    info!(process = %self.name, status = %exit, "Process stopped");
                    return Ok(match already {
                        Some(_) => StopOutcome::AlreadyStopped,
                        None => StopOutcome::Exited(exit),
                    });
                }
                warn!(
                    process = %self.name,
                    grace_ms = grace.as_millis() as u64,
                    "Process group outlived the stop signal, sending SIGKILL"
                );
            }
            Err(_) => warn!(
                process = %self.name,
                grace_ms = grace.as_millis() as u64,
                "Process ignored stop signal, sending SIGKILL"
            ),
        }

        self.force_kill();
        if timeout(KILL_WAIT, self.exited()).await.is_err() {
            return Err(E2eError::TeardownFailure {
                name: self.name.clone(),
                reason: format!("still running {:?} after SIGKILL", KILL_WAIT),
            });
        }
        if timeout(KILL_WAIT, self.group_drained()).await.is_err() {
            // Killed members can linger as zombies until their new parent reaps them
            warn!(process = %self.name, "Process group still has members after SIGKILL");
        }
        Ok(StopOutcome::Killed)
    }
}

/// Owns the child: waits for it to exit (or kills it on request or when
/// the handle is dropped) and publishes the exit status.
async fn reap(
    name: String,
    mut child: Child,
    kill: oneshot::Receiver<()>,
    exit: watch::Sender<Option<ExitInfo>>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill => {
            if let Err(e) = child.start_kill() {
                debug!(process = %name, error = %e, "Kill failed");
            }
            child.wait().await
        }
    };

    let info = match status {
        Ok(status) => ExitInfo::from(status),
        Err(e) => {
            warn!(process = %name, error = %e, "Failed to collect exit status");
            ExitInfo::default()
        }
    };
    debug!(process = %name, status = %info, "Process exited");
    let _ = exit.send(Some(info));
}

/// Log each output line under the process name, optionally forwarding it.
/// Invalid UTF-8 is replaced rather than ending the stream, so the pipe is
/// always drained.
pub(crate) async fn forward_lines<R>(
    name: String,
    stream: OutputStream,
    reader: R,
    forward: Option<mpsc::UnboundedSender<String>>,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']);
                match stream {
                    OutputStream::Stdout => info!(process = %name, "{}", line),
                    OutputStream::Stderr => warn!(process = %name, "{}", line),
                }
                if let Some(tx) = &forward {
                    let _ = tx.send(line.to_string());
                }
            }
            Err(e) => {
                debug!(process = %name, stream = ?stream, error = %e, "Output stream error");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_signal_names() {
        assert_eq!(parse_signal("SIGTERM"), Some(15));
        assert_eq!(parse_signal("TERM"), Some(15));
        assert_eq!(parse_signal("term"), Some(15));
        assert_eq!(parse_signal("SIGINT"), Some(2));
        assert_eq!(parse_signal("KILL"), Some(9));
        assert_eq!(parse_signal(" sighup "), Some(1));
    }

    #[test]
    fn test_parse_signal_numbers() {
        assert_eq!(parse_signal("15"), Some(15));
        assert_eq!(parse_signal("9"), Some(9));
        assert_eq!(parse_signal("0"), None);
        assert_eq!(parse_signal("99"), None);
    }

    #[test]
    fn test_parse_signal_unknown() {
        assert_eq!(parse_signal("SIGBOGUS"), None);
        assert_eq!(parse_signal(""), None);
    }

    #[test]
    fn test_exit_info_display() {
        assert_eq!(ExitInfo::code(3).to_string(), "exit code 3");
        assert_eq!(ExitInfo::signalled(15).to_string(), "killed by signal 15");
        assert_eq!(ExitInfo::default().to_string(), "unknown exit status");
        assert!(ExitInfo::code(0).success());
        assert!(!ExitInfo::signalled(9).success());
    }

    #[test]
    fn test_spec_defaults() {
        let spec = ProcessSpec::new(
            "server",
            "npm",
            Readiness::OutputContains { pattern: "up".into() },
        )
        .with_args(["start"]);
        assert_eq!(spec.stop_signal, "SIGTERM");
        assert_eq!(spec.args, vec!["start".to_string()]);
        if cfg!(windows) {
            assert_eq!(spec.program(), "npm.cmd");
        } else {
            assert_eq!(spec.program(), "npm");
        }
    }
}

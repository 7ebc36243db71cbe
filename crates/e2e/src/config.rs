//! Rig configuration
//!
//! Loaded from `webrig.toml`; a missing file yields the defaults, which
//! describe the classic setup: `npm start` serving on port 8080, PhantomJS
//! GhostDriver on 4444, protractor as the test runner.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{E2eError, E2eResult};
use crate::process::{parse_signal, ProcessSpec};
use crate::readiness::Readiness;
use crate::suite::SuiteContext;

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where `test-results.json` is written
    pub output_dir: PathBuf,

    /// The web server the suite tests against; started first
    pub server: ProcessSpec,

    /// The browser-automation driver; started once the server is ready
    pub driver: ProcessSpec,

    /// The test runner
    pub suite: SuiteConfig,

    pub timeouts: Timeouts,

    pub watch: WatchConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("test-results"),
            server: ProcessSpec::new(
                "test-server",
                "npm",
                Readiness::reachable("http://localhost:8080/"),
            )
            .with_args(["start"])
            .with_stop_signal("SIGTERM"),
            driver: ProcessSpec::new(
                "ghostdriver",
                "phantomjs",
                Readiness::output("GhostDriver - Main - running on port 4444"),
            )
            .with_args(["--webdriver=4444", "--ignore-ssl-errors=true"]),
            suite: SuiteConfig::default(),
            timeouts: Timeouts::default(),
            watch: WatchConfig::default(),
        }
    }
}

/// Test runner configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuiteConfig {
    pub name: String,
    pub command: String,
    /// May contain `{base_url}` and `{driver_url}`
    pub args: Vec<String>,
    pub base_url: String,
    pub driver_url: String,
    pub env: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            name: "protractor".to_string(),
            command: "protractor".to_string(),
            args: vec![
                "protractor.config.js".to_string(),
                "--seleniumAddress".to_string(),
                "{driver_url}".to_string(),
                "--baseUrl".to_string(),
                "{base_url}".to_string(),
            ],
            base_url: "http://localhost:8080/".to_string(),
            driver_url: "http://localhost:4444/wd/hub".to_string(),
            env: BTreeMap::new(),
            cwd: None,
        }
    }
}

impl SuiteConfig {
    pub fn context(&self) -> SuiteContext {
        SuiteContext {
            base_url: self.base_url.clone(),
            driver_url: self.driver_url.clone(),
        }
    }
}

/// Time limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Per-process limit on waiting for readiness
    pub readiness_secs: u64,
    /// Time between the stop signal and SIGKILL
    pub stop_grace_ms: u64,
    /// Delay between HTTP readiness probes
    pub poll_interval_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            readiness_secs: 60,
            stop_grace_ms: 5000,
            poll_interval_ms: 250,
        }
    }
}

impl Timeouts {
    pub fn readiness(&self) -> Duration {
        Duration::from_secs(self.readiness_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Watch mode configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Files or directories whose changes rerun the suite
    pub paths: Vec<PathBuf>,
    /// Quiet period that ends a batch of changes
    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            paths: vec![PathBuf::from("dist")],
            debounce_ms: 200,
        }
    }
}

impl WatchConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if absent
    pub fn load(path: &Path) -> E2eResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Self::from_toml(&content)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_toml(content: &str) -> E2eResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> E2eResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| E2eError::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check everything that would otherwise only fail mid-run
    pub fn validate(&self) -> E2eResult<()> {
        validate_process(&self.server)?;
        validate_process(&self.driver)?;
        if self.server.name == self.driver.name {
            return Err(E2eError::Config(format!(
                "server and driver share the name '{}'",
                self.server.name
            )));
        }

        if self.suite.command.trim().is_empty() {
            return Err(E2eError::Config("suite command is empty".to_string()));
        }
        if self.timeouts.readiness_secs == 0 {
            return Err(E2eError::Config("timeouts.readiness_secs must be positive".to_string()));
        }
        if self.timeouts.stop_grace_ms == 0 {
            return Err(E2eError::Config("timeouts.stop_grace_ms must be positive".to_string()));
        }
        if self.timeouts.poll_interval_ms == 0 {
            return Err(E2eError::Config("timeouts.poll_interval_ms must be positive".to_string()));
        }
        if self.watch.debounce_ms == 0 {
            return Err(E2eError::Config("watch.debounce_ms must be positive".to_string()));
        }
        Ok(())
    }
}

fn validate_process(spec: &ProcessSpec) -> E2eResult<()> {
    if spec.name.trim().is_empty() {
        return Err(E2eError::Config("process name is empty".to_string()));
    }
    if spec.command.trim().is_empty() {
        return Err(E2eError::Config(format!("{}: command is empty", spec.name)));
    }
    if parse_signal(&spec.stop_signal).is_none() {
        return Err(E2eError::Config(format!(
            "{}: unknown stop signal '{}'",
            spec.name, spec.stop_signal
        )));
    }
    match &spec.readiness {
        Readiness::OutputContains { pattern } if pattern.is_empty() => Err(E2eError::Config(
            format!("{}: readiness pattern is empty", spec.name),
        )),
        Readiness::HttpPoll { url, .. }
            if !(url.starts_with("http://") || url.starts_with("https://")) =>
        {
            Err(E2eError::Config(format!(
                "{}: readiness url '{}' is not http(s)",
                spec.name, url
            )))
        }
        _ => Ok(()),
    }
}

//! `webrig test` and `webrig watch`

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::Args;
use tracing::{info, warn};

use webrig_e2e::{
    write_report, ChangeStream, CommandSuite, Config, Interrupt, Lifecycle, RunOutcome,
    SuiteReport,
};

use crate::output;

/// Exit status when the suite ran and failed
const SUITE_FAILED: u8 = 1;

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Seconds to wait for each process to become ready
    #[arg(long, value_name = "SECS")]
    pub readiness_timeout: Option<u64>,

    /// Milliseconds between the stop signal and SIGKILL
    #[arg(long, value_name = "MS")]
    pub stop_grace: Option<u64>,

    /// Directory for test-results.json
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl RunArgs {
    /// Override file values with the flags that were given
    pub fn apply(&self, config: &mut Config) {
        if let Some(secs) = self.readiness_timeout {
            config.timeouts.readiness_secs = secs;
        }
        if let Some(ms) = self.stop_grace {
            config.timeouts.stop_grace_ms = ms;
        }
        if let Some(dir) = &self.output {
            config.output_dir = dir.clone();
        }
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct WatchArgs {
    #[command(flatten)]
    pub run: RunArgs,

    /// Path to watch; repeatable, replaces `[watch] paths`
    #[arg(long = "path", value_name = "PATH")]
    pub paths: Vec<PathBuf>,
}

/// Load, override and validate
pub fn load_config(path: &Path, args: &RunArgs) -> anyhow::Result<Config> {
    let mut config = Config::load(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

pub async fn test(config_path: &Path, args: &RunArgs) -> anyhow::Result<ExitCode> {
    let config = load_config(config_path, args)?;
    let mut lifecycle = Lifecycle::from_config(&config)?;
    let suite = CommandSuite::from_config(&config.suite);
    let interrupt = Interrupt::from_os_signals();

    let outcome = lifecycle
        .run(&suite, &interrupt)
        .await
        .context("Test setup failed")?;

    Ok(match outcome {
        RunOutcome::Interrupted => interrupted(),
        RunOutcome::Completed(report) => {
            record(&config.output_dir, &report);
            exit_code(&report)
        }
    })
}

pub async fn watch(config_path: &Path, args: &WatchArgs) -> anyhow::Result<ExitCode> {
    let mut config = load_config(config_path, &args.run)?;
    if !args.paths.is_empty() {
        config.watch.paths = args.paths.clone();
    }

    let mut changes = ChangeStream::watch(&config.watch.paths, config.watch.debounce())
        .context("Failed to watch for changes")?;
    let mut lifecycle = Lifecycle::from_config(&config)?;
    let suite = CommandSuite::from_config(&config.suite);
    let interrupt = Interrupt::from_os_signals();

    info!("Watch mode: press Ctrl+C to stop");
    let output_dir = config.output_dir.clone();
    let outcome = lifecycle
        .watch(&suite, &mut changes, &interrupt, |report| record(&output_dir, report))
        .await
        .context("Test setup failed")?;

    Ok(match outcome {
        RunOutcome::Interrupted => interrupted(),
        RunOutcome::Completed(report) => exit_code(&report),
    })
}

fn record(output_dir: &Path, report: &SuiteReport) {
    output::print_report(report);
    if let Err(e) = write_report(output_dir, report) {
        warn!(error = %e, "Failed to write test results");
    }
}

fn interrupted() -> ExitCode {
    output::print_warning("Interrupted: server and driver stopped");
    ExitCode::SUCCESS
}

fn exit_code(report: &SuiteReport) -> ExitCode {
    if report.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(SUITE_FAILED)
    }
}

//! `webrig check-config` and `webrig init`

use std::path::Path;
use std::process::ExitCode;

use anyhow::Context;
use clap::Args;

use webrig_e2e::Config;

use crate::output;

#[derive(Args, Debug, Default)]
pub struct InitArgs {
    /// Overwrite an existing file
    #[arg(long)]
    pub force: bool,
}

pub fn check(path: &Path) -> anyhow::Result<ExitCode> {
    if !path.exists() {
        output::print_info(&format!("{} not found, checking built-in defaults", path.display()));
    }
    let config = Config::load(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    config.validate().context("Invalid configuration")?;

    output::print_config(&config);
    output::print_success("Configuration is valid");
    Ok(ExitCode::SUCCESS)
}

pub fn init(path: &Path, args: &InitArgs) -> anyhow::Result<ExitCode> {
    if path.exists() && !args.force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    Config::default()
        .save(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    output::print_success(&format!("Wrote default configuration to {}", path.display()));
    Ok(ExitCode::SUCCESS)
}

//! webrig CLI - Main Entry Point

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use webrig_cli::commands::{config, run, serve};
use webrig_cli::output;

/// Exit status when setup or configuration fails
const SETUP_FAILED: u8 = 2;

/// webrig - run browser tests against a supervised server and driver
#[derive(Parser)]
#[command(name = "webrig")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = "webrig.toml", env = "WEBRIG_CONFIG", global = true)]
    config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start server and driver, run the suite once, then stop both
    Test(run::RunArgs),

    /// Like `test`, but rerun the suite whenever watched files change
    Watch(run::WatchArgs),

    /// Serve a built site directory
    Serve(serve::ServeArgs),

    /// Validate the configuration file
    CheckConfig,

    /// Write the default configuration file
    Init(config::InitArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    let result = match cli.command {
        Commands::Test(args) => run::test(&cli.config, &args).await,
        Commands::Watch(args) => run::watch(&cli.config, &args).await,
        Commands::Serve(args) => serve::execute(args).await,
        Commands::CheckConfig => config::check(&cli.config),
        Commands::Init(args) => config::init(&cli.config, &args),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            output::print_error(&format!("{:#}", e));
            ExitCode::from(SETUP_FAILED)
        }
    }
}

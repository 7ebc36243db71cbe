//! `webrig serve`: static site server, usable as the managed test server

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;
use tracing::{info, warn};

use webrig_web::{WebServer, WebServerConfig};

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Directory to serve
    #[arg(long, default_value = "dist")]
    pub root: PathBuf,

    /// Port to listen on
    #[arg(short, long, default_value = "8080")]
    pub port: u16,

    /// Address to bind
    #[arg(long, default_value = "127.0.0.1")]
    pub host: IpAddr,

    /// Leading path segment served from the root; repeatable
    #[arg(long, value_name = "PREFIX", default_values = ["main", "sample"])]
    pub rewrite: Vec<String>,
}

pub async fn execute(args: ServeArgs) -> anyhow::Result<ExitCode> {
    if !args.root.is_dir() {
        anyhow::bail!("{} is not a directory", args.root.display());
    }

    let server = WebServer::new(WebServerConfig {
        root: args.root,
        addr: SocketAddr::new(args.host, args.port),
        rewrite_prefixes: args.rewrite,
    });
    server.serve_with_shutdown(shutdown_signal()).await?;
    Ok(ExitCode::SUCCESS)
}

/// Ctrl+C, or SIGTERM from a supervising `webrig test`
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown signal received");
}

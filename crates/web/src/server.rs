//! Static site server

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{middleware, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::rewrite::rewrite_middleware;

/// Liveness endpoint; never shadowed by a site file
pub const HEALTH_PATH: &str = "/__webrig/health";

#[derive(Debug, Clone)]
pub struct WebServerConfig {
    /// Directory served at `/`
    pub root: PathBuf,
    pub addr: SocketAddr,
    /// Leading path segments stripped before file lookup
    pub rewrite_prefixes: Vec<String>,
}

impl Default for WebServerConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("dist"),
            addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            rewrite_prefixes: vec!["main".to_string(), "sample".to_string()],
        }
    }
}

pub struct WebServer {
    config: WebServerConfig,
}

impl WebServer {
    pub fn new(config: WebServerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WebServerConfig {
        &self.config
    }

    /// Create router
    pub fn router(&self) -> Router {
        let prefixes = Arc::new(self.config.rewrite_prefixes.clone());

        Router::new()
            .route(HEALTH_PATH, get(health_handler))
            .fallback_service(ServeDir::new(&self.config.root))
            // Applies to the fallback, so file lookup sees the rewritten path
            .layer(middleware::from_fn_with_state(prefixes, rewrite_middleware))
            .layer(TraceLayer::new_for_http())
    }

    /// Serve until `shutdown` resolves, then finish in-flight requests
    pub async fn serve_with_shutdown<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = tokio::net::TcpListener::bind(self.config.addr).await?;
        info!(
            "Serving {} on http://{}",
            self.config.root.display(),
            listener.local_addr()?
        );

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Web server stopped");
        Ok(())
    }
}

impl Default for WebServer {
    fn default() -> Self {
        Self::new(WebServerConfig::default())
    }
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

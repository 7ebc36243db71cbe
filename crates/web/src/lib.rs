//! webrig static site server
//!
//! Serves a built site directory (default `dist`) so it can act as the
//! test server of an end-to-end run. Requests under `/main` and `/sample`
//! are served from the site root.

pub mod rewrite;
pub mod server;

pub use rewrite::{rewrite_path, rewrite_uri};
pub use server::{WebServer, WebServerConfig, HEALTH_PATH};

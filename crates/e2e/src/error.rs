//! Error types for the test-process lifecycle

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Failed to launch {name} ({command}): {source}")]
    LaunchFailure {
        name: String,
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{name} exited before becoming ready ({status})")]
    PrematureExit { name: String, status: String },

    #[error("{name} not ready after {waited:?}")]
    ReadinessTimeout { name: String, waited: Duration },

    #[error("Failed to stop {name}: {reason}")]
    TeardownFailure { name: String, reason: String },

    #[error("Cannot {op} while {from}")]
    InvalidState { from: String, op: &'static str },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),
}

pub type E2eResult<T> = Result<T, E2eError>;

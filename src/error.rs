use std::time::Duration;

use thiserror::Error;

/// Terminal failure of a single remote-shell session.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error("SSH authentication failed for {username}@{host}: {message}")]
    Auth {
        host: String,
        username: String,
        message: String,
    },

    #[error("network error: {0}")]
    Network(String),

    #[error("command timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("command cancelled")]
    Cancelled,

    #[error("command exited with status {exit_code}")]
    Remote { exit_code: i32 },
}

impl SessionError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SessionError::Cancelled)
    }
}

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("failed to package benchmarks from {path}: {message}")]
    Packaging { path: String, message: String },

    #[error("failed to transfer benchmarks: {0}")]
    Transfer(#[source] SessionError),
}

impl DeployError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DeployError::Transfer(err) if err.is_cancelled())
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("run {0} is already active")]
    DuplicateRun(String),

    #[error("run {0} has no machines to run on")]
    NoMachines(String),
}

pub fn internal_error(err: impl std::fmt::Display) -> (axum::http::StatusCode, String) {
    tracing::error!(error = %err, "internal error");
    (
        axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        "Internal server error".to_string(),
    )
}

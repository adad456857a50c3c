//! Error taxonomy for the execution bridge.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("no Python interpreter found (tried: {tried})")]
    InterpreterNotFound { tried: String },

    #[error("pip is not available for {interpreter}: {detail}")]
    PackageManagerUnavailable { interpreter: String, detail: String },

    #[error("invalid package name: {requested:?}")]
    InvalidName { requested: String },

    #[error("failed to spawn {command}: {source}")]
    SpawnFailure {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("process exited with code {code:?}")]
    NonZeroExit {
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),
}

impl BridgeError {
    /// Stable machine-readable discriminant carried on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InterpreterNotFound { .. } => "interpreter-not-found",
            Self::PackageManagerUnavailable { .. } => "package-manager-unavailable",
            Self::InvalidName { .. } => "invalid-name",
            Self::SpawnFailure { .. } => "spawn-failure",
            Self::NonZeroExit { .. } => "non-zero-exit",
            Self::Rejected(_) => "rejected",
            Self::Io(_) => "io",
            Self::Json(_) => "malformed",
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::InterpreterNotFound { .. } => {
                "Python is not installed or not on PATH. Install Python 3 and restart Robot Studio."
                    .to_string()
            }
            Self::PackageManagerUnavailable { interpreter, .. } => format!(
                "pip is not available for {}. Repair it with `{} -m ensurepip --upgrade`.",
                interpreter, interpreter
            ),
            Self::InvalidName { .. } => {
                "Package name is empty or starts with '-' after removing invalid characters."
                    .to_string()
            }
            Self::SpawnFailure { command, source } => format!("Could not start {}: {}", command, source),
            Self::NonZeroExit { stdout, stderr, .. } => {
                if stderr.trim().is_empty() {
                    stdout.clone()
                } else {
                    stderr.clone()
                }
            }
            Self::Rejected(msg) => msg.clone(),
            Self::Io(e) => e.to_string(),
            Self::Json(e) => format!("Invalid message format: {}", e),
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

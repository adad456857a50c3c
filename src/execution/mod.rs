//! Execution engine: request, event, and result types.

use serde::{Deserialize, Serialize};

use crate::process::RequestId;

pub mod script;

/// What a request asks the interpreter to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Source text, materialized as a temporary script file.
    Script(String),
    /// Sanitized package name for install or import checks.
    Package(String),
}

#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub id: RequestId,
    pub payload: Payload,
}

impl ExecutionRequest {
    pub fn script(source: impl Into<String>) -> Self {
        Self { id: RequestId::generate(), payload: Payload::Script(source.into()) }
    }

    pub fn package(name: impl Into<String>) -> Self {
        Self { id: RequestId::generate(), payload: Payload::Package(name.into()) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// One incremental chunk of process output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputEvent {
    #[serde(rename = "type")]
    pub stream: OutputStream,
    pub data: String,
}

/// Terminal result of an execution. `exit_code` is `None` when the process was killed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionEvent {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub error: String,
}

/// Per-request lifecycle. `Completed` and `Errored` are final.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Running,
    Completed { exit_code: Option<i32> },
    Errored { cause: String },
}

/// Everything a supervised run produced, handed back to in-process callers.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub id: RequestId,
    pub state: RunState,
    pub stdout: String,
    pub stderr: String,
}

impl RunResult {
    pub fn exit_code(&self) -> Option<i32> {
        match self.state {
            RunState::Completed { exit_code } => exit_code,
            _ => None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code() == Some(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOutcome {
    pub package: String,
    pub message: String,
    pub stdout: String,
    pub stderr: String,
}

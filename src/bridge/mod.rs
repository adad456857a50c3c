//! Request bridge: the allow-listed operations the UI may invoke.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, PoisonError},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    error::{BridgeError, Result},
    process::python::ProcessRunner,
    relay::EventChannel,
    utils::host_platform,
};

pub mod server;

/// Every operation the UI can invoke. Unknown `op` values fail to deserialize.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum BridgeRequest {
    CheckVersion,
    Execute { code: String },
    InstallPackage { name: String },
    CheckPackage { name: String },
    GetPlatform,
    GetVersion,
    Subscribe { channel: EventChannel },
    Unsubscribe { channel: EventChannel },
}

/// Parse one request line into its correlation id and typed request.
pub fn parse_request(line: &str) -> (Option<u64>, Result<BridgeRequest>) {
    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => return (None, Err(e.into())),
    };
    let id = value.get("id").and_then(serde_json::Value::as_u64);
    let request = serde_json::from_value(value).map_err(|e| BridgeError::Rejected(e.to_string()));
    (id, request)
}

/// Result payload for any operation; absent fields are omitted on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
}

impl Response {
    pub fn ok() -> Self {
        Self { success: true, ..Self::default() }
    }

    pub fn failure(err: &BridgeError) -> Self {
        let mut resp = Self {
            success: false,
            error: Some(err.user_message()),
            error_kind: Some(err.kind()),
            ..Self::default()
        };
        if let BridgeError::NonZeroExit { stdout, stderr, .. } = err {
            resp.stdout = Some(stdout.clone());
            resp.stderr = Some(stderr.clone());
        }
        resp
    }
}

/// Dispatches requests to one [`ProcessRunner`] and tracks channel subscriptions.
#[derive(Debug)]
pub struct Bridge {
    runner: Arc<ProcessRunner>,
    app_version: String,
    subscriptions: Mutex<HashSet<EventChannel>>,
}

impl Bridge {
    pub fn new(runner: Arc<ProcessRunner>) -> Self {
        Self {
            runner,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            subscriptions: Mutex::new(HashSet::new()),
        }
    }

    pub fn runner(&self) -> &ProcessRunner {
        &self.runner
    }

    pub fn subscribe_all(&self) {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(EventChannel::ALL);
    }

    pub fn is_subscribed(&self, channel: EventChannel) -> bool {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&channel)
    }

    /// Run one request to completion. Never fails: errors become failure responses.
    pub async fn dispatch(&self, request: BridgeRequest) -> Response {
        debug!(?request, "dispatch");
        match request {
            BridgeRequest::CheckVersion => match self.runner.version().await {
                Ok((command, version)) => Response {
                    version: Some(version),
                    command: Some(command),
                    ..Response::ok()
                },
                Err(e) => Response::failure(&e),
            },
            BridgeRequest::Execute { code } => match self.runner.execute(&code).await {
                // The handle is dropped; the run continues and reports through events.
                Ok(handle) => Response {
                    process_id: Some(handle.id.to_string()),
                    ..Response::ok()
                },
                Err(e) => Response::failure(&e),
            },
            BridgeRequest::InstallPackage { name } => match self.runner.install_package(&name).await {
                Ok(outcome) => Response {
                    message: Some(outcome.message),
                    stdout: Some(outcome.stdout),
                    stderr: Some(outcome.stderr),
                    ..Response::ok()
                },
                Err(e) => Response::failure(&e),
            },
            BridgeRequest::CheckPackage { name } => match self.runner.check_package(&name).await {
                Ok(installed) => Response { installed: Some(installed), ..Response::ok() },
                Err(e) => Response { installed: Some(false), ..Response::failure(&e) },
            },
            BridgeRequest::GetPlatform => Response {
                platform: Some(host_platform().to_string()),
                ..Response::ok()
            },
            BridgeRequest::GetVersion => Response {
                version: Some(self.app_version.clone()),
                ..Response::ok()
            },
            BridgeRequest::Subscribe { channel } => {
                info!(channel = channel.name(), "subscribed");
                self.subscriptions
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(channel);
                Response::ok()
            }
            BridgeRequest::Unsubscribe { channel } => {
                self.subscriptions
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&channel);
                Response::ok()
            }
        }
    }
}

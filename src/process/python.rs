//! Python process runner: script execution, pip installs, import checks.

use std::{ffi::OsString, process::Stdio, sync::Arc, time::Duration};

use tokio::{process::Command, sync::watch, task::JoinHandle, time::timeout};
use tracing::{info, warn};

use super::{locator, ProcessRegistry, Refusal, RequestId, Supervision};
use crate::{
    config::Settings,
    error::{BridgeError, Result},
    execution::{script::TempScript, CompletionEvent, ExecutionRequest, InstallOutcome, OutputStream, Payload, RunResult, RunState},
    relay::{forward_stream, EventChannel, OutputRelay},
    utils::sanitize_package_name,
};

const KILL_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunKind {
    Execute,
    Install,
}

impl RunKind {
    fn output_channel(self) -> EventChannel {
        match self {
            Self::Execute => EventChannel::ExecutionOutput,
            Self::Install => EventChannel::InstallOutput,
        }
    }
}

/// A supervised run in flight.
#[derive(Debug)]
pub struct RunHandle {
    pub id: RequestId,
    state: watch::Receiver<RunState>,
    task: JoinHandle<RunResult>,
}

impl RunHandle {
    pub fn state(&self) -> RunState {
        self.state.borrow().clone()
    }

    /// Resolves after the terminal event was emitted and the entry deregistered.
    pub async fn wait(self) -> RunResult {
        let id = self.id.clone();
        match self.task.await {
            Ok(result) => result,
            Err(e) => RunResult {
                id,
                state: RunState::Errored { cause: e.to_string() },
                stdout: String::new(),
                stderr: String::new(),
            },
        }
    }
}

/// Owns the registry of running interpreters and the relay their output goes to.
#[derive(Debug)]
pub struct ProcessRunner {
    settings: Settings,
    registry: Arc<ProcessRegistry>,
    relay: OutputRelay,
}

impl ProcessRunner {
    pub fn new(settings: Settings, relay: OutputRelay) -> Self {
        Self { settings, registry: Arc::new(ProcessRegistry::new()), relay }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    pub async fn locate(&self) -> Option<String> {
        locator::locate(&self.settings.candidates, self.settings.probe_timeout).await
    }

    /// Like [`locate`](Self::locate), but absence is an error.
    pub async fn interpreter(&self) -> Result<String> {
        self.locate().await.ok_or_else(|| BridgeError::InterpreterNotFound {
            tried: self.settings.candidates.join(", "),
        })
    }

    /// Resolve the interpreter and report `(command, version text)`.
    pub async fn version(&self) -> Result<(String, String)> {
        let interpreter = self.interpreter().await?;
        let output = self.capture(&interpreter, &["--version"]).await?;
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        // Python 2 prints its version on stderr.
        let text = if stdout.is_empty() {
            String::from_utf8_lossy(&output.stderr).trim().to_string()
        } else {
            stdout
        };
        Ok((interpreter, text))
    }

    /// Locate the interpreter and run `source` as a script.
    pub async fn execute(&self, source: &str) -> Result<RunHandle> {
        let interpreter = self.interpreter().await?;
        self.run(&interpreter, ExecutionRequest::script(source)).await
    }

    /// Start one interpreter invocation for `request`.
    ///
    /// Scripts stream on `execution-output` and finish with exactly one
    /// `execution-complete` or `execution-error`. Package requests run
    /// `-m pip install` and stream on `install-output`; their result is returned
    /// through the handle only.
    pub async fn run(&self, interpreter: &str, request: ExecutionRequest) -> Result<RunHandle> {
        let ExecutionRequest { id, payload } = request;
        match payload {
            Payload::Script(source) => {
                let script = TempScript::create(&self.settings.temp_dir, &source)?;
                let args = vec![script.path().as_os_str().to_os_string()];
                self.spawn_supervised(id, interpreter, args, RunKind::Execute, Some(script))
            }
            Payload::Package(name) => {
                let args = ["-m", "pip", "install", name.as_str()]
                    .into_iter()
                    .map(OsString::from)
                    .collect();
                self.spawn_supervised(id, interpreter, args, RunKind::Install, None)
            }
        }
    }

    /// `import <name>` probe; exit zero means installed.
    ///
    /// The child is registered like any other run, so a shutdown sweep kills an
    /// import that hangs.
    pub async fn check_package(&self, name: &str) -> Result<bool> {
        let package = sanitized(name)?;
        let interpreter = self.interpreter().await?;
        if self.registry.is_closed() {
            return Err(shutting_down());
        }
        let mut child = Command::new(&interpreter)
            .arg("-c")
            .arg(format!("import {}", package))
            .current_dir(&self.settings.temp_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| BridgeError::SpawnFailure { command: interpreter.clone(), source })?;

        let id = RequestId::generate();
        let Supervision { mut kill_rx, exited_tx } = self
            .registry
            .register(id.clone(), child.id(), &interpreter)
            .map_err(|refusal| refused(&id, refusal))?;
        let status = tokio::select! {
            status = child.wait() => status,
            _ = &mut kill_rx => {
                info!(request = %id, "force-killing package check");
                if let Err(e) = child.kill().await {
                    warn!(request = %id, error = %e, "kill failed");
                }
                child.wait().await
            }
        };
        self.registry.unregister(&id);
        let _ = exited_tx.send(());

        let installed = status?.success();
        info!(package = %package, installed, "package check");
        Ok(installed)
    }

    /// Install through `<interpreter> -m pip` so the target matches the located interpreter.
    pub async fn install_package(&self, name: &str) -> Result<InstallOutcome> {
        let package = sanitized(name)?;
        let interpreter = self.interpreter().await?;
        self.ensure_pip(&interpreter).await?;

        info!(package = %package, interpreter = %interpreter, "installing package");
        let handle = self.run(&interpreter, ExecutionRequest::package(package.clone())).await?;
        let result = handle.wait().await;

        match result.state {
            RunState::Completed { exit_code: Some(0) } => Ok(InstallOutcome {
                message: format!("Successfully installed {}", package),
                package,
                stdout: result.stdout,
                stderr: result.stderr,
            }),
            RunState::Completed { exit_code } => Err(BridgeError::NonZeroExit {
                code: exit_code,
                stdout: result.stdout,
                stderr: result.stderr,
            }),
            RunState::Errored { cause } => Err(BridgeError::Io(std::io::Error::other(cause))),
            RunState::Pending | RunState::Running => Err(BridgeError::Io(std::io::Error::other(
                "install finished without a terminal state",
            ))),
        }
    }

    /// Force-kill everything still registered and refuse any process started later.
    pub async fn shutdown(&self) -> usize {
        self.registry.kill_all().await
    }

    async fn ensure_pip(&self, interpreter: &str) -> Result<()> {
        let unavailable = |detail: String| BridgeError::PackageManagerUnavailable {
            interpreter: interpreter.to_string(),
            detail,
        };
        match self.capture(interpreter, &["-m", "pip", "--version"]).await {
            Ok(out) if out.status.success() => Ok(()),
            Ok(out) => {
                let detail = String::from_utf8_lossy(&out.stderr).trim().to_string();
                Err(unavailable(if detail.is_empty() {
                    format!("pip probe exited with {}", out.status)
                } else {
                    detail
                }))
            }
            Err(e) => Err(unavailable(e.to_string())),
        }
    }

    async fn capture(&self, program: &str, args: &[&str]) -> Result<std::process::Output> {
        let mut cmd = Command::new(program);
        cmd.args(args).stdin(Stdio::null()).kill_on_drop(true);
        match timeout(self.settings.probe_timeout, cmd.output()).await {
            Ok(Ok(out)) => Ok(out),
            Ok(Err(source)) => Err(BridgeError::SpawnFailure { command: program.to_string(), source }),
            Err(_) => Err(BridgeError::SpawnFailure {
                command: program.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::TimedOut, "probe timed out"),
            }),
        }
    }

    fn spawn_supervised(
        &self,
        id: RequestId,
        interpreter: &str,
        args: Vec<OsString>,
        kind: RunKind,
        script: Option<TempScript>,
    ) -> Result<RunHandle> {
        let (state_tx, state_rx) = watch::channel(RunState::Pending);

        if self.registry.is_closed() {
            warn!(request = %id, "refusing to start a process during shutdown");
            drop(script);
            if kind == RunKind::Execute {
                self.relay.error(&id, "bridge is shutting down");
            }
            return Err(shutting_down());
        }

        let mut cmd = Command::new(interpreter);
        cmd.args(&args)
            .current_dir(&self.settings.temp_dir)
            .env("PYTHONUNBUFFERED", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                warn!(request = %id, interpreter, error = %source, "spawn failed");
                drop(script);
                if kind == RunKind::Execute {
                    self.relay.error(&id, format!("failed to start {}: {}", interpreter, source));
                }
                return Err(BridgeError::SpawnFailure { command: interpreter.to_string(), source });
            }
        };

        let Supervision { mut kill_rx, exited_tx } = match self.registry.register(id.clone(), child.id(), interpreter) {
            Ok(supervision) => supervision,
            // Dropping the child kills it (kill_on_drop); the script goes with it.
            Err(refusal) => {
                if refusal == Refusal::Closed && kind == RunKind::Execute {
                    self.relay.error(&id, "bridge is shutting down");
                }
                return Err(refused(&id, refusal));
            }
        };
        let _ = state_tx.send(RunState::Running);
        info!(request = %id, interpreter, script = ?script.as_ref().map(TempScript::path), "process started");

        let channel = kind.output_channel();
        let stdout_task = child.stdout.take().map(|out| {
            tokio::spawn(forward_stream(out, OutputStream::Stdout, channel, id.clone(), self.relay.clone()))
        });
        let stderr_task = child.stderr.take().map(|err| {
            tokio::spawn(forward_stream(err, OutputStream::Stderr, channel, id.clone(), self.relay.clone()))
        });

        let relay = self.relay.clone();
        let registry = Arc::clone(&self.registry);
        let task_id = id.clone();
        let task = tokio::spawn(async move {
            let id = task_id;
            let mut killed = false;
            let status = tokio::select! {
                status = child.wait() => status,
                _ = &mut kill_rx => {
                    info!(request = %id, "force-killing process");
                    killed = true;
                    if let Err(e) = child.kill().await {
                        warn!(request = %id, error = %e, "kill failed");
                    }
                    child.wait().await
                }
            };

            // A killed script's own children can keep the pipes open; don't wait on them.
            let grace = killed.then_some(KILL_GRACE);
            let stdout = join_output(stdout_task, grace).await;
            let stderr = join_output(stderr_task, grace).await;

            if let Some(script) = script {
                script.remove();
            }

            let state = match status {
                Ok(status) => RunState::Completed { exit_code: status.code() },
                Err(e) => RunState::Errored { cause: e.to_string() },
            };
            info!(request = %id, state = ?state, "process finished");

            if kind == RunKind::Execute {
                match &state {
                    RunState::Completed { exit_code } => relay.complete(
                        &id,
                        CompletionEvent { exit_code: *exit_code, stdout: stdout.clone(), stderr: stderr.clone() },
                    ),
                    RunState::Errored { cause } => relay.error(&id, cause.clone()),
                    RunState::Pending | RunState::Running => {}
                }
            }

            registry.unregister(&id);
            let _ = state_tx.send(state.clone());
            let _ = exited_tx.send(());
            RunResult { id, state, stdout, stderr }
        });

        Ok(RunHandle { id, state: state_rx, task })
    }
}

/// Sanitize, then refuse what pip would not read as a package name.
fn sanitized(name: &str) -> Result<String> {
    let clean = sanitize_package_name(name);
    // A leading `-` would reach pip as an option (`-r<file>`, `-e.`).
    if clean.is_empty() || clean.starts_with('-') {
        return Err(BridgeError::InvalidName { requested: name.to_string() });
    }
    Ok(clean)
}

fn refused(id: &RequestId, refusal: Refusal) -> BridgeError {
    match refusal {
        Refusal::Duplicate => BridgeError::Rejected(format!("request id {} already running", id)),
        Refusal::Closed => shutting_down(),
    }
}

fn shutting_down() -> BridgeError {
    BridgeError::Rejected("bridge is shutting down".to_string())
}

async fn join_output(task: Option<JoinHandle<String>>, grace: Option<Duration>) -> String {
    let Some(mut task) = task else {
        return String::new();
    };
    let joined = match grace {
        Some(grace) => match timeout(grace, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!("output pipe still open after kill; abandoning reader");
                task.abort();
                return String::new();
            }
        },
        None => task.await,
    };
    joined.unwrap_or_else(|e| {
        warn!(error = %e, "output reader task failed");
        String::new()
    })
}

//! Interpreter process management: request ids and the registry of live children.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, info};

pub mod locator;
pub mod python;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Correlates a spawned process with the events it produces.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn generate() -> Self {
        let seq = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        Self(format!("proc_{}_{}", Utc::now().timestamp_millis(), seq))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Registry entry for one live child.
#[derive(Debug)]
pub struct RunningProcess {
    pub pid: Option<u32>,
    pub command: String,
    pub started_at: DateTime<Utc>,
    kill_tx: oneshot::Sender<()>,
    exited_rx: oneshot::Receiver<()>,
}

/// Supervisor side of a registry entry.
#[derive(Debug)]
pub(crate) struct Supervision {
    pub kill_rx: oneshot::Receiver<()>,
    pub exited_tx: oneshot::Sender<()>,
}

/// Why a registration was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Refusal {
    Duplicate,
    Closed,
}

#[derive(Debug, Default)]
struct Active {
    entries: HashMap<RequestId, RunningProcess>,
    closed: bool,
}

/// Request id → live process. Owned by one runner; shared only through it.
///
/// Once [`kill_all`](Self::kill_all) runs the registry is closed and refuses
/// every later registration.
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    active: Mutex<Active>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Active> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a new entry and hand back the supervisor's half of its channels.
    ///
    /// Refused when the id is already registered or the registry is closed.
    pub(crate) fn register(
        &self,
        id: RequestId,
        pid: Option<u32>,
        command: &str,
    ) -> std::result::Result<Supervision, Refusal> {
        let (kill_tx, kill_rx) = oneshot::channel();
        let (exited_tx, exited_rx) = oneshot::channel();
        let mut active = self.lock();
        if active.closed {
            return Err(Refusal::Closed);
        }
        if active.entries.contains_key(&id) {
            return Err(Refusal::Duplicate);
        }
        info!(request = %id, ?pid, command, "registering process");
        active.entries.insert(
            id,
            RunningProcess {
                pid,
                command: command.to_string(),
                started_at: Utc::now(),
                kill_tx,
                exited_rx,
            },
        );
        Ok(Supervision { kill_rx, exited_tx })
    }

    /// Remove an entry. A no-op when the shutdown sweep already took it.
    pub fn unregister(&self, id: &RequestId) -> bool {
        let removed = self.lock().entries.remove(id).is_some();
        if removed {
            debug!(request = %id, "unregistered process");
        }
        removed
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.lock().entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Force-kill every registered process and wait for their supervisors to finish.
    ///
    /// Closing and draining happen under one lock, so the registry is empty and
    /// stays empty as soon as this starts awaiting. Returns how many processes
    /// were signalled.
    pub async fn kill_all(&self) -> usize {
        let drained: Vec<(RequestId, RunningProcess)> = {
            let mut active = self.lock();
            active.closed = true;
            active.entries.drain().collect()
        };
        let count = drained.len();
        if count == 0 {
            return 0;
        }
        info!(count, "terminating running processes");

        let mut waits = Vec::with_capacity(count);
        for (id, process) in drained {
            debug!(request = %id, pid = ?process.pid, "sending kill");
            // Err means the supervisor is already finishing on its own.
            let _ = process.kill_tx.send(());
            waits.push(process.exited_rx);
        }
        futures::future::join_all(waits).await;
        count
    }
}

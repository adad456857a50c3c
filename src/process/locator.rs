//! Interpreter discovery by version probe.

use std::{process::Stdio, time::Duration};

use tokio::{process::Command, time::timeout};
use tracing::debug;

/// Host-ordered candidate names: versioned name first on POSIX, generic first on Windows.
pub fn default_candidates() -> Vec<String> {
    let names: &[&str] = if cfg!(windows) {
        &["python", "python3"]
    } else {
        &["python3", "python"]
    };
    names.iter().map(|s| s.to_string()).collect()
}

/// Return the first candidate whose `--version` probe exits zero.
///
/// Never fails: a candidate that is missing, hangs past `probe_timeout`, or exits
/// non-zero is skipped. Nothing is cached; every call probes again.
pub async fn locate(candidates: &[String], probe_timeout: Duration) -> Option<String> {
    for candidate in candidates {
        if candidate.is_empty() {
            continue;
        }
        if probe(candidate, &["--version"], probe_timeout).await {
            debug!(interpreter = %candidate, "interpreter located");
            return Some(candidate.clone());
        }
        debug!(candidate = %candidate, "candidate rejected");
    }
    None
}

/// Run `program args...` with all stdio discarded; true on exit code zero.
async fn probe(program: &str, args: &[&str], probe_timeout: Duration) -> bool {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    match timeout(probe_timeout, cmd.status()).await {
        Ok(Ok(status)) => status.success(),
        Ok(Err(e)) => {
            debug!(program, error = %e, "probe could not start");
            false
        }
        Err(_) => {
            debug!(program, "probe timed out");
            false
        }
    }
}

//! Process lifecycle tests with `bash` standing in for the interpreter.
#![cfg(unix)]

use std::{path::Path, time::Duration};

use robot_studio_bridge::{
    execution::{ExecutionRequest, OutputStream, RunState},
    process::locator,
    relay::{BridgeEvent, EventChannel, EventPayload},
    OutputRelay, ProcessRunner, Settings,
};
use tokio::sync::mpsc::UnboundedReceiver;

fn bash_settings(dir: &Path) -> Settings {
    Settings {
        candidates: vec!["robot-studio-no-such-interpreter".into(), "bash".into()],
        temp_dir: dir.to_path_buf(),
        probe_timeout: Duration::from_secs(5),
    }
}

async fn bash_available() -> bool {
    let found = locator::locate(&["bash".to_string()], Duration::from_secs(5)).await.is_some();
    if !found {
        println!("bash not found, skipping");
    }
    found
}

fn drain(rx: &mut UnboundedReceiver<BridgeEvent>) -> Vec<BridgeEvent> {
    let mut out = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        out.push(ev);
    }
    out
}

fn dir_is_empty(dir: &Path) -> bool {
    std::fs::read_dir(dir).map(|mut d| d.next().is_none()).unwrap_or(false)
}

#[tokio::test]
async fn test_execute_streams_output_then_one_terminal_event() {
    if !bash_available().await {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let (relay, mut rx) = OutputRelay::channel();
    let runner = ProcessRunner::new(bash_settings(dir.path()), relay);

    let handle = runner.execute("echo hi\necho oops >&2\nexit 3\n").await.unwrap();
    let id = handle.id.clone();
    let result = handle.wait().await;

    assert_eq!(result.state, RunState::Completed { exit_code: Some(3) });
    assert_eq!(result.stdout, "hi\n");
    assert_eq!(result.stderr, "oops\n");
    assert!(!runner.registry().contains(&id));
    assert!(dir_is_empty(dir.path()), "script file left behind");

    let events = drain(&mut rx);
    assert!(events.iter().all(|e| e.request_id == id));
    let terminal: Vec<_> = events.iter().filter(|e| e.channel.is_terminal()).collect();
    assert_eq!(terminal.len(), 1);
    let last = events.last().unwrap();
    assert_eq!(last.channel, EventChannel::ExecutionComplete);
    match &last.payload {
        EventPayload::Complete(done) => {
            assert_eq!(done.exit_code, Some(3));
            assert_eq!(done.stdout, "hi\n");
            assert_eq!(done.stderr, "oops\n");
        }
        other => panic!("unexpected payload {:?}", other),
    }

    let relayed_stdout: String = events
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::Output(o) if o.stream == OutputStream::Stdout => Some(o.data.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(relayed_stdout, "hi\n");
}

#[tokio::test]
async fn test_script_runs_in_temp_dir() {
    if !bash_available().await {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let (relay, _rx) = OutputRelay::channel();
    let runner = ProcessRunner::new(bash_settings(dir.path()), relay);

    let result = runner.execute("pwd -P").await.unwrap().wait().await;
    let expected = dir.path().canonicalize().unwrap();
    assert_eq!(result.stdout.trim(), expected.to_string_lossy());
}

#[tokio::test]
async fn test_concurrent_runs_are_independent_and_shutdown_kills_the_rest() {
    if !bash_available().await {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let (relay, mut rx) = OutputRelay::channel();
    let runner = ProcessRunner::new(bash_settings(dir.path()), relay);

    let slow = runner.execute("exec sleep 30").await.unwrap();
    let fast = runner.execute("echo done").await.unwrap();
    assert_ne!(slow.id, fast.id);
    assert_eq!(slow.state(), RunState::Running);

    let fast_result = fast.wait().await;
    assert!(fast_result.succeeded());
    assert!(runner.registry().contains(&slow.id));
    assert!(!runner.registry().contains(&fast_result.id));

    assert_eq!(runner.shutdown().await, 1);
    assert!(runner.registry().is_empty());

    let slow_id = slow.id.clone();
    let slow_result = slow.wait().await;
    assert_eq!(slow_result.state, RunState::Completed { exit_code: None });
    assert!(dir_is_empty(dir.path()));

    let events = drain(&mut rx);
    for id in [&slow_id, &fast_result.id] {
        let mine: Vec<_> = events.iter().filter(|e| &e.request_id == id).collect();
        assert_eq!(mine.iter().filter(|e| e.channel.is_terminal()).count(), 1);
        assert!(mine.last().unwrap().channel.is_terminal());
    }
}

#[tokio::test]
async fn test_shutdown_force_terminates_every_run_in_flight() {
    if !bash_available().await {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let (relay, mut rx) = OutputRelay::channel();
    let runner = ProcessRunner::new(bash_settings(dir.path()), relay);

    let first = runner.execute("exec sleep 30").await.unwrap();
    let second = runner.execute("exec sleep 30").await.unwrap();
    assert_eq!(runner.registry().len(), 2);

    let started = std::time::Instant::now();
    assert_eq!(runner.shutdown().await, 2);
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(runner.registry().is_empty());

    let ids = [first.id.clone(), second.id.clone()];
    for handle in [first, second] {
        assert_eq!(handle.wait().await.state, RunState::Completed { exit_code: None });
    }
    assert!(dir_is_empty(dir.path()));

    let events = drain(&mut rx);
    for id in &ids {
        let terminal: Vec<_> = events
            .iter()
            .filter(|e| &e.request_id == id && e.channel.is_terminal())
            .collect();
        assert_eq!(terminal.len(), 1);
        match &terminal[0].payload {
            EventPayload::Complete(done) => assert_eq!(done.exit_code, None),
            other => panic!("unexpected payload {:?}", other),
        }
    }

    // Closed for good: nothing new starts after the sweep.
    let err = runner.execute("echo late").await.unwrap_err();
    assert_eq!(err.kind(), "rejected");
    assert!(runner.registry().is_empty());
    assert!(dir_is_empty(dir.path()));
}

#[tokio::test]
async fn test_spawn_failure_emits_error_and_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let (relay, mut rx) = OutputRelay::channel();
    let runner = ProcessRunner::new(bash_settings(dir.path()), relay);

    let request = ExecutionRequest::script("print('hi')");
    let id = request.id.clone();
    let err = runner
        .run("robot-studio-no-such-interpreter", request)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "spawn-failure");
    assert!(runner.registry().is_empty());
    assert!(dir_is_empty(dir.path()));

    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].channel, EventChannel::ExecutionError);
    assert_eq!(events[0].request_id, id);
}

#[tokio::test]
async fn test_pip_probe_failure_is_package_manager_unavailable() {
    if !bash_available().await {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let (relay, mut rx) = OutputRelay::channel();
    let runner = ProcessRunner::new(bash_settings(dir.path()), relay);

    // bash reads `pip` as a script path that does not exist, so the probe fails.
    let err = runner.install_package("numpy").await.unwrap_err();
    assert_eq!(err.kind(), "package-manager-unavailable");
    assert!(drain(&mut rx).is_empty(), "install must not start after a failed probe");
}

//! End-to-end checks against a real Python, skipped when none is installed.

use robot_studio_bridge::{
    relay::{EventChannel, EventPayload},
    OutputRelay, ProcessRunner, Settings,
};

async fn runner_with_python() -> Option<(ProcessRunner, tokio::sync::mpsc::UnboundedReceiver<robot_studio_bridge::BridgeEvent>)> {
    let (relay, rx) = OutputRelay::channel();
    let runner = ProcessRunner::new(Settings::default(), relay);
    if runner.locate().await.is_none() {
        println!("no Python interpreter found, skipping");
        return None;
    }
    Some((runner, rx))
}

#[tokio::test]
async fn test_print_hi_completes_with_zero() -> anyhow::Result<()> {
    let Some((runner, mut rx)) = runner_with_python().await else {
        return Ok(());
    };

    let result = runner.execute("print('hi')").await?.wait().await;
    assert_eq!(result.exit_code(), Some(0));
    assert!(result.stdout.contains("hi"));

    let mut last = None;
    while let Ok(ev) = rx.try_recv() {
        last = Some(ev);
    }
    let last = last.expect("at least the terminal event");
    assert_eq!(last.channel, EventChannel::ExecutionComplete);
    match last.payload {
        EventPayload::Complete(done) => {
            assert_eq!(done.exit_code, Some(0));
            assert!(done.stdout.contains("hi"));
        }
        other => panic!("unexpected payload {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_script_error_is_non_zero_exit_not_spawn_failure() -> anyhow::Result<()> {
    let Some((runner, _rx)) = runner_with_python().await else {
        return Ok(());
    };

    let result = runner.execute("raise SystemExit('bad input')").await?.wait().await;
    assert_eq!(result.exit_code(), Some(1));
    assert!(result.stderr.contains("bad input"));
    Ok(())
}

#[tokio::test]
async fn test_check_package_against_stdlib() -> anyhow::Result<()> {
    let Some((runner, _rx)) = runner_with_python().await else {
        return Ok(());
    };

    assert!(runner.check_package("json").await?);
    assert!(!runner.check_package("robot_studio_surely_missing_xyz").await?);
    assert!(!runner.check_package("robot_studio_surely_missing_xyz").await?);
    Ok(())
}

#![deny(warnings)]
use std::time::{Duration, Instant};

use realmd_common::config::RealmdConfig;
use realmd_common::error::RealmError;
use realmd_service::command::CommandRunner;
use realmd_service::diagnostics::Invocation;
use tokio::sync::mpsc::unbounded_channel;

fn argv(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

fn runner() -> CommandRunner {
    sketching::test_init();
    CommandRunner::new(&RealmdConfig::new())
}

#[tokio::test]
async fn test_exit_code_and_interleaved_output() {
    let runner = runner();
    let inv = Invocation::detached();
    let out = runner
        .run(
            &argv(&["/bin/sh", "-c", "echo out; echo err >&2; exit 3"]),
            &[],
            None,
            &inv,
        )
        .await
        .expect("run failed");
    assert_eq!(out.code, 3);
    assert!(!out.success());
    assert!(out.output.contains("out\n"));
    assert!(out.output.contains("err\n"));
}

#[tokio::test]
async fn test_input_and_environment() {
    let runner = runner();
    let inv = Invocation::detached();
    let out = runner
        .run(
            &argv(&["/bin/sh", "-c", "read line; echo \"$line $GREETING\""]),
            &[("GREETING", "hello".to_string())],
            Some(b"secret\n"),
            &inv,
        )
        .await
        .expect("run failed");
    assert!(out.success());
    assert_eq!(out.output, "secret hello\n");
}

#[tokio::test]
async fn test_output_is_streamed_as_diagnostics() {
    let runner = runner();
    let (tx, mut rx) = unbounded_channel();
    let inv = Invocation::new(None, Some(tx));
    runner
        .run(&argv(&["/bin/echo", "visible"]), &[], None, &inv)
        .await
        .expect("run failed");
    drop(inv);

    let mut lines = Vec::new();
    while let Some(line) = rx.recv().await {
        lines.push(line);
    }
    assert!(lines.iter().any(|l| l.contains("Running: /bin/echo visible")));
    assert!(lines.iter().any(|l| l.contains("visible")));
}

#[tokio::test]
async fn test_missing_command_fails() {
    let runner = runner();
    let inv = Invocation::detached();
    let out = runner
        .run_known("no-such-command", &[], &[], None, &inv)
        .await
        .expect("run failed");
    assert!(!out.success());

    let res = runner
        .run(&argv(&["/nonexistent/binary"]), &[], None, &inv)
        .await;
    assert!(matches!(res, Err(RealmError::Internal(_))));
}

#[tokio::test]
async fn test_cancel_terminates_the_child() {
    let runner = runner();
    let inv = Invocation::detached();
    let canceller = inv.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    let res = runner
        .run(&argv(&["/bin/sleep", "30"]), &[], None, &inv)
        .await;
    assert_eq!(res, Err(RealmError::cancelled()));
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn test_cancelled_before_start_runs_nothing() {
    let runner = runner();
    let inv = Invocation::detached();
    inv.cancel();
    let res = runner
        .run(&argv(&["/bin/true"]), &[], None, &inv)
        .await;
    assert_eq!(res, Err(RealmError::cancelled()));
}

#[tokio::test]
async fn test_timeout() {
    sketching::test_init();
    let mut config = RealmdConfig::new();
    config.command_timeout = 1;
    let runner = CommandRunner::new(&config);
    let inv = Invocation::detached();

    let res = runner
        .run(&argv(&["/bin/sleep", "30"]), &[], None, &inv)
        .await;
    match res {
        Err(RealmError::Internal(msg)) => assert!(msg.contains("timed out")),
        other => panic!("unexpected result {:?}", other),
    }
}

// The child exits straight away but leaves a background job holding its output open.
const BACKGROUNDED: &[&str] = &["/bin/sh", "-c", "sleep 30 & exit 0"];

#[tokio::test]
async fn test_cancel_reaches_background_jobs() {
    let runner = runner();
    let inv = Invocation::detached();
    let canceller = inv.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        canceller.cancel();
    });

    let res = tokio::time::timeout(
        Duration::from_secs(10),
        runner.run(&argv(BACKGROUNDED), &[], None, &inv),
    )
    .await
    .expect("cancel did not stop the run");
    assert_eq!(res, Err(RealmError::cancelled()));
}

#[tokio::test]
async fn test_timeout_reaches_background_jobs() {
    sketching::test_init();
    let mut config = RealmdConfig::new();
    config.command_timeout = 1;
    let runner = CommandRunner::new(&config);
    let inv = Invocation::detached();

    let res = tokio::time::timeout(
        Duration::from_secs(10),
        runner.run(&argv(BACKGROUNDED), &[], None, &inv),
    )
    .await
    .expect("timeout did not stop the run");
    match res {
        Err(RealmError::Internal(msg)) => assert!(msg.contains("timed out")),
        other => panic!("unexpected result {:?}", other),
    }
}

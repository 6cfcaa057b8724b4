#![cfg(unix)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use drydock_core::process::{ExecutionOptions, OutputStream, ProcessExecutor};

fn sh(script: &str) -> ExecutionOptions {
    ExecutionOptions::new("sh", ["-c", script])
}

#[tokio::test]
async fn captures_stdout_stderr_and_exit_code() {
    let executor = ProcessExecutor::new();
    let result = executor
        .execute_and_capture(sh("echo out-line; echo err-line >&2; exit 3"))
        .await;

    assert!(result.started);
    assert_eq!(result.exit_code, Some(3));
    assert_eq!(result.stdout, "out-line");
    assert_eq!(result.stderr, "err-line");
    assert!(!result.timed_out);
    assert!(!result.canceled);
    assert!(result.finished_at.is_some());
}

#[tokio::test]
async fn success_requires_zero_exit() {
    let executor = ProcessExecutor::new();
    assert!(executor.execute_and_capture(sh("true")).await.success());
    assert!(!executor.execute_and_capture(sh("false")).await.success());
}

#[tokio::test]
async fn spawn_failure_becomes_not_started_result() {
    let executor = ProcessExecutor::new();
    let result = executor
        .execute_and_capture(ExecutionOptions::new(
            "/nonexistent/definitely-not-a-binary",
            Vec::<String>::new(),
        ))
        .await;

    assert!(!result.started);
    assert!(result.exit_code.is_none());
    assert!(!result.stderr.is_empty());
}

#[tokio::test]
async fn timeout_marks_result_timed_out() {
    let executor = ProcessExecutor::new();
    let result = executor
        .execute_and_capture(sh("sleep 30").timeout(Duration::from_millis(100)))
        .await;

    assert!(result.started);
    assert!(result.timed_out);
    assert!(!result.canceled);
    assert_ne!(result.exit_code, Some(0));
}

#[tokio::test]
async fn external_cancellation_marks_result_canceled() {
    let executor = ProcessExecutor::new();
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
    });

    let result = executor
        .execute_and_capture(sh("sleep 30").cancel_token(token))
        .await;

    assert!(result.canceled);
    assert!(!result.timed_out);
}

#[tokio::test]
async fn pre_canceled_token_beats_timeout() {
    let executor = ProcessExecutor::new();
    let token = CancellationToken::new();
    token.cancel();

    let result = executor
        .execute_and_capture(
            sh("sleep 30")
                .timeout(Duration::from_millis(50))
                .cancel_token(token),
        )
        .await;

    assert!(result.canceled);
    assert!(!result.timed_out);
}

#[tokio::test]
async fn realtime_callback_receives_each_line() {
    let executor = ProcessExecutor::new();
    let seen: Arc<Mutex<Vec<(String, OutputStream)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();

    let options = sh("echo one; echo two; echo err >&2").on_output(Arc::new(move |line, stream| {
        sink.lock().unwrap().push((line.to_string(), stream));
    }));
    let result = executor.execute_with_realtime_output(options).await;

    assert!(result.success());
    let seen = seen.lock().unwrap();
    assert!(seen.contains(&("one".to_string(), OutputStream::StdOut)));
    assert!(seen.contains(&("two".to_string(), OutputStream::StdOut)));
    assert!(seen.contains(&("err".to_string(), OutputStream::StdErr)));
}

#[tokio::test]
async fn callback_panic_does_not_abort_execution() {
    let executor = ProcessExecutor::new();
    let options = sh("echo boom; echo after")
        .on_output(Arc::new(|line, _| {
            if line == "boom" {
                panic!("callback exploded");
            }
        }));
    let result = executor.execute_with_realtime_output(options).await;

    assert!(result.success());
    assert!(result.stdout.contains("after"));
}

#[tokio::test]
async fn capture_mode_does_not_invoke_callback() {
    let executor = ProcessExecutor::new();
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();

    let options = sh("echo quiet").on_output(Arc::new(move |line, _| {
        sink.lock().unwrap().push(line.to_string());
    }));
    let result = executor.execute_and_capture(options).await;

    assert_eq!(result.stdout, "quiet");
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn environment_and_working_dir_reach_the_child() {
    let temp = tempfile::tempdir().unwrap();
    let executor = ProcessExecutor::new();
    let result = executor
        .execute_and_capture(
            sh("echo $DRYDOCK_TEST_VAR; pwd")
                .env("DRYDOCK_TEST_VAR", "hello")
                .working_dir(temp.path()),
        )
        .await;

    assert!(result.success());
    assert!(result.stdout.starts_with("hello"));
    assert!(result.stdout.contains(&*temp.path().to_string_lossy()));
}

#[tokio::test]
async fn fire_and_forget_returns_immediately_with_pid() {
    let executor = ProcessExecutor::new();
    let launch = executor.fire_and_forget(&sh("sleep 0.1")).await;

    assert!(launch.started);
    assert!(launch.process_id.is_some());
    assert!(launch.error.is_none());
}

#[tokio::test]
async fn fire_and_forget_reports_spawn_failure() {
    let executor = ProcessExecutor::new();
    let launch = executor
        .fire_and_forget(&ExecutionOptions::new(
            "/nonexistent/definitely-not-a-binary",
            Vec::<String>::new(),
        ))
        .await;

    assert!(!launch.started);
    assert!(launch.process_id.is_none());
    assert!(launch.error.is_some());
}

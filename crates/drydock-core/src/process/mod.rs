//! External process execution service.
//!
//! Every external tool drydock touches (archive helpers, database client
//! tools, kubectl, browser launchers) runs through this service. Three
//! modes share one options type: fire-and-forget launch, capture, and
//! capture with realtime line streaming. Spawn failures are converted into
//! failed results, never returned as errors.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Identifies the stream a process output line was produced on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    StdOut,
    StdErr,
}

/// Callback invoked for each output line in realtime mode.
pub type OutputCallback = Arc<dyn Fn(&str, OutputStream) + Send + Sync>;

/// Options controlling a single process execution.
#[derive(Clone, Default)]
pub struct ExecutionOptions {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: HashMap<String, String>,
    /// Optional execution deadline. Firing marks the result `timed_out`.
    pub timeout: Option<Duration>,
    /// Optional external cancellation. Takes precedence over the timeout.
    pub cancel: Option<CancellationToken>,
    /// Mirror output lines to the tracing sink in realtime mode.
    pub mirror_output: bool,
    /// Skip mirroring of stderr lines in realtime mode.
    pub suppress_errors: bool,
    pub on_output: Option<OutputCallback>,
}

impl ExecutionOptions {
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn mirror_output(mut self, mirror: bool) -> Self {
        self.mirror_output = mirror;
        self
    }

    pub fn suppress_errors(mut self, suppress: bool) -> Self {
        self.suppress_errors = suppress;
        self
    }

    pub fn on_output(mut self, callback: OutputCallback) -> Self {
        self.on_output = Some(callback);
        self
    }
}

impl std::fmt::Debug for ExecutionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionOptions")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("working_dir", &self.working_dir)
            .field("timeout", &self.timeout)
            .field("mirror_output", &self.mirror_output)
            .field("suppress_errors", &self.suppress_errors)
            .field("on_output", &self.on_output.as_ref().map(|_| "<callback>"))
            .finish()
    }
}

/// Outcome of a capturing execution. Produced exactly once per request.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub started: bool,
    pub process_id: Option<u32>,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub canceled: bool,
    pub stdout: String,
    pub stderr: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ExecutionResult {
    fn not_started(message: String, started_at: DateTime<Utc>) -> Self {
        Self {
            started: false,
            process_id: None,
            exit_code: None,
            timed_out: false,
            canceled: false,
            stdout: String::new(),
            stderr: message,
            started_at,
            finished_at: Some(Utc::now()),
        }
    }

    /// True when the process ran to completion with exit code zero.
    pub fn success(&self) -> bool {
        self.started && !self.canceled && !self.timed_out && self.exit_code == Some(0)
    }
}

/// Outcome of a fire-and-forget launch.
#[derive(Debug, Clone)]
pub struct LaunchResult {
    pub started: bool,
    pub process_id: Option<u32>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
}

/// Runs external executables on behalf of the deploy pipeline.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor;

impl ProcessExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Start a process without waiting for it. Never blocks past spawn.
    pub async fn fire_and_forget(&self, options: &ExecutionOptions) -> LaunchResult {
        let started_at = Utc::now();
        let mut cmd = Command::new(&options.program);
        cmd.args(&options.args);
        if let Some(dir) = &options.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &options.env {
            cmd.env(key, value);
        }

        match cmd.spawn() {
            Ok(child) => LaunchResult {
                started: true,
                process_id: child.id(),
                error: None,
                started_at,
            },
            Err(err) => LaunchResult {
                started: false,
                process_id: None,
                error: Some(err.to_string()),
                started_at,
            },
        }
    }

    /// Start a process, wait for exit, and return the buffered output.
    pub async fn execute_and_capture(&self, options: ExecutionOptions) -> ExecutionResult {
        self.execute_internal(options, false).await
    }

    /// Like [`execute_and_capture`](Self::execute_and_capture), but every
    /// output line is also delivered to the callback as it arrives and
    /// optionally mirrored to the tracing sink.
    pub async fn execute_with_realtime_output(&self, options: ExecutionOptions) -> ExecutionResult {
        self.execute_internal(options, true).await
    }

    async fn execute_internal(&self, options: ExecutionOptions, realtime: bool) -> ExecutionResult {
        let started_at = Utc::now();

        let mut cmd = Command::new(&options.program);
        cmd.args(&options.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &options.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &options.env {
            cmd.env(key, value);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => return ExecutionResult::not_started(err.to_string(), started_at),
        };
        let process_id = child.id();

        let publisher = Arc::new(LinePublisher {
            callback: options.on_output.clone(),
            mirror_output: options.mirror_output,
            suppress_errors: options.suppress_errors,
        });
        let stdout_task = spawn_reader(
            child.stdout.take(),
            OutputStream::StdOut,
            publisher.clone(),
            realtime,
        );
        let stderr_task = spawn_reader(
            child.stderr.take(),
            OutputStream::StdErr,
            publisher,
            realtime,
        );

        let external = options.cancel.clone().unwrap_or_default();
        let mut canceled = false;
        let mut timed_out = false;

        let deadline = async {
            match options.timeout {
                Some(timeout) if !timeout.is_zero() => tokio::time::sleep(timeout).await,
                _ => std::future::pending().await,
            }
        };

        let exit_status = tokio::select! {
            status = child.wait() => status.ok(),
            _ = external.cancelled() => {
                canceled = true;
                let _ = child.start_kill();
                child.wait().await.ok()
            }
            _ = deadline => {
                // External cancellation wins when both fired.
                if external.is_cancelled() {
                    canceled = true;
                } else {
                    timed_out = true;
                }
                let _ = child.start_kill();
                child.wait().await.ok()
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        ExecutionResult {
            started: true,
            process_id,
            exit_code: exit_status.and_then(|status| status.code()),
            timed_out,
            canceled,
            stdout,
            stderr,
            started_at,
            finished_at: Some(Utc::now()),
        }
    }
}

struct LinePublisher {
    callback: Option<OutputCallback>,
    mirror_output: bool,
    suppress_errors: bool,
}

impl LinePublisher {
    fn publish(&self, line: &str, stream: OutputStream) {
        if let Some(callback) = &self.callback {
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| callback(line, stream)));
            if outcome.is_err() {
                error!("Process output callback failed; continuing execution");
            }
        }

        if !self.mirror_output {
            return;
        }
        match stream {
            OutputStream::StdErr => {
                if !self.suppress_errors {
                    warn!("{line}");
                }
            }
            OutputStream::StdOut => info!("{line}"),
        }
    }
}

fn spawn_reader<R>(
    reader: Option<R>,
    stream: OutputStream,
    publisher: Arc<LinePublisher>,
    realtime: bool,
) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut captured = String::new();
        let Some(reader) = reader else {
            return captured;
        };
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if !captured.is_empty() {
                captured.push('\n');
            }
            captured.push_str(&line);
            if realtime {
                publisher.publish(&line, stream);
            }
        }
        captured
    })
}

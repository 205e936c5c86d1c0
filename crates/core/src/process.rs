//! Bounded subprocess execution.
//!
//! [`SubprocessRunner`] spawns the composed command, captures stdout and
//! stderr, and enforces a hard wall-clock timeout. A timed-out child is
//! killed and reaped before `run` returns.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

/// Maximum stdout or stderr size captured per stream (10 MiB).
///
/// Output exceeding this limit is truncated to prevent memory exhaustion
/// from extremely verbose test suites.
const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// How long to keep draining output pipes after the child has exited.
///
/// A grandchild that inherited the pipes can hold them open indefinitely.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Result of a process that ran to completion (any exit code).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Process exit code (`-1` if killed by signal).
    pub exit_code: i32,
    /// Stdout followed by stderr.
    pub output: String,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

/// Errors that prevent a process from running to completion.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Empty command line")]
    EmptyCommand,

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error while waiting for process: {0}")]
    Io(#[from] std::io::Error),

    #[error("Process timed out after {}s and was killed", timeout.as_secs_f64())]
    Timeout { timeout: Duration },
}

/// Runs a command line with a timeout.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, command: &[String], timeout: Duration)
        -> Result<ProcessOutput, ProcessError>;
}

/// [`ProcessRunner`] backed by `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct SubprocessRunner {
    working_directory: Option<PathBuf>,
}

impl SubprocessRunner {
    pub fn new(working_directory: Option<PathBuf>) -> Self {
        Self { working_directory }
    }
}

#[async_trait]
impl ProcessRunner for SubprocessRunner {
    async fn run(
        &self,
        command: &[String],
        timeout: Duration,
    ) -> Result<ProcessOutput, ProcessError> {
        let (program, args) = command.split_first().ok_or(ProcessError::EmptyCommand)?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &self.working_directory {
            cmd.current_dir(dir);
        }

        let start = Instant::now();

        let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            program: program.clone(),
            source,
        })?;

        // Read the pipes in spawned tasks so we can still call
        // `child.wait()` (which borrows `&mut child`).
        let stdout_task = tokio::spawn(read_stream(child.stdout.take()));
        let stderr_task = tokio::spawn(read_stream(child.stderr.take()));

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => {
                let stdout = collect(stdout_task).await;
                let stderr = collect(stderr_task).await;
                Ok(ProcessOutput {
                    exit_code: status.code().unwrap_or(-1),
                    output: combine_output(&stdout, &stderr),
                    duration_ms: start.elapsed().as_millis() as u64,
                })
            }
            Ok(Err(e)) => {
                stdout_task.abort();
                stderr_task.abort();
                Err(ProcessError::Io(e))
            }
            Err(_elapsed) => {
                if let Err(e) = child.start_kill() {
                    tracing::warn!(error = %e, "Failed to kill timed-out process");
                }
                // Reap so the child does not linger as a zombie.
                let _ = tokio::time::timeout(OUTPUT_DRAIN_GRACE, child.wait()).await;
                stdout_task.abort();
                stderr_task.abort();
                Err(ProcessError::Timeout { timeout })
            }
        }
    }
}

/// Read an entire output stream into a byte buffer, capped at [`MAX_OUTPUT_BYTES`].
///
/// Bytes past the cap are still read (and discarded) until EOF, so the child
/// never sees a closed pipe; a marker records how much was dropped.
async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut h) = handle {
        let _ = (&mut h)
            .take(MAX_OUTPUT_BYTES as u64)
            .read_to_end(&mut buf)
            .await;
        match tokio::io::copy(&mut h, &mut tokio::io::sink()).await {
            Ok(0) => {}
            Ok(dropped) => buf.extend_from_slice(truncation_marker(dropped).as_bytes()),
            Err(e) => tracing::warn!(error = %e, "Failed to drain output past capture limit"),
        }
    }
    buf
}

fn truncation_marker(dropped: u64) -> String {
    format!("\n[output truncated: {dropped} bytes omitted]\n")
}

/// Await a reader task, giving up after [`OUTPUT_DRAIN_GRACE`].
///
/// Capture is best-effort: a stuck or failed reader yields empty output.
async fn collect(mut task: JoinHandle<Vec<u8>>) -> Vec<u8> {
    match tokio::time::timeout(OUTPUT_DRAIN_GRACE, &mut task).await {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Output reader task failed");
            Vec::new()
        }
        Err(_) => {
            task.abort();
            tracing::warn!("Output pipe still open after process exit, truncating capture");
            Vec::new()
        }
    }
}

fn combine_output(stdout: &[u8], stderr: &[u8]) -> String {
    let mut output = String::from_utf8_lossy(stdout).into_owned();
    if !stderr.is_empty() {
        if !output.is_empty() && !output.ends_with('\n') {
            output.push('\n');
        }
        output.push_str(&String::from_utf8_lossy(stderr));
    }
    output
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Execution capability consumed by the capture core.
//!
//! The scheduler client that actually runs commands inside allocation tasks
//! and streams their logs sits behind [`TaskExecutor`]. The core never
//! constructs one itself; callers hand in an implementation such as
//! [`NomadCliExecutor`] or, in tests, [`crate::testing::StubExecutor`].

pub mod nomad;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use thiserror::Error;

pub use nomad::NomadCliExecutor;

/// Output of a command executed inside a task.
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    /// Exit code reported by the remote command (-1 when unknown).
    pub exit_code: i32,
    /// Raw standard output.
    pub stdout: Vec<u8>,
    /// Raw standard error.
    pub stderr: Vec<u8>,
}

impl ExecOutput {
    /// Whether the command exited with status zero.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Standard error as lossy UTF-8, trimmed.
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

/// Which log stream of a task to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl LogStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStream::Stdout => "stdout",
            LogStream::Stderr => "stderr",
        }
    }
}

impl std::fmt::Display for LogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stream of raw log bytes. Dropping it stops the underlying reader.
pub type LogByteStream = BoxStream<'static, Result<Bytes, ExecError>>;

/// Errors from the execution capability itself.
///
/// A command that runs and exits non-zero is *not* an `ExecError`; that is
/// reported through [`ExecOutput::exit_code`].
#[derive(Debug, Error)]
pub enum ExecError {
    /// The local client process could not be started.
    #[error("Failed to spawn '{program}': {reason}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Reason for failure.
        reason: String,
    },

    /// The command did not finish before its deadline.
    #[error("Command in task '{task}' timed out after {timeout:?}")]
    Timeout {
        /// Task the command ran in.
        task: String,
        /// Deadline that was exceeded.
        timeout: Duration,
    },

    /// A log stream could not be opened or broke mid-way.
    #[error("Log stream for task '{task}' failed: {reason}")]
    Stream {
        /// Task whose logs were streamed.
        task: String,
        /// Reason for failure.
        reason: String,
    },

    /// I/O error talking to the client process.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Runs commands inside allocation tasks and streams task logs.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Execute `command` inside `task` of allocation `alloc_id`.
    async fn execute(
        &self,
        alloc_id: &str,
        task: &str,
        command: &[String],
    ) -> Result<ExecOutput, ExecError>;

    /// Open a log stream for `task`. With `follow`, the stream stays open
    /// until the task ends or the stream is dropped.
    async fn stream_logs(
        &self,
        alloc_id: &str,
        task: &str,
        stream: LogStream,
        follow: bool,
    ) -> Result<LogByteStream, ExecError>;
}

/// Execute a command with an explicit deadline.
pub async fn execute_with_deadline(
    executor: &dyn TaskExecutor,
    alloc_id: &str,
    task: &str,
    command: &[String],
    timeout: Duration,
) -> Result<ExecOutput, ExecError> {
    match tokio::time::timeout(timeout, executor.execute(alloc_id, task, command)).await {
        Ok(result) => result,
        Err(_) => Err(ExecError::Timeout {
            task: task.to_string(),
            timeout,
        }),
    }
}

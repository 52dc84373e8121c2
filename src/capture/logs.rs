//! Concurrent task log streaming for the duration of a capture.
//!
//! One unit per task, each joining a stdout and a stderr sub-unit. Sub-units
//! stop at natural end of stream, at the deadline, or on cancellation,
//! whichever comes first.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::exec::{ExecError, LogStream, TaskExecutor};

/// Line placed between stdout and stderr in a task's log artifact.
pub const STDERR_SEPARATOR: &str = "\n--- STDERR ---\n";

/// Artifact name for a task's logs.
pub fn log_artifact_name(task: &str) -> String {
    format!("{}-logs.txt", task)
}

/// How one task's log capture ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutcome {
    Written { task: String, artifact: String },
    Failed { task: String, reason: String },
}

/// What a unit read before it stopped.
type UnitResult = (String, Result<Vec<u8>, ExecError>);

/// Log streams in flight for one capture.
///
/// Units only read; artifacts are written by [`LogCollector::join`] so that
/// no write is still in flight once it returns.
pub struct LogCollector {
    units: JoinSet<UnitResult>,
    tasks: Vec<String>,
    dir: PathBuf,
    deadline: Instant,
    token: CancellationToken,
}

impl LogCollector {
    /// Start one log unit per task, writing artifacts into `dir`.
    pub fn start(
        executor: Arc<dyn TaskExecutor>,
        alloc_id: &str,
        tasks: &[String],
        dir: &Path,
        deadline: Instant,
        token: CancellationToken,
    ) -> Self {
        let mut units = JoinSet::new();
        for task in tasks {
            tracing::info!("Starting log stream for task {}", task);
            let unit = TaskLogUnit {
                executor: Arc::clone(&executor),
                alloc_id: alloc_id.to_string(),
                task: task.clone(),
                deadline,
                token: token.clone(),
            };
            units.spawn(unit.run());
        }

        Self {
            units,
            tasks: tasks.to_vec(),
            dir: dir.to_path_buf(),
            deadline,
            token,
        }
    }

    /// Wait for every unit, bounded by the deadline plus `cancel_grace`.
    ///
    /// Units still running at the deadline are cancelled; any that have not
    /// stopped after `cancel_grace` are aborted and reported as failed.
    pub async fn join(mut self, cancel_grace: Duration) -> Vec<LogOutcome> {
        let mut finished = Vec::with_capacity(self.tasks.len());

        let drained =
            tokio::time::timeout_at(self.deadline, drain(&mut self.units, &mut finished)).await;
        if drained.is_err() {
            self.token.cancel();
            let acknowledged =
                tokio::time::timeout(cancel_grace, drain(&mut self.units, &mut finished)).await;
            if acknowledged.is_err() {
                tracing::warn!(
                    "{} log stream(s) did not stop within {:?}, aborting",
                    self.units.len(),
                    cancel_grace
                );
                self.units.abort_all();
                while self.units.join_next().await.is_some() {}
            }
        }

        let mut outcomes = Vec::with_capacity(self.tasks.len());
        for task in &self.tasks {
            let read = finished
                .iter()
                .position(|(t, _)| t == task)
                .map(|i| finished.swap_remove(i).1);
            let outcome = match read {
                Some(Ok(contents)) => write_log(&self.dir, task, contents).await,
                Some(Err(e)) => {
                    tracing::warn!("Failed to stream logs for task {}: {}", task, e);
                    LogOutcome::Failed {
                        task: task.clone(),
                        reason: e.to_string(),
                    }
                }
                None => {
                    tracing::warn!("Skipping logs for task {}: stream did not stop", task);
                    LogOutcome::Failed {
                        task: task.clone(),
                        reason: "log stream did not stop in time".to_string(),
                    }
                }
            };
            outcomes.push(outcome);
        }
        outcomes
    }
}

async fn drain(units: &mut JoinSet<UnitResult>, finished: &mut Vec<UnitResult>) {
    while let Some(joined) = units.join_next().await {
        match joined {
            Ok(result) => finished.push(result),
            Err(e) => tracing::warn!("Log stream unit failed: {}", e),
        }
    }
}

async fn write_log(dir: &Path, task: &str, contents: Vec<u8>) -> LogOutcome {
    let artifact = log_artifact_name(task);
    match tokio::fs::write(dir.join(&artifact), contents).await {
        Ok(()) => LogOutcome::Written {
            task: task.to_string(),
            artifact,
        },
        Err(e) => {
            tracing::warn!("Failed to write logs for task {}: {}", task, e);
            LogOutcome::Failed {
                task: task.to_string(),
                reason: e.to_string(),
            }
        }
    }
}

struct TaskLogUnit {
    executor: Arc<dyn TaskExecutor>,
    alloc_id: String,
    task: String,
    deadline: Instant,
    token: CancellationToken,
}

impl TaskLogUnit {
    async fn run(self) -> UnitResult {
        let (stdout, stderr) = tokio::join!(
            self.read(LogStream::Stdout),
            self.read(LogStream::Stderr)
        );

        let contents = match (stdout, stderr) {
            (Err(e), Err(_)) => Err(e),
            (Err(e), Ok(stderr)) => {
                tracing::warn!("Failed to stream stdout for task {}: {}", self.task, e);
                Ok(merge_streams(Vec::new(), &stderr))
            }
            (Ok(stdout), Err(e)) => {
                tracing::warn!("Failed to stream stderr for task {}: {}", self.task, e);
                Ok(stdout)
            }
            (Ok(stdout), Ok(stderr)) => Ok(merge_streams(stdout, &stderr)),
        };
        (self.task, contents)
    }

    /// Read one stream until it ends, the deadline passes, or the token
    /// fires. A stream that breaks mid-way keeps what was read; one that
    /// breaks before yielding anything is an error.
    async fn read(&self, stream: LogStream) -> Result<Vec<u8>, ExecError> {
        let opened = tokio::select! {
            opened = self.executor.stream_logs(&self.alloc_id, &self.task, stream, true) => opened?,
            _ = self.token.cancelled() => return Ok(Vec::new()),
            _ = tokio::time::sleep_until(self.deadline) => return Ok(Vec::new()),
        };
        let mut logs = opened;

        let mut buf = Vec::new();
        loop {
            tokio::select! {
                chunk = logs.next() => match chunk {
                    Some(Ok(bytes)) => buf.extend_from_slice(&bytes),
                    Some(Err(e)) if buf.is_empty() => return Err(e),
                    Some(Err(e)) => {
                        tracing::warn!("Log {} for task {} broke off: {}", stream, self.task, e);
                        break;
                    }
                    None => break,
                },
                _ = self.token.cancelled() => break,
                _ = tokio::time::sleep_until(self.deadline) => break,
            }
        }
        Ok(buf)
    }
}

/// stdout followed by stderr under [`STDERR_SEPARATOR`], when stderr has data.
pub fn merge_streams(mut stdout: Vec<u8>, stderr: &[u8]) -> Vec<u8> {
    if !stderr.is_empty() {
        stdout.extend_from_slice(STDERR_SEPARATOR.as_bytes());
        stdout.extend_from_slice(stderr);
    }
    stdout
}

//! [`TaskExecutor`] backed by the Nomad CLI.
//!
//! Commands run through `nomad alloc exec` and logs are read through
//! `nomad alloc logs`. Connection settings (`NOMAD_ADDR`, `NOMAD_TOKEN`,
//! TLS variables) are inherited from the environment by the CLI itself.

use std::process::Stdio;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;

use crate::exec::{ExecError, ExecOutput, LogByteStream, LogStream, TaskExecutor};

/// Executes commands and streams logs by shelling out to `nomad`.
#[derive(Debug, Clone)]
pub struct NomadCliExecutor {
    bin: String,
    namespace: Option<String>,
}

impl NomadCliExecutor {
    /// Create an executor using the given `nomad` binary.
    pub fn new(bin: impl Into<String>, namespace: Option<String>) -> Self {
        Self {
            bin: bin.into(),
            namespace,
        }
    }

    fn namespace_args(&self) -> Vec<String> {
        match &self.namespace {
            Some(ns) => vec![format!("-namespace={}", ns)],
            None => Vec::new(),
        }
    }

    /// Arguments for `nomad alloc exec`.
    fn exec_args(&self, alloc_id: &str, task: &str, command: &[String]) -> Vec<String> {
        let mut args = vec!["alloc".to_string(), "exec".to_string()];
        args.extend(self.namespace_args());
        args.extend([
            "-i=false".to_string(),
            "-t=false".to_string(),
            "-task".to_string(),
            task.to_string(),
            alloc_id.to_string(),
        ]);
        args.extend(command.iter().cloned());
        args
    }

    /// Arguments for `nomad alloc logs`.
    fn logs_args(&self, alloc_id: &str, task: &str, stream: LogStream, follow: bool) -> Vec<String> {
        let mut args = vec!["alloc".to_string(), "logs".to_string()];
        args.extend(self.namespace_args());
        if stream == LogStream::Stderr {
            args.push("-stderr".to_string());
        }
        if follow {
            args.push("-f".to_string());
        }
        args.extend(["-task".to_string(), task.to_string(), alloc_id.to_string()]);
        args
    }
}

#[async_trait]
impl TaskExecutor for NomadCliExecutor {
    async fn execute(
        &self,
        alloc_id: &str,
        task: &str,
        command: &[String],
    ) -> Result<ExecOutput, ExecError> {
        let output = Command::new(&self.bin)
            .args(self.exec_args(alloc_id, task, command))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ExecError::Spawn {
                program: self.bin.clone(),
                reason: e.to_string(),
            })?;

        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    async fn stream_logs(
        &self,
        alloc_id: &str,
        task: &str,
        stream: LogStream,
        follow: bool,
    ) -> Result<LogByteStream, ExecError> {
        let mut child = Command::new(&self.bin)
            .args(self.logs_args(alloc_id, task, stream, follow))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecError::Spawn {
                program: self.bin.clone(),
                reason: e.to_string(),
            })?;

        let missing_pipe = |name: &str| ExecError::Stream {
            task: task.to_string(),
            reason: format!("log process has no {} pipe", name),
        };
        let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
        let mut stderr = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;

        let stderr_reader = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            buf
        });

        // The child travels with the reader so it is killed when the stream drops.
        let state = LogProcess {
            task: task.to_string(),
            reader: ReaderStream::new(stdout),
            child,
            stderr: stderr_reader,
        };
        let bytes = futures::stream::unfold(Some(state), |state| async move {
            let mut process = state?;
            match process.reader.next().await {
                Some(item) => Some((item.map_err(ExecError::Io), Some(process))),
                None => process.finish().await.map(|e| (Err(e), None)),
            }
        });

        Ok(bytes.boxed())
    }
}

/// A running `nomad alloc logs` process.
struct LogProcess {
    task: String,
    reader: ReaderStream<ChildStdout>,
    child: Child,
    stderr: JoinHandle<Vec<u8>>,
}

impl LogProcess {
    /// Reap the process once stdout is exhausted. A non-zero exit becomes
    /// the stream's final error, carrying whatever the CLI wrote to stderr.
    async fn finish(mut self) -> Option<ExecError> {
        let status = match self.child.wait().await {
            Ok(status) => status,
            Err(e) => return Some(ExecError::Io(e)),
        };
        if status.success() {
            return None;
        }

        let stderr = self.stderr.await.unwrap_or_default();
        let stderr = String::from_utf8_lossy(&stderr).trim().to_string();
        let reason = if stderr.is_empty() {
            format!("log process exited with {}", status)
        } else {
            stderr
        };
        Some(ExecError::Stream {
            task: self.task,
            reason,
        })
    }
}

//! Scripted stand-ins for the execution capability and the direct transport.
//!
//! Provides:
//! - [`StubExecutor`]: a [`TaskExecutor`] driven by `(task, needle) -> reply` rules
//! - [`StubTransport`]: a [`DirectTransport`] with attempt counters
//!
//! # Usage
//!
//! ```rust,no_run
//! use xdsnap::testing::{StubExecutor, StubReply, StubTransport};
//!
//! let exec = StubExecutor::new()
//!     .respond("web", "curl", StubReply::ok(r#"{"ok":true}"#));
//! let direct = StubTransport::failing();
//! ```

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;

use crate::admin::{AdminError, DirectTransport};
use crate::exec::{ExecError, ExecOutput, LogByteStream, LogStream, TaskExecutor};

/// What a stubbed command returns.
#[derive(Debug, Clone)]
pub struct StubReply {
    exit_code: i32,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    transport_error: Option<String>,
}

impl StubReply {
    /// Exit zero with the given stdout.
    pub fn ok(stdout: impl AsRef<[u8]>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.as_ref().to_vec(),
            stderr: Vec::new(),
            transport_error: None,
        }
    }

    /// Exit with `code` and the given stderr.
    pub fn exit(code: i32, stderr: impl AsRef<[u8]>) -> Self {
        Self {
            exit_code: code,
            stdout: Vec::new(),
            stderr: stderr.as_ref().to_vec(),
            transport_error: None,
        }
    }

    /// The exec call itself fails.
    pub fn transport_error(reason: impl Into<String>) -> Self {
        Self {
            exit_code: -1,
            stdout: Vec::new(),
            stderr: Vec::new(),
            transport_error: Some(reason.into()),
        }
    }

    fn not_found(program: &str) -> Self {
        Self::exit(127, format!("{}: not found\n", program))
    }
}

/// A command recorded by [`StubExecutor`].
#[derive(Debug, Clone)]
pub struct StubCall {
    pub task: String,
    pub command: Vec<String>,
}

#[derive(Debug, Clone)]
enum StubLogs {
    /// Emit the chunks, then end.
    Chunks(Vec<Vec<u8>>),
    /// Emit the chunks, then stay open until dropped.
    Endless(Vec<Vec<u8>>),
    /// Fail to open.
    Fail(String),
    /// Open, then fail before yielding anything.
    Broken(String),
}

/// A scripted [`TaskExecutor`].
///
/// Rules are checked in insertion order. A rule `(task, needle)` matches a
/// command run in `task` when the program is `needle` or the joined command
/// contains `needle`. Unmatched commands exit 127 with `<program>: not found`,
/// which is what a missing binary looks like through `nomad alloc exec`.
#[derive(Default)]
pub struct StubExecutor {
    rules: Vec<(String, String, StubReply)>,
    logs: HashMap<(String, LogStream), StubLogs>,
    calls: Mutex<Vec<StubCall>>,
}

impl StubExecutor {
    /// Create an executor on which nothing is installed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a reply rule.
    pub fn respond(
        mut self,
        task: impl Into<String>,
        needle: impl Into<String>,
        reply: StubReply,
    ) -> Self {
        self.rules.push((task.into(), needle.into(), reply));
        self
    }

    /// Serve `data` on the given log stream, then end.
    pub fn with_logs(
        mut self,
        task: impl Into<String>,
        stream: LogStream,
        data: impl AsRef<[u8]>,
    ) -> Self {
        self.logs.insert(
            (task.into(), stream),
            StubLogs::Chunks(vec![data.as_ref().to_vec()]),
        );
        self
    }

    /// Serve `data` on the given log stream and never end on its own.
    pub fn with_endless_logs(
        mut self,
        task: impl Into<String>,
        stream: LogStream,
        data: impl AsRef<[u8]>,
    ) -> Self {
        self.logs.insert(
            (task.into(), stream),
            StubLogs::Endless(vec![data.as_ref().to_vec()]),
        );
        self
    }

    /// Make opening the given log stream fail.
    pub fn with_failing_logs(mut self, task: impl Into<String>, stream: LogStream) -> Self {
        self.logs.insert(
            (task.into(), stream),
            StubLogs::Fail("log endpoint unavailable".to_string()),
        );
        self
    }

    /// Open the given log stream, then end it with an error, as a log
    /// process that exits non-zero does.
    pub fn with_broken_logs(mut self, task: impl Into<String>, stream: LogStream) -> Self {
        self.logs.insert(
            (task.into(), stream),
            StubLogs::Broken("allocation not found".to_string()),
        );
        self
    }

    /// Every command executed so far, in order.
    pub fn calls(&self) -> Vec<StubCall> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn reply_for(&self, task: &str, command: &[String]) -> StubReply {
        let program = command.first().map(String::as_str).unwrap_or("");
        let joined = command.join(" ");
        self.rules
            .iter()
            .find(|(t, needle, _)| t == task && (program == needle || joined.contains(needle.as_str())))
            .map(|(_, _, reply)| reply.clone())
            .unwrap_or_else(|| StubReply::not_found(program))
    }
}

#[async_trait]
impl TaskExecutor for StubExecutor {
    async fn execute(
        &self,
        _alloc_id: &str,
        task: &str,
        command: &[String],
    ) -> Result<ExecOutput, ExecError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(StubCall {
                task: task.to_string(),
                command: command.to_vec(),
            });

        let reply = self.reply_for(task, command);
        if let Some(reason) = reply.transport_error {
            return Err(ExecError::Stream {
                task: task.to_string(),
                reason,
            });
        }
        Ok(ExecOutput {
            exit_code: reply.exit_code,
            stdout: reply.stdout,
            stderr: reply.stderr,
        })
    }

    async fn stream_logs(
        &self,
        _alloc_id: &str,
        task: &str,
        stream: LogStream,
        _follow: bool,
    ) -> Result<LogByteStream, ExecError> {
        let chunks = |data: &[Vec<u8>]| {
            futures::stream::iter(
                data.iter()
                    .map(|c| Ok::<_, ExecError>(Bytes::from(c.clone())))
                    .collect::<Vec<_>>(),
            )
        };

        match self.logs.get(&(task.to_string(), stream)) {
            None => Ok(futures::stream::empty().boxed()),
            Some(StubLogs::Chunks(data)) => Ok(chunks(data).boxed()),
            Some(StubLogs::Endless(data)) => {
                Ok(chunks(data).chain(futures::stream::pending()).boxed())
            }
            Some(StubLogs::Fail(reason)) => Err(ExecError::Stream {
                task: task.to_string(),
                reason: reason.clone(),
            }),
            Some(StubLogs::Broken(reason)) => {
                let err = ExecError::Stream {
                    task: task.to_string(),
                    reason: reason.clone(),
                };
                Ok(futures::stream::iter([Err::<Bytes, _>(err)]).boxed())
            }
        }
    }
}

/// A scripted [`DirectTransport`].
pub struct StubTransport {
    body: Option<Vec<u8>>,
    get_attempts: AtomicU32,
    post_attempts: AtomicU32,
    posted: Mutex<Vec<String>>,
}

impl StubTransport {
    /// Every request fails as if the IP were unreachable.
    pub fn failing() -> Self {
        Self {
            body: None,
            get_attempts: AtomicU32::new(0),
            post_attempts: AtomicU32::new(0),
            posted: Mutex::new(Vec::new()),
        }
    }

    /// Every GET returns `body`; every POST succeeds.
    pub fn with_body(body: impl AsRef<[u8]>) -> Self {
        Self {
            body: Some(body.as_ref().to_vec()),
            ..Self::failing()
        }
    }

    /// Number of GETs attempted.
    pub fn get_attempts(&self) -> u32 {
        self.get_attempts.load(Ordering::Relaxed)
    }

    /// Number of POSTs attempted.
    pub fn post_attempts(&self) -> u32 {
        self.post_attempts.load(Ordering::Relaxed)
    }

    /// Paths POSTed to, in order (including failed attempts).
    pub fn posted_paths(&self) -> Vec<String> {
        self.posted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn unreachable(ip: &str, port: u16, path: &str) -> AdminError {
        AdminError::Request {
            url: format!("http://{}:{}{}", ip, port, path),
            reason: "connection refused".to_string(),
        }
    }
}

#[async_trait]
impl DirectTransport for StubTransport {
    async fn get(&self, ip: &str, port: u16, path: &str) -> Result<Vec<u8>, AdminError> {
        self.get_attempts.fetch_add(1, Ordering::Relaxed);
        match &self.body {
            Some(body) => Ok(body.clone()),
            None => Err(Self::unreachable(ip, port, path)),
        }
    }

    async fn post(&self, ip: &str, port: u16, path: &str) -> Result<(), AdminError> {
        self.post_attempts.fetch_add(1, Ordering::Relaxed);
        self.posted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(path.to_string());
        match &self.body {
            Some(_) => Ok(()),
            None => Err(Self::unreachable(ip, port, path)),
        }
    }
}

//! GET/POST against the admin interface with direct-then-exec fallback.

use std::time::Duration;

use crate::admin::command::{build_get, build_post};
use crate::admin::decode::{decode_raw_response, status_code};
use crate::admin::direct::DirectTransport;
use crate::admin::error::{AdminError, ResolveError, Result};
use crate::admin::strategy::{ExecStrategy, resolve_exec_strategy};
use crate::exec::{ExecOutput, TaskExecutor, execute_with_deadline};

/// Tunables for admin access.
#[derive(Debug, Clone)]
pub struct AdminSettings {
    /// Admin port on the namespace-local address, used by exec commands.
    pub exec_port: u16,
    /// Admin port reachable at the allocation IP.
    pub direct_port: u16,
    /// Attempts on the direct path per GET.
    pub direct_attempts: u32,
    /// Fixed delay between direct attempts.
    pub retry_delay: Duration,
    /// Deadline for each exec call, probes included.
    pub exec_timeout: Duration,
}

impl Default for AdminSettings {
    fn default() -> Self {
        Self {
            exec_port: 19001,
            direct_port: 19000,
            direct_attempts: 3,
            retry_delay: Duration::from_secs(2),
            exec_timeout: Duration::from_secs(60),
        }
    }
}

/// Envoy log levels the capture toggles between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Trace,
    Info,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
            LogLevel::Info => "info",
        }
    }

    /// Admin path that sets this level.
    pub fn logging_path(&self) -> String {
        format!("/logging?level={}", self.as_str())
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

enum StrategySlot {
    Unresolved,
    Resolved(ExecStrategy),
    Failed(ResolveError),
}

/// Admin access for one allocation during one capture call.
///
/// Owns the exec strategy for the call: it is resolved lazily the first time
/// exec access is needed and dropped with the session. A resolution failure
/// is remembered too, so later requests fail fast instead of re-probing.
pub struct AdminSession<'a> {
    executor: &'a dyn TaskExecutor,
    direct: &'a dyn DirectTransport,
    settings: &'a AdminSettings,
    alloc_id: &'a str,
    alloc_ip: Option<&'a str>,
    task_order: Vec<String>,
    strategy: StrategySlot,
    direct_down: bool,
}

impl<'a> AdminSession<'a> {
    /// Create a session. `task_order` is the probe order for exec access.
    pub fn new(
        executor: &'a dyn TaskExecutor,
        direct: &'a dyn DirectTransport,
        settings: &'a AdminSettings,
        alloc_id: &'a str,
        alloc_ip: Option<&'a str>,
        task_order: Vec<String>,
    ) -> Self {
        Self {
            executor,
            direct,
            settings,
            alloc_id,
            alloc_ip: alloc_ip.filter(|ip| !ip.is_empty()),
            task_order,
            strategy: StrategySlot::Unresolved,
            direct_down: false,
        }
    }

    /// The exec strategy, if one has been resolved during this session.
    pub fn strategy(&self) -> Option<&ExecStrategy> {
        match &self.strategy {
            StrategySlot::Resolved(s) => Some(s),
            _ => None,
        }
    }

    /// GET `path`, trying the direct path first and exec second.
    ///
    /// A non-empty body is the only success. Once the direct path has used up
    /// all of its attempts for one GET, later GETs in this session skip it.
    pub async fn get(&mut self, path: &str) -> Result<Vec<u8>> {
        if let Some(ip) = self.alloc_ip
            && !self.direct_down
        {
            let attempts = self.settings.direct_attempts.max(1);
            for attempt in 1..=attempts {
                match self.direct.get(ip, self.settings.direct_port, path).await {
                    Ok(body) if !body.is_empty() => return Ok(body),
                    Ok(_) => {
                        tracing::debug!("Direct GET {} attempt {} returned no data", path, attempt)
                    }
                    Err(e) => tracing::debug!("Direct GET {} attempt {} failed: {}", path, attempt, e),
                }
                if attempt < attempts {
                    tokio::time::sleep(self.settings.retry_delay).await;
                }
            }
            tracing::warn!("Direct HTTP failed for {}, falling back to exec", path);
            self.direct_down = true;
        }

        self.exec_get(path).await
    }

    /// POST to `path` with no body. One attempt per path; no retries.
    pub async fn post(&mut self, path: &str) -> Result<()> {
        if let Some(ip) = self.alloc_ip
            && !self.direct_down
        {
            match self.direct.post(ip, self.settings.direct_port, path).await {
                Ok(()) => return Ok(()),
                Err(e) => tracing::warn!("Direct HTTP failed, falling back to exec: {}", e),
            }
        }

        self.exec_post(path).await
    }

    /// Set the proxy's log level. Failures are logged, never returned.
    pub async fn set_log_level(&mut self, level: LogLevel) -> bool {
        match self.post(&level.logging_path()).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Failed to set Envoy log level to '{}': {}", level, e);
                false
            }
        }
    }

    async fn resolved_strategy(&mut self) -> Result<ExecStrategy> {
        match &self.strategy {
            StrategySlot::Resolved(s) => return Ok(s.clone()),
            StrategySlot::Failed(e) => return Err(e.clone().into()),
            StrategySlot::Unresolved => {}
        }

        match resolve_exec_strategy(
            self.executor,
            self.alloc_id,
            &self.task_order,
            self.settings.exec_timeout,
        )
        .await
        {
            Ok(strategy) => {
                self.strategy = StrategySlot::Resolved(strategy.clone());
                Ok(strategy)
            }
            Err(e) => {
                self.strategy = StrategySlot::Failed(e.clone());
                Err(e.into())
            }
        }
    }

    async fn run(&self, strategy: &ExecStrategy, command: &[String]) -> Result<ExecOutput> {
        let output = execute_with_deadline(
            self.executor,
            self.alloc_id,
            &strategy.task,
            command,
            self.settings.exec_timeout,
        )
        .await
        .map_err(|source| AdminError::Exec {
            task: strategy.task.clone(),
            source,
        })?;

        if !output.success() {
            return Err(AdminError::NonZeroExit {
                task: strategy.task.clone(),
                tool: strategy.tool,
                code: output.exit_code,
                stderr: output.stderr_text(),
            });
        }
        Ok(output)
    }

    fn check_raw_status(path: &str, raw: &[u8]) -> Result<()> {
        match status_code(raw) {
            Some(status) if !(200..300).contains(&status) => Err(AdminError::Status {
                path: path.to_string(),
                status,
                body: String::from_utf8_lossy(&decode_raw_response(raw)).to_string(),
            }),
            _ => Ok(()),
        }
    }

    async fn exec_get(&mut self, path: &str) -> Result<Vec<u8>> {
        let strategy = self.resolved_strategy().await?;
        let command = build_get(strategy.tool, self.settings.exec_port, path);
        let output = self.run(&strategy, &command).await?;

        let body = if strategy.tool.returns_raw_http() {
            Self::check_raw_status(path, &output.stdout)?;
            decode_raw_response(&output.stdout)
        } else {
            output.stdout
        };

        if body.is_empty() {
            return Err(AdminError::EmptyBody {
                path: path.to_string(),
            });
        }
        Ok(body)
    }

    async fn exec_post(&mut self, path: &str) -> Result<()> {
        let strategy = self.resolved_strategy().await?;
        let command = build_post(strategy.tool, self.settings.exec_port, path);
        let output = self.run(&strategy, &command).await?;

        if strategy.tool.returns_raw_http() {
            Self::check_raw_status(path, &output.stdout)?;
        }
        Ok(())
    }
}

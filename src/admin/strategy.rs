//! Choose the (task, tool) pair used for exec-based admin access.

use std::time::Duration;

use crate::admin::error::ResolveError;
use crate::admin::probe::probe_task;
use crate::admin::tool::HttpTool;
use crate::exec::TaskExecutor;

/// The task and tool used for exec-based admin requests.
///
/// Resolved at most once per capture and never reused across captures:
/// container images can change between cycles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecStrategy {
    /// Task the tool runs in.
    pub task: String,
    /// Tool used to talk to the admin interface.
    pub tool: HttpTool,
}

impl std::fmt::Display for ExecStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} in task '{}'", self.tool, self.task)
    }
}

/// First eight characters of an allocation id, as shown by Nomad.
pub fn short_alloc_id(alloc_id: &str) -> &str {
    match alloc_id.char_indices().nth(8) {
        Some((idx, _)) => &alloc_id[..idx],
        None => alloc_id,
    }
}

/// Order in which tasks are probed: sidecar first, then the primary task,
/// then any extras. Blank names and duplicates are dropped.
///
/// Only tasks in the sidecar's network namespace can reach the admin
/// listener, so callers should pass siblings from the same allocation.
pub fn build_task_order(sidecar: &str, primary: &str, extras: &[String]) -> Vec<String> {
    let mut order: Vec<String> = Vec::new();
    let candidates = [sidecar, primary]
        .into_iter()
        .chain(extras.iter().map(String::as_str));
    for task in candidates {
        if !task.is_empty() && !order.iter().any(|t| t == task) {
            order.push(task.to_string());
        }
    }
    order
}

/// Probe `task_order` front to back and commit to the first capable task.
///
/// Task order dominates tool preference: a sidecar with only bash wins over
/// a sibling with curl.
pub async fn resolve_exec_strategy(
    executor: &dyn TaskExecutor,
    alloc_id: &str,
    task_order: &[String],
    probe_timeout: Duration,
) -> Result<ExecStrategy, ResolveError> {
    let mut tried = Vec::new();

    for (idx, task) in task_order.iter().enumerate() {
        tracing::info!("Probing task '{}' for HTTP capabilities...", task);
        if let Some(tool) = probe_task(executor, alloc_id, task, probe_timeout).await {
            if idx == 0 {
                tracing::info!("Using {} in task '{}' for Envoy admin access", tool, task);
            } else {
                tracing::info!(
                    "Using {} in sibling task '{}' for Envoy admin access (shared network namespace)",
                    tool,
                    task
                );
            }
            return Ok(ExecStrategy {
                task: task.clone(),
                tool,
            });
        }
        tracing::info!("  no tools found in task '{}'", task);
        tried.push(task.clone());
    }

    Err(ResolveError::NoCapableTask {
        alloc_id: short_alloc_id(alloc_id).to_string(),
        tried,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{StubExecutor, StubReply};
    use pretty_assertions::assert_eq;

    const ALLOC: &str = "abcdef12-3456-7890-abcd-ef1234567890";
    const TIMEOUT: Duration = Duration::from_secs(5);

    fn tasks(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_short_alloc_id() {
        assert_eq!(short_alloc_id(ALLOC), "abcdef12");
        assert_eq!(short_alloc_id("abc"), "abc");
        assert_eq!(short_alloc_id(""), "");
    }

    #[test]
    fn test_task_order_sidecar_first() {
        assert_eq!(
            build_task_order("connect-proxy-web", "web", &[]),
            tasks(&["connect-proxy-web", "web"])
        );
    }

    #[test]
    fn test_task_order_dedups_extras() {
        assert_eq!(
            build_task_order("connect-proxy-web", "web", &tasks(&["connect-proxy-web"])),
            tasks(&["connect-proxy-web", "web"])
        );
        assert_eq!(
            build_task_order("connect-proxy-web", "web", &tasks(&["web", "redis"])),
            tasks(&["connect-proxy-web", "web", "redis"])
        );
    }

    #[test]
    fn test_task_order_sidecar_same_as_primary() {
        assert_eq!(
            build_task_order("connect-proxy-web", "connect-proxy-web", &[]),
            tasks(&["connect-proxy-web"])
        );
    }

    #[test]
    fn test_task_order_blank_names() {
        assert_eq!(
            build_task_order("", "web", &tasks(&["redis"])),
            tasks(&["web", "redis"])
        );
        assert_eq!(
            build_task_order("connect-proxy-web", "", &tasks(&["web"])),
            tasks(&["connect-proxy-web", "web"])
        );
        assert!(build_task_order("", "", &tasks(&["", ""])).is_empty());
    }

    #[test]
    fn test_task_order_keeps_all_unique() {
        assert_eq!(
            build_task_order("connect-proxy-web", "web", &tasks(&["redis", "postgres"])),
            tasks(&["connect-proxy-web", "web", "redis", "postgres"])
        );
    }

    #[tokio::test]
    async fn test_sidecar_has_bash() {
        let exec = StubExecutor::new().respond("connect-proxy-web", "bash", StubReply::ok("ok\n"));
        let strategy = resolve_exec_strategy(
            &exec,
            ALLOC,
            &tasks(&["connect-proxy-web", "web"]),
            TIMEOUT,
        )
        .await
        .unwrap();
        assert_eq!(strategy.task, "connect-proxy-web");
        assert_eq!(strategy.tool, HttpTool::BashTcp);
    }

    #[tokio::test]
    async fn test_sidecar_distroless_sibling_has_curl() {
        let exec = StubExecutor::new().respond("web", "curl", StubReply::ok("curl 7.68.0"));
        let strategy = resolve_exec_strategy(
            &exec,
            ALLOC,
            &tasks(&["connect-proxy-web", "web"]),
            TIMEOUT,
        )
        .await
        .unwrap();
        assert_eq!(
            strategy,
            ExecStrategy {
                task: "web".to_string(),
                tool: HttpTool::Curl,
            }
        );
    }

    #[tokio::test]
    async fn test_first_task_wins_over_stronger_tool_later() {
        let exec = StubExecutor::new()
            .respond("connect-proxy-web", "bash", StubReply::ok("ok\n"))
            .respond("web", "curl", StubReply::ok("curl 7.68.0"));
        let strategy = resolve_exec_strategy(
            &exec,
            ALLOC,
            &tasks(&["connect-proxy-web", "web"]),
            TIMEOUT,
        )
        .await
        .unwrap();
        assert_eq!(strategy.task, "connect-proxy-web");
        assert_eq!(strategy.tool, HttpTool::BashTcp);
        // The sibling was never probed.
        assert!(exec.calls().iter().all(|c| c.task == "connect-proxy-web"));
    }

    #[tokio::test]
    async fn test_middle_task_works() {
        let exec = StubExecutor::new().respond("web", "wget", StubReply::ok("GNU Wget"));
        let strategy = resolve_exec_strategy(
            &exec,
            ALLOC,
            &tasks(&["connect-proxy-web", "web", "redis"]),
            TIMEOUT,
        )
        .await
        .unwrap();
        assert_eq!(strategy.task, "web");
        assert_eq!(strategy.tool, HttpTool::Wget);
    }

    #[tokio::test]
    async fn test_all_tasks_distroless() {
        let exec = StubExecutor::new();
        let err = resolve_exec_strategy(
            &exec,
            ALLOC,
            &tasks(&["connect-proxy-web", "web", "redis"]),
            TIMEOUT,
        )
        .await
        .unwrap_err();

        let ResolveError::NoCapableTask { alloc_id, tried } = &err;
        assert_eq!(alloc_id, "abcdef12");
        assert_eq!(tried, &tasks(&["connect-proxy-web", "web", "redis"]));
        assert!(err.to_string().contains("no HTTP tool found"));
    }

    #[tokio::test]
    async fn test_empty_task_order_fails() {
        let exec = StubExecutor::new();
        let err = resolve_exec_strategy(&exec, ALLOC, &[], TIMEOUT)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no HTTP tool found"));
    }
}

//! Detect which HTTP tool, if any, is usable inside a task.

use std::time::Duration;

use crate::admin::tool::HttpTool;
use crate::exec::{TaskExecutor, execute_with_deadline};

/// Availability checks, in preference order.
///
/// Each entry is a cheap command that exits zero only when the tool can run.
/// The bash entry checks for a shell, since `/dev/tcp` is a bash builtin.
pub const PROBE_TABLE: &[(HttpTool, &[&str])] = &[
    (HttpTool::Curl, &["curl", "--version"]),
    (HttpTool::Wget, &["wget", "--version"]),
    (HttpTool::Python3, &["python3", "--version"]),
    (HttpTool::Node, &["node", "--version"]),
    (HttpTool::BashTcp, &["bash", "-c", "echo ok"]),
];

/// Return the most preferred tool usable in `task`, or `None`.
///
/// A candidate counts as usable only when its check both runs and exits
/// zero. Missing tools, non-zero exits and transport errors just move on to
/// the next candidate.
pub async fn probe_task(
    executor: &dyn TaskExecutor,
    alloc_id: &str,
    task: &str,
    timeout: Duration,
) -> Option<HttpTool> {
    for (tool, check) in PROBE_TABLE {
        let command: Vec<String> = check.iter().map(|s| s.to_string()).collect();
        match execute_with_deadline(executor, alloc_id, task, &command, timeout).await {
            Ok(output) if output.success() => {
                tracing::debug!("Task '{}' has {}", task, tool);
                return Some(*tool);
            }
            Ok(output) => {
                tracing::trace!(
                    "{} unavailable in task '{}' (exit {})",
                    tool,
                    task,
                    output.exit_code
                );
            }
            Err(e) => {
                tracing::trace!("{} probe failed in task '{}': {}", tool, task, e);
            }
        }
    }
    None
}

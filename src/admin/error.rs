//! Error types for admin interface access.

use thiserror::Error;

use crate::admin::tool::HttpTool;
use crate::exec::ExecError;

/// Result type for admin operations.
pub type Result<T> = std::result::Result<T, AdminError>;

/// No task in the allocation can reach the admin interface.
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    /// Every task was probed and none had a usable HTTP tool.
    #[error(
        "no HTTP tool found in any task for allocation {alloc_id}\n  Tried: {}\n  Hint: ensure curl, wget, python3, node, or bash is available in at least one task",
        .tried.join(", ")
    )]
    NoCapableTask {
        /// Short allocation id.
        alloc_id: String,
        /// Tasks probed, in order.
        tried: Vec<String>,
    },
}

/// A single admin request failed.
///
/// All variants are recoverable at the capture level: the request is retried
/// or falls back to exec, and once exhausted the artifact is skipped.
#[derive(Debug, Error)]
pub enum AdminError {
    /// Network-level failure on the direct path.
    #[error("Request to {url} failed: {reason}")]
    Request {
        /// URL requested.
        url: String,
        /// Reason for failure.
        reason: String,
    },

    /// The admin interface answered with a non-success status.
    #[error("{path} returned HTTP {status}: {body}")]
    Status {
        /// Admin path.
        path: String,
        /// HTTP status code.
        status: u16,
        /// Response body (lossy).
        body: String,
    },

    /// The response carried no data.
    #[error("{path} returned an empty body")]
    EmptyBody {
        /// Admin path.
        path: String,
    },

    /// The in-container tool ran but exited non-zero.
    #[error("{tool} in task '{task}' exited with {code}: {stderr}")]
    NonZeroExit {
        /// Task the tool ran in.
        task: String,
        /// Tool used.
        tool: HttpTool,
        /// Exit code.
        code: i32,
        /// Trimmed stderr.
        stderr: String,
    },

    /// The exec call itself failed.
    #[error("Exec in task '{task}' failed: {source}")]
    Exec {
        /// Task targeted.
        task: String,
        /// Underlying exec error.
        #[source]
        source: ExecError,
    },

    /// No exec strategy could be resolved for this capture.
    #[error(transparent)]
    Resolution(#[from] ResolveError),
}

//! Error types for snapshot capture.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::exec::ExecError;

/// Infrastructure failures that prevent any snapshot from being produced.
///
/// Per-artifact problems never show up here; they are logged and recorded
/// in the snapshot manifest instead.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The private working directory could not be created.
    #[error("Failed to create working directory: {reason}")]
    WorkDir {
        /// Reason for failure.
        reason: String,
    },

    /// The output directory could not be created.
    #[error("Failed to create output directory {}: {reason}", .path.display())]
    OutputDir {
        /// Requested output directory.
        path: PathBuf,
        /// Reason for failure.
        reason: String,
    },

    /// The final archive could not be written.
    #[error("Failed to write archive {}: {reason}", .path.display())]
    Archive {
        /// Archive path.
        path: PathBuf,
        /// Reason for failure.
        reason: String,
    },
}

/// Packet capture inside the sidecar task failed.
#[derive(Debug, Error)]
pub enum PacketCaptureError {
    /// tcpdump is not installed in the task.
    #[error("tcpdump not available in task '{task}'")]
    Unavailable {
        /// Task probed.
        task: String,
    },

    /// tcpdump ran but the pipeline exited non-zero.
    #[error("tcpdump exited with {code}: {stderr}")]
    Failed {
        /// Exit code.
        code: i32,
        /// Trimmed stderr.
        stderr: String,
    },

    /// The exec call itself failed.
    #[error("Exec failed: {0}")]
    Exec(#[from] ExecError),

    /// The base64 transport encoding did not decode.
    #[error("Failed to decode capture: {0}")]
    Decode(#[from] base64::DecodeError),

    /// The capture produced no packets.
    #[error("Capture produced no data")]
    Empty,
}

/// Invalid repeated-capture settings.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// Interval below the allowed minimum.
    #[error("Interval {interval:?} is below the minimum of {minimum:?}")]
    IntervalTooShort {
        /// Requested interval.
        interval: Duration,
        /// Minimum allowed interval.
        minimum: Duration,
    },

    /// The cycle directory could not be created.
    #[error("Failed to create snapshot directory {}: {reason}", .path.display())]
    SnapshotDir {
        /// Directory path.
        path: PathBuf,
        /// Reason for failure.
        reason: String,
    },
}

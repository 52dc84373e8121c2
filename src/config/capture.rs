use std::path::PathBuf;
use std::time::Duration;

use crate::config::helpers::{optional_env, parse_optional_env};
use crate::error::ConfigError;

/// Timing of log streaming and scratch space for a capture.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Parent of per-capture working directories (system temp dir if unset).
    pub work_root: Option<PathBuf>,
    /// Seconds added to the capture duration before log streams stop.
    pub log_grace_secs: u64,
    /// Milliseconds log streams get to stop once cancelled.
    pub cancel_grace_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            work_root: None,
            log_grace_secs: 10,
            cancel_grace_ms: 1000,
        }
    }
}

impl CaptureConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            work_root: optional_env("XDSNAP_WORK_DIR")?.map(PathBuf::from),
            log_grace_secs: parse_optional_env("XDSNAP_LOG_GRACE_SECS", defaults.log_grace_secs)?,
            cancel_grace_ms: parse_optional_env(
                "XDSNAP_CANCEL_GRACE_MS",
                defaults.cancel_grace_ms,
            )?,
        })
    }

    pub fn log_grace(&self) -> Duration {
        Duration::from_secs(self.log_grace_secs)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }
}

use std::time::Duration;

use crate::admin::AdminSettings;
use crate::config::helpers::{parse_optional_env, parse_positive_env};
use crate::error::ConfigError;

/// Envoy admin access configuration.
///
/// Ports and retry behaviour for reaching the proxy's admin interface,
/// either directly at the allocation IP or through exec.
#[derive(Debug, Clone)]
pub struct AdminConfig {
    /// Admin port on the namespace-local address (used by exec commands).
    pub admin_port: u16,
    /// Admin port reachable at the allocation IP.
    pub direct_port: u16,
    /// Timeout in seconds for one direct HTTP request.
    pub direct_timeout_secs: u64,
    /// Direct attempts per GET before falling back to exec.
    pub direct_attempts: u32,
    /// Delay in milliseconds between direct attempts.
    pub retry_delay_ms: u64,
    /// Timeout in seconds for one exec call.
    pub exec_timeout_secs: u64,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            admin_port: 19001,
            direct_port: 19000,
            direct_timeout_secs: 10,
            direct_attempts: 3,
            retry_delay_ms: 2000,
            exec_timeout_secs: 60,
        }
    }
}

impl AdminConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let direct_attempts = parse_positive_env(
            "XDSNAP_DIRECT_ATTEMPTS",
            u64::from(defaults.direct_attempts),
        )?;

        Ok(Self {
            admin_port: parse_optional_env("XDSNAP_ADMIN_PORT", defaults.admin_port)?,
            direct_port: parse_optional_env("XDSNAP_DIRECT_PORT", defaults.direct_port)?,
            direct_timeout_secs: parse_positive_env(
                "XDSNAP_DIRECT_TIMEOUT_SECS",
                defaults.direct_timeout_secs,
            )?,
            direct_attempts: u32::try_from(direct_attempts).map_err(|e| {
                ConfigError::InvalidValue {
                    key: "XDSNAP_DIRECT_ATTEMPTS".to_string(),
                    message: e.to_string(),
                }
            })?,
            retry_delay_ms: parse_optional_env("XDSNAP_RETRY_DELAY_MS", defaults.retry_delay_ms)?,
            exec_timeout_secs: parse_positive_env(
                "XDSNAP_EXEC_TIMEOUT_SECS",
                defaults.exec_timeout_secs,
            )?,
        })
    }

    /// Timeout for one direct HTTP request.
    pub fn direct_timeout(&self) -> Duration {
        Duration::from_secs(self.direct_timeout_secs)
    }

    /// Settings consumed by [`crate::admin::AdminSession`].
    pub fn to_settings(&self) -> AdminSettings {
        AdminSettings {
            exec_port: self.admin_port,
            direct_port: self.direct_port,
            direct_attempts: self.direct_attempts,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            exec_timeout: Duration::from_secs(self.exec_timeout_secs),
        }
    }
}

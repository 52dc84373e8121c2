//! Configuration for xdsnap.
//!
//! Settings are loaded with priority: env var > default. `main` loads a
//! `.env` file first, so values placed there behave like env vars.

mod admin;
mod capture;
pub(crate) mod helpers;
mod nomad;

pub use self::admin::AdminConfig;
pub use self::capture::CaptureConfig;
pub use self::nomad::NomadConfig;

use crate::error::ConfigError;

/// Main configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub admin: AdminConfig,
    pub nomad: NomadConfig,
    pub capture: CaptureConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            admin: AdminConfig::resolve()?,
            nomad: NomadConfig::resolve()?,
            capture: CaptureConfig::resolve()?,
        })
    }
}

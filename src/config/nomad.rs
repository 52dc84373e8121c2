use crate::config::helpers::optional_env;
use crate::error::ConfigError;

/// How to reach the Nomad CLI.
///
/// `NOMAD_ADDR`, `NOMAD_TOKEN` and the TLS variables are read by the CLI
/// itself and are passed through untouched.
#[derive(Debug, Clone)]
pub struct NomadConfig {
    /// Path or name of the `nomad` binary.
    pub bin: String,
    /// Namespace passed with `-namespace`, if any.
    pub namespace: Option<String>,
}

impl Default for NomadConfig {
    fn default() -> Self {
        Self {
            bin: "nomad".to_string(),
            namespace: None,
        }
    }
}

impl NomadConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            bin: optional_env("NOMAD_BIN")?.unwrap_or(defaults.bin),
            namespace: optional_env("NOMAD_NAMESPACE")?,
        })
    }
}

//! Configuration types module

pub mod sandbox;

use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Sandbox engine configuration
    #[serde(default)]
    pub sandbox: sandbox::SandboxConfig,
}

impl Config {
    /// Load configuration from the config file and environment variables
    ///
    /// Layering:
    /// 1. Default values
    /// 2. Config file (if present)
    /// 3. Environment variable overrides
    pub fn from_env() -> crate::error::Result<Self> {
        crate::config::load_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.sandbox.guest_mount_path, "/app");
        assert_eq!(config.sandbox.timeout_secs, Some(60));
    }

    #[test]
    fn test_partial_document_uses_defaults() {
        let config: Config = json5::from_str("{ sandbox: { default_fuel: 5000 } }").unwrap();
        assert_eq!(config.sandbox.default_fuel, 5000);
        assert_eq!(config.sandbox.stdout_max_bytes, 2 * 1024 * 1024);
    }
}

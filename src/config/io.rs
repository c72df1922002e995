//! Configuration I/O - Loading and saving configuration
//!
//! Handles reading configuration from files and environment variables.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::warn;

use super::types::Config;
use crate::error::{Error, Result};

/// Load configuration with layered precedence:
/// 1. Config file (config.json or config.toml) if it exists, otherwise defaults
/// 2. Environment variable overrides (includes .env)
pub fn load_config() -> Result<Config> {
    let config_path = super::paths::config_path();

    let mut config = if config_path.exists() {
        load_config_from_path(&config_path)?
    } else {
        Config::default()
    };

    // Apply environment variable overrides (highest precedence)
    apply_env_overrides(&mut config);

    Ok(config)
}

/// Load configuration from a specific path
pub fn load_config_from_path(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;

    // Detect format by extension
    let config: Config = if path.extension().is_some_and(|ext| ext == "json") {
        // Parse as JSON5 (more lenient than strict JSON)
        json5::from_str(&content).map_err(|e| Error::Config(format!("Invalid JSON config: {}", e)))?
    } else if path.extension().is_some_and(|ext| ext == "toml") {
        toml::from_str(&content).map_err(|e| Error::Config(format!("Invalid TOML config: {}", e)))?
    } else {
        // Try JSON5 first, then TOML
        json5::from_str(&content)
            .or_else(|_| toml::from_str(&content).map_err(|e| Error::Config(e.to_string())))
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?
    };

    Ok(config)
}

/// Apply environment variable overrides to an existing config.
///
/// Loads `.env` if present, then overlays any set `SANDBOX_*` variables.
pub fn apply_env_overrides(config: &mut Config) {
    dotenvy::dotenv().ok();
    apply_overrides_from(config, |key| std::env::var(key).ok());
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparsable environment override");
            None
        }
    }
}

fn flag(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<bool> {
    lookup(key).map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

fn apply_overrides_from(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    let sandbox = &mut config.sandbox;

    if let Some(root) = lookup("SANDBOX_WORKSPACE_ROOT") {
        sandbox.workspace_root = PathBuf::from(root);
    }
    if let Some(timeout) = lookup("SANDBOX_TIMEOUT_SECS") {
        // 0 or "none" disables the wall-clock fallback
        match timeout.trim() {
            "0" | "none" => sandbox.timeout_secs = None,
            _ => {
                if let Some(secs) = parsed(&lookup, "SANDBOX_TIMEOUT_SECS") {
                    sandbox.timeout_secs = Some(secs);
                }
            }
        }
    }
    if let Some(bytes) = parsed(&lookup, "SANDBOX_MEMORY_BYTES") {
        sandbox.default_memory_bytes = bytes;
    }
    if let Some(fuel) = parsed(&lookup, "SANDBOX_FUEL") {
        sandbox.default_fuel = fuel;
    }
    if let Some(bytes) = parsed(&lookup, "SANDBOX_STDOUT_MAX_BYTES") {
        sandbox.stdout_max_bytes = bytes;
    }
    if let Some(bytes) = parsed(&lookup, "SANDBOX_STDERR_MAX_BYTES") {
        sandbox.stderr_max_bytes = bytes;
    }
    if let Some(path) = lookup("SANDBOX_PYTHON_WASM") {
        sandbox.modules.python = PathBuf::from(path);
    }
    if let Some(path) = lookup("SANDBOX_JAVASCRIPT_WASM") {
        sandbox.modules.javascript = PathBuf::from(path);
    }
    if let Some(allow) = flag(&lookup, "SANDBOX_ALLOW_NON_UUID") {
        sandbox.allow_non_uuid_sessions = allow;
    }
    if let Some(preserve) = flag(&lookup, "SANDBOX_PRESERVE_LOGS") {
        sandbox.preserve_logs = preserve;
    }
}

/// Save configuration to a file
pub fn save_config(config: &Config, path: &Path) -> Result<()> {
    let content = if path.extension().is_some_and(|ext| ext == "toml") {
        toml::to_string_pretty(config).map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?
    } else {
        serde_json::to_string_pretty(config).map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(path, content)?;
    Ok(())
}

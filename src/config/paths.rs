//! Well-known locations for configuration and per-host state
//!
//! Every location can be pinned with a `WASM_SANDBOX_*` environment
//! variable; otherwise it follows the platform conventions from `dirs`.
//! Session workspaces, execution logs and interpreter modules are siblings
//! under the state directory, so logs never land inside a workspace.

use std::path::PathBuf;

const APP_DIR: &str = "wasm-sandbox";

/// Non-empty path from an environment variable
fn overridden(var: &str) -> Option<PathBuf> {
    std::env::var_os(var)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

/// `<base>/wasm-sandbox`, or `~/<home_fallback..>/wasm-sandbox` when the
/// platform has no such base.
fn platform_dir(base: Option<PathBuf>, home_fallback: &[&str]) -> PathBuf {
    base.or_else(|| {
        dirs::home_dir().map(|home| home_fallback.iter().fold(home, |dir, part| dir.join(part)))
    })
    .map(|dir| dir.join(APP_DIR))
    .unwrap_or_else(|| PathBuf::from(".wasm-sandbox"))
}

fn state_subdir(var: &str, name: &str) -> PathBuf {
    overridden(var).unwrap_or_else(|| state_dir().join(name))
}

pub fn config_dir() -> PathBuf {
    overridden("WASM_SANDBOX_CONFIG_DIR")
        .unwrap_or_else(|| platform_dir(dirs::config_dir(), &[".config"]))
}

/// Main configuration file (`config.json` unless overridden)
pub fn config_path() -> PathBuf {
    overridden("WASM_SANDBOX_CONFIG").unwrap_or_else(|| config_dir().join("config.json"))
}

pub fn state_dir() -> PathBuf {
    overridden("WASM_SANDBOX_STATE_DIR")
        .unwrap_or_else(|| platform_dir(dirs::data_dir(), &[".local", "share"]))
}

/// Root holding one directory per session
pub fn workspace_dir() -> PathBuf {
    state_subdir("WASM_SANDBOX_WORKSPACE", "workspaces")
}

/// Per-execution transcripts
pub fn logs_dir() -> PathBuf {
    state_subdir("WASM_SANDBOX_LOGS_DIR", "logs")
}

/// Interpreter `.wasm` modules
pub fn runtimes_dir() -> PathBuf {
    state_subdir("WASM_SANDBOX_RUNTIMES_DIR", "runtimes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_dir_fallbacks() {
        assert_eq!(
            platform_dir(Some(PathBuf::from("/xdg/config")), &[".config"]),
            PathBuf::from("/xdg/config/wasm-sandbox")
        );
        let fallback = platform_dir(None, &[".local", "share"]);
        assert!(fallback.ends_with(".local/share/wasm-sandbox") || fallback == PathBuf::from(".wasm-sandbox"));
    }

    #[test]
    fn test_empty_override_is_ignored() {
        std::env::set_var("WASM_SANDBOX_TEST_EMPTY_OVERRIDE", "");
        assert_eq!(overridden("WASM_SANDBOX_TEST_EMPTY_OVERRIDE"), None);
        std::env::set_var("WASM_SANDBOX_TEST_SET_OVERRIDE", "/srv/x");
        assert_eq!(
            overridden("WASM_SANDBOX_TEST_SET_OVERRIDE"),
            Some(PathBuf::from("/srv/x"))
        );
    }

    #[test]
    fn test_logs_live_outside_workspaces() {
        assert!(!logs_dir().starts_with(workspace_dir()));
        assert!(runtimes_dir().starts_with(state_dir()));
        assert!(config_path().ends_with("config.json") || std::env::var_os("WASM_SANDBOX_CONFIG").is_some());
    }
}

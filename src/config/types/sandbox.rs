//! Sandbox configuration types
//!
//! Engine-wide defaults: where sessions live, which interpreter modules to
//! run and the resource ceilings applied when a caller passes no policy.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::runtime::Language;
use crate::sandbox::{
    host_dirs_overlap, ExecutionPolicy, DEFAULT_FUEL_BUDGET, DEFAULT_GUEST_DATA_PATH, DEFAULT_GUEST_MOUNT_PATH,
    DEFAULT_MEMORY_BYTES, DEFAULT_STDERR_MAX_BYTES, DEFAULT_STDOUT_MAX_BYTES,
};

/// Sandbox configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Root directory holding one directory per session
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,
    /// Per-execution log artifacts; must be outside `workspace_root`
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// Accept any safe session name, not only UUIDs
    #[serde(default)]
    pub allow_non_uuid_sessions: bool,
    /// Shared package tree copied into each new session
    #[serde(default)]
    pub vendor_dir: Option<PathBuf>,
    /// Host directory mounted read-only into every guest
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default = "default_guest_mount_path")]
    pub guest_mount_path: String,
    #[serde(default = "default_guest_data_path")]
    pub guest_data_path: String,
    /// Instruction budget per execution
    #[serde(default = "default_fuel")]
    pub default_fuel: u64,
    /// Linear memory ceiling per execution
    #[serde(default = "default_memory_bytes")]
    pub default_memory_bytes: u64,
    #[serde(default = "default_stdout_max_bytes")]
    pub stdout_max_bytes: usize,
    #[serde(default = "default_stderr_max_bytes")]
    pub stderr_max_bytes: usize,
    /// Wall-clock fallback; `None` disables it
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: Option<u64>,
    /// Idle sessions older than this are pruned
    #[serde(default = "default_session_max_age", with = "humantime_serde")]
    pub session_max_age: Duration,
    /// Keep per-execution logs after each run
    #[serde(default)]
    pub preserve_logs: bool,
    /// Interpreter modules
    #[serde(default)]
    pub modules: ModulePaths,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        SandboxConfig {
            workspace_root: default_workspace_root(),
            log_dir: default_log_dir(),
            allow_non_uuid_sessions: false,
            vendor_dir: None,
            data_dir: None,
            guest_mount_path: default_guest_mount_path(),
            guest_data_path: default_guest_data_path(),
            default_fuel: default_fuel(),
            default_memory_bytes: default_memory_bytes(),
            stdout_max_bytes: default_stdout_max_bytes(),
            stderr_max_bytes: default_stderr_max_bytes(),
            timeout_secs: default_timeout_secs(),
            session_max_age: default_session_max_age(),
            preserve_logs: false,
            modules: ModulePaths::default(),
        }
    }
}

impl SandboxConfig {
    /// Policy applied when a caller does not supply one.
    ///
    /// Not bound to a workspace; the runtime binds it per session. A data
    /// directory overlapping `workspace_root` is rejected, since it would
    /// expose other sessions or make the data mount writable.
    pub fn default_policy(&self) -> Result<ExecutionPolicy> {
        if let Some(data_dir) = &self.data_dir {
            check_data_dir(data_dir, &self.workspace_root)?;
        }
        let mut builder = ExecutionPolicy::builder()
            .fuel_budget(self.default_fuel)
            .memory_bytes(self.default_memory_bytes)
            .stdout_max_bytes(self.stdout_max_bytes)
            .stderr_max_bytes(self.stderr_max_bytes)
            .guest_mount_path(self.guest_mount_path.clone())
            .guest_data_path(self.guest_data_path.clone())
            .timeout_seconds(self.timeout_secs)
            .preserve_logs(self.preserve_logs);
        if let Some(data_dir) = &self.data_dir {
            builder = builder.mount_data_dir(data_dir.clone());
        }
        builder.build()
    }

    /// Interpreter module for a language
    pub fn module_for(&self, language: Language) -> &Path {
        match language {
            Language::Python => &self.modules.python,
            Language::JavaScript => &self.modules.javascript,
        }
    }
}

/// Reject a data mount that overlaps the root holding every session
pub(crate) fn check_data_dir(data_dir: &Path, workspace_root: &Path) -> Result<()> {
    if host_dirs_overlap(data_dir, workspace_root) {
        return Err(Error::InvalidPolicy(format!(
            "data directory {} overlaps workspace root {}",
            data_dir.display(),
            workspace_root.display()
        )));
    }
    Ok(())
}

fn default_workspace_root() -> PathBuf {
    crate::config::workspace_dir()
}

fn default_log_dir() -> PathBuf {
    crate::config::logs_dir()
}

fn default_guest_mount_path() -> String {
    DEFAULT_GUEST_MOUNT_PATH.to_string()
}

fn default_guest_data_path() -> String {
    DEFAULT_GUEST_DATA_PATH.to_string()
}

fn default_fuel() -> u64 {
    DEFAULT_FUEL_BUDGET
}

fn default_memory_bytes() -> u64 {
    DEFAULT_MEMORY_BYTES
}

fn default_stdout_max_bytes() -> usize {
    DEFAULT_STDOUT_MAX_BYTES
}

fn default_stderr_max_bytes() -> usize {
    DEFAULT_STDERR_MAX_BYTES
}

fn default_timeout_secs() -> Option<u64> {
    Some(60)
}

fn default_session_max_age() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

/// Paths to the WASI interpreter modules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModulePaths {
    #[serde(default = "default_python_module")]
    pub python: PathBuf,
    #[serde(default = "default_javascript_module")]
    pub javascript: PathBuf,
}

impl Default for ModulePaths {
    fn default() -> Self {
        ModulePaths {
            python: default_python_module(),
            javascript: default_javascript_module(),
        }
    }
}

fn default_python_module() -> PathBuf {
    crate::config::runtimes_dir().join("python.wasm")
}

fn default_javascript_module() -> PathBuf {
    crate::config::runtimes_dir().join("qjs.wasm")
}

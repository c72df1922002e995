//! Execution result types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

/// Terminal state of one execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    /// The guest exited normally with an exit code
    Completed,
    /// The VM trapped before a normal exit
    Trapped,
    /// The host failed to load or instantiate the guest module
    HostError,
}

/// Why the VM trapped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrapKind {
    /// Instruction budget exhausted
    OutOfFuel,
    /// Linear memory would have grown past the policy ceiling
    MemoryExceeded,
    /// Wall-clock fallback fired
    Timeout,
    /// Any other VM fault (unreachable, bad memory access, stack overflow, ...)
    Other,
}

impl std::fmt::Display for TrapKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrapKind::OutOfFuel => write!(f, "out_of_fuel"),
            TrapKind::MemoryExceeded => write!(f, "memory_exceeded"),
            TrapKind::Timeout => write!(f, "timeout"),
            TrapKind::Other => write!(f, "other"),
        }
    }
}

/// Trap diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrapInfo {
    pub kind: TrapKind,
    pub message: String,
}

/// Result of one sandboxed execution.
///
/// Returned by value; nothing in the engine keeps a handle to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxResult {
    /// Captured stdout, capped at the policy limit
    pub stdout: String,
    /// Captured stderr, capped at the policy limit
    pub stderr: String,
    /// Set when stdout exceeded its cap
    pub stdout_truncated: bool,
    /// Set when stderr exceeded its cap
    pub stderr_truncated: bool,
    /// Exit code; `None` when the VM trapped or never started
    pub exit_code: Option<i32>,
    /// True only for a normal exit with code 0
    pub success: bool,
    pub state: ExecutionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trap: Option<TrapInfo>,
    pub fuel_consumed: u64,
    pub memory_used_bytes: u64,
    pub duration_ms: u64,
    pub workspace_path: PathBuf,
    /// Paths relative to the workspace, excluding the injected entry file
    pub files_created: Vec<String>,
    pub files_modified: Vec<String>,
    /// Open map: `runtime`, `session_id`, trap diagnostics, `error_guidance`, `fuel_analysis`, ...
    pub metadata: Map<String, Value>,
}

impl SandboxResult {
    /// Get combined output
    pub fn combined_output(&self) -> String {
        let mut output = String::new();
        if !self.stdout.is_empty() {
            output.push_str(&self.stdout);
        }
        if !self.stderr.is_empty() {
            if !output.is_empty() {
                output.push_str("\n--- stderr ---\n");
            }
            output.push_str(&self.stderr);
        }
        output
    }

    /// True if the VM ran out of fuel
    pub fn is_out_of_fuel(&self) -> bool {
        matches!(self.trap, Some(TrapInfo { kind: TrapKind::OutOfFuel, .. }))
    }

    /// Insert a metadata entry
    pub fn set_metadata(&mut self, key: &str, value: impl Into<Value>) {
        self.metadata.insert(key.to_string(), value.into());
    }

    /// Memory used, in 64 KiB wasm pages
    pub fn memory_pages(&self) -> u64 {
        self.memory_used_bytes.div_ceil(65_536)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SandboxResult {
        SandboxResult {
            stdout: "out".into(),
            stderr: String::new(),
            stdout_truncated: false,
            stderr_truncated: false,
            exit_code: Some(0),
            success: true,
            state: ExecutionState::Completed,
            trap: None,
            fuel_consumed: 10,
            memory_used_bytes: 65_537,
            duration_ms: 1,
            workspace_path: PathBuf::from("/tmp/ws"),
            files_created: Vec::new(),
            files_modified: Vec::new(),
            metadata: Map::new(),
        }
    }

    #[test]
    fn test_combined_output() {
        let mut result = sample();
        assert_eq!(result.combined_output(), "out");
        result.stderr = "err".into();
        assert_eq!(result.combined_output(), "out\n--- stderr ---\nerr");
    }

    #[test]
    fn test_memory_pages_rounds_up() {
        assert_eq!(sample().memory_pages(), 2);
    }

    #[test]
    fn test_serialized_shape() {
        let mut result = sample();
        result.set_metadata("runtime", "python");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["state"], "completed");
        assert_eq!(json["metadata"]["runtime"], "python");
        assert!(json.get("trap").is_none());
    }
}

//! Sandbox module - WebAssembly execution with deterministic limits
//!
//! - Policy: validated resource ceilings, mounts, env and argv for one run
//! - Host: Wasmtime + WASI preview 1 with fuel, memory and stdio caps
//! - Output: capped stdout/stderr sinks that never fail a guest write
//! - Result: the typed outcome of a single execution

mod host;
mod output;
mod policy;
mod result;

pub use host::{ExecutionHost, GuestInvocation};
pub use output::{CapturedStream, OutputCapture};
pub use policy::{
    host_dirs_overlap, ExecutionPolicy, PolicyBuilder, DEFAULT_FUEL_BUDGET, DEFAULT_GUEST_DATA_PATH,
    DEFAULT_GUEST_MOUNT_PATH, DEFAULT_MEMORY_BYTES, DEFAULT_STDERR_MAX_BYTES,
    DEFAULT_STDOUT_MAX_BYTES,
};
pub use result::{ExecutionState, SandboxResult, TrapInfo, TrapKind};

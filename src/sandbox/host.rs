//! WebAssembly execution host using Wasmtime + WASI preview 1
//!
//! Runs exactly one guest module per call under a fuel meter, a linear
//! memory ceiling and an optional wall-clock fallback. Stdio goes to capped
//! in-memory pipes; the guest sees only the preopened mounts of the policy.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use moka::sync::Cache;
use serde_json::Map;
use tracing::{debug, info, warn};
use wasmtime::{
    Config, Engine, Linker, Module, ResourceLimiter, Store, StoreLimits, StoreLimitsBuilder,
    Trap, WasmBacktraceDetails,
};
use wasmtime_wasi::p2::pipe::MemoryInputPipe;
use wasmtime_wasi::preview1::{self as p1, WasiP1Ctx};
use wasmtime_wasi::{DirPerms, FilePerms, I32Exit, WasiCtxBuilder};

use crate::error::{Error, Result};
use crate::sandbox::output::OutputCapture;
use crate::sandbox::policy::ExecutionPolicy;
use crate::sandbox::result::{ExecutionState, SandboxResult, TrapInfo, TrapKind};

/// Interval between epoch ticks driving the wall-clock fallback
const EPOCH_TICK: Duration = Duration::from_millis(100);

/// Deadline used when the policy has no timeout
const NO_DEADLINE_TICKS: u64 = u64::MAX / 4;

/// Compiled interpreter modules kept per host
const MODULE_CACHE_CAPACITY: u64 = 16;

/// Guest entry point for WASI command modules
const ENTRY_POINT: &str = "_start";

/// What the guest is started with, beyond the policy itself
#[derive(Debug, Clone, Default)]
pub struct GuestInvocation {
    /// Full argv, `argv[0]` included
    pub argv: Vec<String>,
    /// Exact environment; nothing is inherited from the host
    pub env: BTreeMap<String, String>,
    /// Bytes readable on stdin; `None` leaves stdin empty
    pub stdin: Option<Vec<u8>>,
}

/// Store data: WASI context plus the memory meter
struct HostState {
    wasi: WasiP1Ctx,
    meter: MemoryMeter,
}

/// Linear-memory limiter that records the peak and whether the ceiling was hit.
struct MemoryMeter {
    limits: StoreLimits,
    limit_bytes: usize,
    peak_bytes: usize,
    exceeded: bool,
}

impl MemoryMeter {
    fn new(limit_bytes: usize) -> Self {
        let limits = StoreLimitsBuilder::new()
            .memory_size(limit_bytes)
            .trap_on_grow_failure(true)
            .build();
        MemoryMeter {
            limits,
            limit_bytes,
            peak_bytes: 0,
            exceeded: false,
        }
    }
}

impl ResourceLimiter for MemoryMeter {
    fn memory_growing(
        &mut self,
        current: usize,
        desired: usize,
        maximum: Option<usize>,
    ) -> wasmtime::Result<bool> {
        if desired > self.limit_bytes {
            self.exceeded = true;
        } else if desired > self.peak_bytes {
            self.peak_bytes = desired;
        }
        self.limits.memory_growing(current, desired, maximum)
    }

    fn table_growing(
        &mut self,
        current: usize,
        desired: usize,
        maximum: Option<usize>,
    ) -> wasmtime::Result<bool> {
        self.limits.table_growing(current, desired, maximum)
    }

    fn instances(&self) -> usize {
        self.limits.instances()
    }

    fn tables(&self) -> usize {
        self.limits.tables()
    }

    fn memories(&self) -> usize {
        self.limits.memories()
    }
}

/// Background thread advancing the engine epoch
struct EpochTicker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl EpochTicker {
    fn start(engine: Engine) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let handle = std::thread::Builder::new()
            .name("sandbox-epoch".to_string())
            .spawn(move || {
                while !flag.load(Ordering::Relaxed) {
                    std::thread::sleep(EPOCH_TICK);
                    engine.increment_epoch();
                }
            })
            .map_err(|e| Error::HostLoad(format!("Failed to start epoch ticker: {}", e)))?;

        Ok(EpochTicker {
            stop,
            handle: Some(handle),
        })
    }
}

impl Drop for EpochTicker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Wasmtime execution host.
///
/// One engine (and epoch ticker) is shared by every execution; each call
/// gets a fresh `Store`, WASI context and meters.
pub struct ExecutionHost {
    engine: Engine,
    modules: Cache<PathBuf, Module>,
    _ticker: EpochTicker,
}

impl ExecutionHost {
    /// Create a new execution host
    pub fn new() -> Result<Self> {
        let mut config = Config::new();
        config.wasm_backtrace_details(WasmBacktraceDetails::Disable);
        config.consume_fuel(true);
        config.epoch_interruption(true);

        let engine =
            Engine::new(&config).map_err(|e| Error::HostLoad(format!("Failed to create engine: {}", e)))?;
        let ticker = EpochTicker::start(engine.clone())?;

        info!("Wasm execution host initialized");
        Ok(ExecutionHost {
            engine,
            modules: Cache::new(MODULE_CACHE_CAPACITY),
            _ticker: ticker,
        })
    }

    /// Compile a module from binary or text format
    pub fn compile(&self, bytes: &[u8]) -> Result<Module> {
        Ok(Module::new(&self.engine, bytes)?)
    }

    /// Load a module from disk, compiling it at most once per host.
    pub fn load_module(&self, path: &Path) -> Result<Module> {
        self.modules
            .try_get_with(path.to_path_buf(), || {
                debug!(module = %path.display(), "Compiling guest module");
                Module::from_file(&self.engine, path)
            })
            .map_err(|e| Error::HostLoad(format!("Failed to load guest module: {}", e)))
    }

    /// Load a module from disk and run it.
    ///
    /// A module that cannot be loaded yields an `ExecutionState::HostError`
    /// result rather than an error.
    pub fn run_file(
        &self,
        module_path: &Path,
        policy: &ExecutionPolicy,
        invocation: &GuestInvocation,
    ) -> SandboxResult {
        let start = Instant::now();
        match self.load_module(module_path) {
            Ok(module) => self.run_module(&module, policy, invocation),
            Err(e) => {
                let redactor = Redactor::new(policy, Some(module_path));
                host_error(policy, redactor.apply(&e.to_string()), start.elapsed())
            }
        }
    }

    /// Run a compiled module to completion or trap
    pub fn run_module(
        &self,
        module: &Module,
        policy: &ExecutionPolicy,
        invocation: &GuestInvocation,
    ) -> SandboxResult {
        let start = Instant::now();
        let redactor = Redactor::new(policy, None);

        let Some(host_dir) = policy.mount_host_dir() else {
            return host_error(
                policy,
                "no primary mount bound to the policy".to_string(),
                start.elapsed(),
            );
        };

        // 1. Capabilities and stdio
        let stdout = OutputCapture::new(policy.stdout_max_bytes());
        let stderr = OutputCapture::new(policy.stderr_max_bytes());

        let mut builder = WasiCtxBuilder::new();
        builder
            .args(invocation.argv.as_slice())
            .stdout(stdout.clone())
            .stderr(stderr.clone());
        for (key, value) in &invocation.env {
            builder.env(key, value);
        }
        if let Some(input) = &invocation.stdin {
            builder.stdin(MemoryInputPipe::new(input.clone()));
        }

        if let Err(e) = builder.preopened_dir(
            host_dir,
            policy.guest_mount_path(),
            DirPerms::all(),
            FilePerms::all(),
        ) {
            return host_error(
                policy,
                redactor.apply(&format!("failed to preopen primary mount: {}", e)),
                start.elapsed(),
            );
        }
        if let Some(data_dir) = policy.mount_data_dir() {
            if let Err(e) = builder.preopened_dir(
                data_dir,
                policy.guest_data_path(),
                DirPerms::READ,
                FilePerms::READ,
            ) {
                return host_error(
                    policy,
                    redactor.apply(&format!("failed to preopen data mount: {}", e)),
                    start.elapsed(),
                );
            }
        }

        // 2. Store with meters
        let memory_limit = usize::try_from(policy.memory_bytes()).unwrap_or(usize::MAX);
        let mut store = Store::new(
            &self.engine,
            HostState {
                wasi: builder.build_p1(),
                meter: MemoryMeter::new(memory_limit),
            },
        );
        store.limiter(|state| &mut state.meter);
        if let Err(e) = store.set_fuel(policy.fuel_budget()) {
            return host_error(policy, format!("failed to set fuel: {}", e), start.elapsed());
        }
        let deadline = policy
            .timeout_seconds()
            .map(|secs| secs.saturating_mul(1000) / EPOCH_TICK.as_millis() as u64 + 1)
            .unwrap_or(NO_DEADLINE_TICKS);
        store.set_epoch_deadline(deadline);

        let mut linker: Linker<HostState> = Linker::new(&self.engine);
        if let Err(e) = p1::add_to_linker_sync(&mut linker, |state: &mut HostState| &mut state.wasi) {
            return host_error(policy, format!("failed to link WASI: {}", e), start.elapsed());
        }

        // 3. Instantiate and run
        let outcome = match linker.instantiate(&mut store, module) {
            Ok(instance) => match instance.get_typed_func::<(), ()>(&mut store, ENTRY_POINT) {
                Ok(entry) => RunOutcome::from_call(entry.call(&mut store, ()), &store),
                Err(e) => RunOutcome::HostError(format!("guest has no usable {}: {}", ENTRY_POINT, e)),
            },
            Err(e) => match classify_trap(&e, store.data().meter.exceeded) {
                Some(kind) => RunOutcome::Trapped(kind, e.to_string()),
                None => RunOutcome::HostError(format!("failed to instantiate guest: {}", e)),
            },
        };

        // 4. Meters and output
        let remaining = store.get_fuel().unwrap_or(0);
        let fuel_consumed = policy.fuel_budget().saturating_sub(remaining);
        let memory_used_bytes = store.data().meter.peak_bytes as u64;
        drop(store);

        let out = stdout.finish();
        let err = stderr.finish();

        let mut result = SandboxResult {
            stdout: out.text,
            stderr: err.text,
            stdout_truncated: out.truncated,
            stderr_truncated: err.truncated,
            exit_code: None,
            success: false,
            state: ExecutionState::Completed,
            trap: None,
            fuel_consumed,
            memory_used_bytes,
            duration_ms: start.elapsed().as_millis() as u64,
            workspace_path: host_dir.to_path_buf(),
            files_created: Vec::new(),
            files_modified: Vec::new(),
            metadata: Map::new(),
        };

        match outcome {
            RunOutcome::Exited(code) => {
                result.exit_code = Some(code);
                result.success = code == 0;
            }
            RunOutcome::Trapped(kind, message) => {
                let message = redactor.apply(&message);
                warn!(trap = %kind, fuel_consumed, "Guest trapped");
                result.state = ExecutionState::Trapped;
                result.set_metadata("trap_kind", kind.to_string());
                result.set_metadata("trap_message", message.clone());
                result.trap = Some(TrapInfo { kind, message });
            }
            RunOutcome::HostError(message) => {
                let message = redactor.apply(&message);
                warn!(error = %message, "Guest could not be started");
                result.state = ExecutionState::HostError;
                append_line(&mut result.stderr, &message);
                result.set_metadata("host_error", message);
            }
        }
        result.set_metadata("stdout_truncated", result.stdout_truncated);
        result.set_metadata("stderr_truncated", result.stderr_truncated);
        result.set_metadata("memory_pages", result.memory_pages());

        result
    }
}

enum RunOutcome {
    Exited(i32),
    Trapped(TrapKind, String),
    HostError(String),
}

impl RunOutcome {
    fn from_call(call: wasmtime::Result<()>, store: &Store<HostState>) -> Self {
        match call {
            Ok(()) => RunOutcome::Exited(0),
            Err(e) => {
                if let Some(exit) = e.downcast_ref::<I32Exit>() {
                    return RunOutcome::Exited(exit.0);
                }
                let kind = classify_trap(&e, store.data().meter.exceeded).unwrap_or(TrapKind::Other);
                RunOutcome::Trapped(kind, e.to_string())
            }
        }
    }
}

/// Map a wasmtime error to a trap kind; `None` means it was not a guest trap.
fn classify_trap(err: &wasmtime::Error, memory_exceeded: bool) -> Option<TrapKind> {
    if memory_exceeded {
        return Some(TrapKind::MemoryExceeded);
    }
    match err.downcast_ref::<Trap>() {
        Some(Trap::OutOfFuel) => Some(TrapKind::OutOfFuel),
        Some(Trap::Interrupt) => Some(TrapKind::Timeout),
        Some(_) => Some(TrapKind::Other),
        None => None,
    }
}

fn host_error(policy: &ExecutionPolicy, message: String, elapsed: Duration) -> SandboxResult {
    let mut metadata = Map::new();
    metadata.insert("host_error".to_string(), message.clone().into());
    SandboxResult {
        stdout: String::new(),
        stderr: message,
        stdout_truncated: false,
        stderr_truncated: false,
        exit_code: None,
        success: false,
        state: ExecutionState::HostError,
        trap: None,
        fuel_consumed: 0,
        memory_used_bytes: 0,
        duration_ms: elapsed.as_millis() as u64,
        workspace_path: policy.mount_host_dir().map(Path::to_path_buf).unwrap_or_default(),
        files_created: Vec::new(),
        files_modified: Vec::new(),
        metadata,
    }
}

fn append_line(buf: &mut String, line: &str) {
    if !buf.is_empty() && !buf.ends_with('\n') {
        buf.push('\n');
    }
    buf.push_str(line);
}

/// Replaces host paths with their guest-visible names in diagnostic text
struct Redactor {
    replacements: Vec<(String, String)>,
}

impl Redactor {
    fn new(policy: &ExecutionPolicy, module_path: Option<&Path>) -> Self {
        let mut replacements = Vec::new();
        if let Some(dir) = policy.mount_host_dir() {
            replacements.push((dir.display().to_string(), policy.guest_mount_path().to_string()));
        }
        if let Some(dir) = policy.mount_data_dir() {
            replacements.push((dir.display().to_string(), policy.guest_data_path().to_string()));
        }
        if let Some(path) = module_path {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "<module>".to_string());
            replacements.push((path.display().to_string(), name));
        }
        // longest first so nested paths are replaced whole
        replacements.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Redactor { replacements }
    }

    fn apply(&self, text: &str) -> String {
        self.replacements
            .iter()
            .filter(|(host, _)| !host.is_empty())
            .fold(text.to_string(), |acc, (host, guest)| acc.replace(host.as_str(), guest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{create_file, print_and_exit, write_reporting_errno, GROW, SPIN};
    use tempfile::tempdir;

    fn policy_for(dir: &Path) -> ExecutionPolicy {
        ExecutionPolicy::builder()
            .mount_host_dir(dir)
            .fuel_budget(10_000_000)
            .memory_bytes(4 * 1024 * 1024)
            .build()
            .unwrap()
    }

    #[test]
    fn test_host_creation() {
        assert!(ExecutionHost::new().is_ok());
    }

    #[test]
    fn test_normal_exit() {
        let dir = tempdir().unwrap();
        let host = ExecutionHost::new().unwrap();
        let module = host.compile(print_and_exit("hello\n", 0).as_bytes()).unwrap();

        let result = host.run_module(&module, &policy_for(dir.path()), &GuestInvocation::default());

        assert_eq!(result.state, ExecutionState::Completed);
        assert_eq!(result.stdout, "hello\n");
        assert_eq!(result.exit_code, Some(0));
        assert!(result.success);
        assert!(result.fuel_consumed > 0);
        assert!(result.memory_used_bytes >= 65_536);
    }

    #[test]
    fn test_non_zero_exit_is_not_success() {
        let dir = tempdir().unwrap();
        let host = ExecutionHost::new().unwrap();
        let module = host.compile(print_and_exit("bad\n", 3).as_bytes()).unwrap();

        let result = host.run_module(&module, &policy_for(dir.path()), &GuestInvocation::default());

        assert_eq!(result.state, ExecutionState::Completed);
        assert_eq!(result.exit_code, Some(3));
        assert!(!result.success);
        assert!(result.trap.is_none());
    }

    #[test]
    fn test_unbounded_loop_runs_out_of_fuel() {
        let dir = tempdir().unwrap();
        let host = ExecutionHost::new().unwrap();
        let module = host.compile(SPIN.as_bytes()).unwrap();
        let policy = ExecutionPolicy::builder()
            .mount_host_dir(dir.path())
            .fuel_budget(100_000)
            .build()
            .unwrap();

        let result = host.run_module(&module, &policy, &GuestInvocation::default());

        assert_eq!(result.state, ExecutionState::Trapped);
        assert!(result.is_out_of_fuel());
        assert_eq!(result.exit_code, None);
        assert!(!result.success);
        assert_eq!(result.fuel_consumed, 100_000);
        assert_eq!(result.metadata["trap_kind"], "out_of_fuel");
    }

    #[test]
    fn test_memory_ceiling_traps() {
        let dir = tempdir().unwrap();
        let host = ExecutionHost::new().unwrap();
        let module = host.compile(GROW.as_bytes()).unwrap();

        let result = host.run_module(&module, &policy_for(dir.path()), &GuestInvocation::default());

        assert_eq!(result.state, ExecutionState::Trapped);
        assert_eq!(result.trap.as_ref().map(|t| t.kind), Some(TrapKind::MemoryExceeded));
        assert!(result.memory_used_bytes <= 4 * 1024 * 1024);
        assert!(!result.success);
    }

    #[test]
    fn test_timeout_fallback() {
        let dir = tempdir().unwrap();
        let host = ExecutionHost::new().unwrap();
        let module = host.compile(SPIN.as_bytes()).unwrap();
        let policy = ExecutionPolicy::builder()
            .mount_host_dir(dir.path())
            .fuel_budget(1_000_000_000_000)
            .timeout_seconds(Some(1))
            .build()
            .unwrap();

        let result = host.run_module(&module, &policy, &GuestInvocation::default());

        assert_eq!(result.trap.as_ref().map(|t| t.kind), Some(TrapKind::Timeout));
    }

    #[test]
    fn test_stdout_is_capped_and_flagged() {
        let dir = tempdir().unwrap();
        let host = ExecutionHost::new().unwrap();
        let module = host
            .compile(write_reporting_errno(1, &"x".repeat(100)).as_bytes())
            .unwrap();
        let policy = ExecutionPolicy::builder()
            .mount_host_dir(dir.path())
            .stdout_max_bytes(10)
            .build()
            .unwrap();

        let result = host.run_module(&module, &policy, &GuestInvocation::default());

        // the guest's write succeeded even though output was dropped
        assert_eq!(result.exit_code, Some(0));
        assert!(result.success);
        assert_eq!(result.stdout, "x".repeat(10));
        assert!(result.stdout_truncated);
        assert!(!result.stderr_truncated);
        assert_eq!(result.metadata["stdout_truncated"], true);
    }

    #[test]
    fn test_stderr_is_capped_and_flagged() {
        let dir = tempdir().unwrap();
        let host = ExecutionHost::new().unwrap();
        let module = host
            .compile(write_reporting_errno(2, &"e".repeat(64)).as_bytes())
            .unwrap();
        let policy = ExecutionPolicy::builder()
            .mount_host_dir(dir.path())
            .stderr_max_bytes(8)
            .build()
            .unwrap();

        let result = host.run_module(&module, &policy, &GuestInvocation::default());

        assert_eq!(result.state, ExecutionState::Completed);
        assert_eq!(result.exit_code, Some(0));
        assert!(result.success);
        assert_eq!(result.stderr, "e".repeat(8));
        assert!(result.stderr_truncated);
        assert!(!result.stdout_truncated);
        assert_eq!(result.metadata["stderr_truncated"], true);
    }

    #[test]
    fn test_data_mount_is_read_only() {
        let dir = tempdir().unwrap();
        let data = tempdir().unwrap();
        let host = ExecutionHost::new().unwrap();
        let policy = ExecutionPolicy::builder()
            .mount_host_dir(dir.path())
            .mount_data_dir(data.path())
            .build()
            .unwrap();

        let into_data = host.compile(create_file(4, "blocked.txt").as_bytes()).unwrap();
        let result = host.run_module(&into_data, &policy, &GuestInvocation::default());
        assert_eq!(result.state, ExecutionState::Completed);
        assert_ne!(result.exit_code, Some(0));
        assert!(!data.path().join("blocked.txt").exists());

        let into_workspace = host.compile(create_file(3, "ok.txt").as_bytes()).unwrap();
        let result = host.run_module(&into_workspace, &policy, &GuestInvocation::default());
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.stdout, "done\n");
        assert!(dir.path().join("ok.txt").exists());
    }

    #[test]
    fn test_traversal_outside_mount_fails() {
        let root = tempdir().unwrap();
        let ws = root.path().join("ws");
        std::fs::create_dir(&ws).unwrap();
        let host = ExecutionHost::new().unwrap();
        let module = host.compile(create_file(3, "../escaped.txt").as_bytes()).unwrap();

        let result = host.run_module(&module, &policy_for(&ws), &GuestInvocation::default());

        assert_ne!(result.exit_code, Some(0));
        assert!(!root.path().join("escaped.txt").exists());
        assert!(!result.stderr.contains(&ws.display().to_string()));
    }

    #[test]
    fn test_missing_module_is_host_error() {
        let dir = tempdir().unwrap();
        let host = ExecutionHost::new().unwrap();
        let missing = dir.path().join("nope.wasm");

        let result = host.run_file(&missing, &policy_for(dir.path()), &GuestInvocation::default());

        assert_eq!(result.state, ExecutionState::HostError);
        assert_eq!(result.exit_code, None);
        assert!(!result.success);
        assert!(!result.stderr.contains(&dir.path().display().to_string()));
    }

    #[test]
    fn test_unbound_policy_is_host_error() {
        let host = ExecutionHost::new().unwrap();
        let module = host.compile(SPIN.as_bytes()).unwrap();
        let result = host.run_module(&module, &ExecutionPolicy::default(), &GuestInvocation::default());
        assert_eq!(result.state, ExecutionState::HostError);
    }

    #[test]
    fn test_redactor_hides_host_paths() {
        let policy = ExecutionPolicy::builder()
            .mount_host_dir("/var/lib/sandbox/ws/abc")
            .mount_data_dir("/srv/data")
            .build()
            .unwrap();
        let redactor = Redactor::new(&policy, Some(Path::new("/opt/runtimes/python.wasm")));
        let text = redactor.apply(
            "cannot open /var/lib/sandbox/ws/abc/x.txt or /srv/data/y or /opt/runtimes/python.wasm",
        );
        assert_eq!(text, "cannot open /app/x.txt or /data/y or python.wasm");
    }
}

//! # wasm-sandbox
//!
//! Executes untrusted, LLM-generated code inside a WebAssembly virtual
//! machine with deterministic limits.
//!
//! ## Features
//!
//! - **Fuel metering:** an instruction budget is the primary cancellation path
//! - **Memory ceiling:** linear memory cannot grow past the policy limit
//! - **Capability mounts:** one read-write workspace, one optional read-only data mount
//! - **Sessions:** isolated per-session workspaces with private package copies
//! - **Multiple guests:** Python and JavaScript interpreters behind one interface
//!
//! ```no_run
//! use wasm_sandbox::{create_sandbox, ExecuteOptions, Language, Runtime, SandboxRequest};
//!
//! # async fn demo() -> wasm_sandbox::Result<()> {
//! let config = wasm_sandbox::Config::from_env()?;
//! let sandbox = create_sandbox(SandboxRequest::new(Language::Python), &config.sandbox)?;
//! let result = sandbox.execute("print('hello')", ExecuteOptions::new()).await?;
//! assert_eq!(result.stdout, "hello\n");
//! # Ok(())
//! # }
//! ```

pub mod analysis;
pub mod config;
pub mod error;
pub mod factory;
pub mod runtime;
pub mod sandbox;
pub mod session;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use error::{Error, Result};
pub use factory::{create_sandbox, prune_sessions, RuntimeHandle, SandboxRequest};
pub use runtime::{ExecuteOptions, Language, Runtime};
pub use sandbox::{ExecutionPolicy, ExecutionState, SandboxResult, TrapKind};
pub use session::{PruneReport, RetentionPolicy};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const NAME: &str = env!("CARGO_PKG_NAME");

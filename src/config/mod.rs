//! Configuration module
//!
//! - types/mod.rs: Top-level `Config`
//! - types/sandbox.rs: Engine defaults, directories and interpreter modules
//! - io.rs: Configuration loading, saving and environment overrides
//! - validation.rs: Configuration validation
//! - paths.rs: Configuration and state paths

mod io;
mod paths;
mod types;
mod validation;

pub use types::Config;
pub use types::sandbox::{ModulePaths, SandboxConfig};
pub(crate) use types::sandbox::check_data_dir;

pub use io::{apply_env_overrides, load_config, load_config_from_path, save_config};
pub use paths::{config_dir, config_path, logs_dir, runtimes_dir, state_dir, workspace_dir};
pub use validation::{validate_config, ConfigValidationResult, ValidationIssue};

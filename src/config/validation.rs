//! Configuration validation
//!
//! Validates configuration and reports issues.

use super::types::Config;
use crate::runtime::Language;

/// Result of configuration validation
#[derive(Debug, Clone)]
pub struct ConfigValidationResult {
    /// Whether the config is valid
    pub valid: bool,
    /// Validation errors (critical)
    pub errors: Vec<ValidationIssue>,
    /// Validation warnings (non-critical)
    pub warnings: Vec<ValidationIssue>,
}

impl ConfigValidationResult {
    /// Create a valid result
    pub fn valid() -> Self {
        ConfigValidationResult {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Add an error
    pub fn with_error(mut self, issue: ValidationIssue) -> Self {
        self.valid = false;
        self.errors.push(issue);
        self
    }

    /// Add a warning
    pub fn with_warning(mut self, issue: ValidationIssue) -> Self {
        self.warnings.push(issue);
        self
    }
}

/// A validation issue
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Path to the config field
    pub path: String,
    /// Issue message
    pub message: String,
    /// Suggested fix
    pub suggestion: Option<String>,
}

impl ValidationIssue {
    /// Create a new issue
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationIssue {
            path: path.into(),
            message: message.into(),
            suggestion: None,
        }
    }

    /// Add a suggestion
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, " ({})", suggestion)?;
        }
        Ok(())
    }
}

/// Validate the configuration
pub fn validate_config(config: &Config) -> ConfigValidationResult {
    let mut result = ConfigValidationResult::valid();

    // Limits and policy defaults
    result = validate_limits(config, result);

    // Directories
    result = validate_directories(config, result);

    // Interpreter modules
    result = validate_modules(config, result);

    result
}

fn validate_limits(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    let sandbox = &config.sandbox;
    let limits = [
        ("sandbox.default_fuel", sandbox.default_fuel == 0),
        ("sandbox.default_memory_bytes", sandbox.default_memory_bytes == 0),
        ("sandbox.stdout_max_bytes", sandbox.stdout_max_bytes == 0),
        ("sandbox.stderr_max_bytes", sandbox.stderr_max_bytes == 0),
        ("sandbox.timeout_secs", sandbox.timeout_secs == Some(0)),
    ];
    for (path, is_zero) in limits {
        if is_zero {
            result = result.with_error(
                ValidationIssue::new(path, "Limit must be positive")
                    .with_suggestion("Remove the field to use the default"),
            );
        }
    }

    // Catch anything else the policy builder would reject
    if result.valid {
        if let Err(e) = sandbox.default_policy() {
            result = result.with_error(ValidationIssue::new("sandbox", e.to_string()));
        }
    }

    result
}

fn validate_directories(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    let sandbox = &config.sandbox;

    if sandbox.log_dir.starts_with(&sandbox.workspace_root) {
        result = result.with_error(
            ValidationIssue::new(
                "sandbox.log_dir",
                "Log directory must not be inside the workspace root",
            )
            .with_suggestion("Move sandbox.log_dir next to sandbox.workspace_root"),
        );
    }

    if let Some(vendor) = &sandbox.vendor_dir {
        if !vendor.is_dir() {
            result = result.with_warning(
                ValidationIssue::new(
                    "sandbox.vendor_dir",
                    format!("Vendored package directory does not exist: {}", vendor.display()),
                )
                .with_suggestion("Create the directory or remove sandbox.vendor_dir"),
            );
        }
    }

    if let Some(data) = &sandbox.data_dir {
        if crate::sandbox::host_dirs_overlap(data, &sandbox.workspace_root) {
            result = result.with_error(
                ValidationIssue::new(
                    "sandbox.data_dir",
                    "Data directory must not contain or sit inside the workspace root",
                )
                .with_suggestion("Point sandbox.data_dir at a directory outside sandbox.workspace_root"),
            );
        }
        if !data.is_dir() {
            result = result.with_warning(
                ValidationIssue::new(
                    "sandbox.data_dir",
                    format!("Data directory does not exist: {}", data.display()),
                )
                .with_suggestion("Create the directory or remove sandbox.data_dir"),
            );
        }
    }

    result
}

fn validate_modules(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    for language in Language::ALL {
        let module = config.sandbox.module_for(language);
        if !module.is_file() {
            result = result.with_warning(
                ValidationIssue::new(
                    format!("sandbox.modules.{}", language),
                    format!("Interpreter module not found: {}", module.display()),
                )
                .with_suggestion(format!(
                    "Download a WASI build of the {} interpreter or set SANDBOX_{}_WASM",
                    language,
                    language.to_string().to_uppercase()
                )),
            );
        }
    }

    result
}

//! Runtime abstraction - one variant per guest language
//!
//! Every variant shares the execution host and session manager and only
//! supplies its argv/env defaults, entry file and source wrapping.

mod common;
mod javascript;
mod python;
mod snapshot;
mod validate;

pub use common::{RuntimeContext, GUEST_STATE_FILE};
pub use javascript::JavaScriptRuntime;
pub use python::PythonRuntime;
pub use snapshot::WorkspaceSnapshot;
pub use validate::{check_balance, BalanceError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::sandbox::SandboxResult;

/// Supported guest languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
}

impl Language {
    /// All languages the engine can run
    pub const ALL: [Language; 2] = [Language::Python, Language::JavaScript];

    /// Entry file written into the workspace for each execution
    pub fn entry_file(&self) -> &'static str {
        match self {
            Language::Python => "user_code.py",
            Language::JavaScript => "user_code.js",
        }
    }
}

impl std::str::FromStr for Language {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "python" | "py" | "python3" => Ok(Language::Python),
            "javascript" | "js" | "quickjs" => Ok(Language::JavaScript),
            _ => Err(crate::Error::InvalidInput(format!(
                "Unsupported language: {}",
                s
            ))),
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Language::Python => write!(f, "python"),
            Language::JavaScript => write!(f, "javascript"),
        }
    }
}

/// Per-call options for [`Runtime::execute`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecuteOptions {
    /// Run in this session instead of the runtime's default one
    #[serde(default)]
    pub session_id: Option<String>,
    /// Prepend the language's setup prelude (package paths, globals)
    #[serde(default)]
    pub inject_setup: bool,
    /// Bytes readable on the guest's stdin
    #[serde(default)]
    pub stdin: Option<Vec<u8>>,
    /// Override the session's stored `auto_persist_globals` flag
    #[serde(default)]
    pub auto_persist_globals: Option<bool>,
}

impl ExecuteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_setup(mut self) -> Self {
        self.inject_setup = true;
        self
    }

    pub fn with_stdin(mut self, stdin: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }

    pub fn with_persist_globals(mut self, persist: bool) -> Self {
        self.auto_persist_globals = Some(persist);
        self
    }
}

/// Guest-language runtime
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Language this runtime executes
    fn language(&self) -> Language;

    /// Run `source` in a session workspace.
    ///
    /// Returns `Err` only for malformed requests; anything that reached the
    /// VM is reported through the result.
    async fn execute(&self, source: &str, options: ExecuteOptions) -> Result<SandboxResult>;

    /// Best-effort static check. Never runs the code.
    fn validate_code(&self, source: &str) -> bool;
}

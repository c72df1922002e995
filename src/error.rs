//! Error types for the sandbox engine

use thiserror::Error;

/// Result type alias using the engine's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the sandbox engine.
///
/// Only malformed requests and host setup failures surface here. Anything
/// that happens once a guest module is running (traps, non-zero exits,
/// instantiation failures) is reported through `SandboxResult` instead.
#[derive(Error, Debug)]
pub enum Error {
    /// Policy rejected at construction
    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    /// Session identifier failed traversal or format checks
    #[error("Invalid session id: {0}")]
    InvalidSessionId(String),

    /// Another execution currently holds the session
    #[error("Session is in use: {0}")]
    SessionBusy(String),

    /// The virtual machine could not be set up on the host
    #[error("Host load error: {0}")]
    HostLoad(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Wasm runtime error
    #[error("Wasm runtime error: {0}")]
    Wasm(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if error is a client error (caller's fault)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidPolicy(_)
                | Error::InvalidSessionId(_)
                | Error::SessionBusy(_)
                | Error::InvalidInput(_)
                | Error::NotFound(_)
        )
    }
}

impl From<wasmtime::Error> for Error {
    fn from(err: wasmtime::Error) -> Self {
        Error::Wasm(err.to_string())
    }
}

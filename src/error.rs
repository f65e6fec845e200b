//! Bridge error types.

use std::io;

use thiserror::Error;

use crate::config::ConfigError;

/// Errors surfaced by the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Token does not identify a registered handler (never issued, or already removed)
    #[error("handle not found: {0}")]
    HandleNotFound(usize),

    /// Native runtime reported a nonzero status and fallback is disabled
    #[error("native runtime failed to start (status {0})")]
    NativeStart(i32),

    /// Failed to load the native runtime library
    #[error("failed to load native runtime: {0}")]
    NativeLoad(String),

    /// Required symbol missing from the native runtime library
    #[error("symbol not found: {0}")]
    SymbolNotFound(String),

    /// Fallback server could not bind its listener
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Fallback server stopped serving
    #[error("fallback server error: {0}")]
    Serve(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

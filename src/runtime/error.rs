//! Error types for the participant manager
//!
//! Only name allocation exhaustion (and use after dispose) reaches the caller
//! of `create`; connector and release errors are absorbed by the lifecycle
//! and surface only as phase changes and log lines.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level manager error
#[derive(Debug, Error)]
pub enum NpcError {
    /// No free candidate name was found within the retry bound
    #[error("Name allocation exhausted for '{desired}' after {attempts} attempts")]
    NameExhausted {
        /// Name requested by the caller
        desired: String,
        /// Number of candidates tried
        attempts: u32,
    },

    /// The manager has been disposed and no longer accepts participants
    #[error("Manager has been disposed")]
    Disposed,

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage-related errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Errors reported by the external connection primitive
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectError {
    /// The session refused the participant
    #[error("Connection refused: {0}")]
    Refused(String),

    /// The primitive observed the cancellation token and gave up
    #[error("Connection attempt cancelled")]
    Cancelled,

    /// Transport-level failure
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Convenience result alias for connection attempts
pub type ConnectResult<T> = std::result::Result<T, ConnectError>;

/// Errors raised while releasing a bound session handle
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReleaseError {
    /// The connector does not know the handle
    #[error("Unknown session handle {0}")]
    UnknownHandle(String),

    /// Transport-level failure during release
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Convenience result alias for handle release
pub type ReleaseResult<T> = std::result::Result<T, ReleaseError>;

/// Config persistence errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Path not found
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience result alias for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Result type using NpcError
pub type Result<T> = std::result::Result<T, NpcError>;

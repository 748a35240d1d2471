//! Custom error types for the backup engine.
//!
//! Only structural failures travel through `EngineError`. Per-file problems
//! are recorded as outcomes in the run report and never surface here.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Destination unwritable: {path}: {source}")]
    DestinationUnwritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Session directory already exists: {0}")]
    SessionExists(PathBuf),

    #[error("Destination is locked by another session (remove {0} if it is stale)")]
    SessionLocked(PathBuf),

    #[error("No source folder could be resolved")]
    EmptyCatalog,

    #[error("Backup cancelled")]
    Cancelled,

    #[error("Encryption unavailable: {0}")]
    EncryptionUnavailable(String),

    #[error("Decryption failed: wrong password or corrupted data")]
    DecryptionFailed,

    #[error("Invalid encrypted file: {0}")]
    InvalidCiphertext(String),

    #[error("Worker task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl EngineError {
    /// Wrap an I/O error raised while preparing the destination tree.
    pub fn unwritable(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EngineError::DestinationUnwritable {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

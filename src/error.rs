//! Error types for warmpool.

use std::path::PathBuf;

use thiserror::Error;

use crate::control::codec::FrameError;

/// Main error type for warmpool.
#[derive(Error, Debug)]
pub enum WarmpoolError {
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error(
        "Another supervisor is already running (pid {pid}, pidfile {}). Run 'warmpool stop' first.",
        .path.display()
    )]
    AlreadyRunning { pid: u32, path: PathBuf },

    #[error("Worker slot {slot} failed to start after {attempts} attempts: {reason}")]
    StartupFailure {
        slot: usize,
        attempts: u32,
        reason: String,
    },

    #[error(
        "No supervisor is listening on {}. Is 'warmpool start' running?",
        .0.display()
    )]
    NotRunning(PathBuf),

    #[error("Request rejected by supervisor: {0}")]
    Rejected(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("Supervisor is shutting down")]
    ShuttingDown,

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("File watch error: {0}")]
    Watch(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for warmpool operations.
pub type Result<T> = std::result::Result<T, WarmpoolError>;

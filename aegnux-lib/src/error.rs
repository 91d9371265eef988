//! Error types for aegnux

use crate::job::JobKind;
use std::path::PathBuf;
use thiserror::Error;

/// Aegnux result type
pub type Result<T> = std::result::Result<T, AegnuxError>;

/// Main error type for job operations
#[derive(Error, Debug)]
pub enum AegnuxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),

    #[error("Wine runtime error: {0}")]
    Runtime(String),

    #[error("Download error: {0}")]
    Download(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: String, got: String },

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Unsupported archive format: {0}")]
    UnsupportedArchive(PathBuf),

    #[error("Command not found: {0}")]
    CommandNotFound(String),

    #[error("Command execution failed: {command} - {error}")]
    CommandExecution { command: String, error: String },

    #[error("Command failed: {command} exited with code {code}")]
    CommandFailed { command: String, code: i32 },

    #[error("After Effects is not installed")]
    NotInstalled,

    #[error("Cannot start {requested}: {running} is still running")]
    JobBusy { requested: JobKind, running: JobKind },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Background task failed: {0}")]
    Task(String),
}

impl AegnuxError {
    /// Whether this error is a user cancellation rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AegnuxError::Cancelled)
    }
}

impl From<tokio::task::JoinError> for AegnuxError {
    fn from(err: tokio::task::JoinError) -> Self {
        AegnuxError::Task(err.to_string())
    }
}

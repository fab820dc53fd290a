//! Error types for file operations

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// The operation a lock was taken for; selects the wording of lock errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Read => f.write_str("Cannot read"),
            Operation::Write => f.write_str("Unable to write"),
        }
    }
}

/// Coarse classification of a [`SafeFileError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The lock was not obtained within the timeout
    Locked,
    /// The file does not exist
    Missing,
    /// Any other OS-level failure while opening, reading or writing
    IoFailure,
    /// Stored content could not be decoded
    ParseFailure,
    /// chown/chmod failed
    AccessChangeFailure,
}

/// Errors returned by the file operations
///
/// Every variant names the file involved; OS-level causes are kept as the
/// error source.
#[derive(Error, Debug)]
pub enum SafeFileError {
    /// Timed out waiting for the advisory lock
    #[error("{operation} {path} because it is locked")]
    Locked {
        operation: Operation,
        path: PathBuf,
        timeout: Duration,
    },

    /// The file does not exist
    #[error("Cannot read {path}")]
    Missing { path: PathBuf },

    /// Reading failed for a reason other than the file being absent
    #[error("Cannot read {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Opening, writing, flushing or renaming failed
    #[error("Unable to write {path} with {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Stored content is not valid JSON
    #[error("Cannot parse {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Data could not be encoded as JSON
    #[error("Unable to write {path} with {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// chown/chmod failed, including when the file does not exist
    #[error("Unable to change access on {path}")]
    AccessChange {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SafeFileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SafeFileError::Locked { .. } => ErrorKind::Locked,
            SafeFileError::Missing { .. } => ErrorKind::Missing,
            SafeFileError::Read { .. } | SafeFileError::Write { .. } => ErrorKind::IoFailure,
            SafeFileError::Parse { .. } => ErrorKind::ParseFailure,
            SafeFileError::Encode { .. } => ErrorKind::IoFailure,
            SafeFileError::AccessChange { .. } => ErrorKind::AccessChangeFailure,
        }
    }

    /// The file the failed operation was working on
    pub fn path(&self) -> &Path {
        match self {
            SafeFileError::Locked { path, .. }
            | SafeFileError::Missing { path }
            | SafeFileError::Read { path, .. }
            | SafeFileError::Write { path, .. }
            | SafeFileError::Parse { path, .. }
            | SafeFileError::Encode { path, .. }
            | SafeFileError::AccessChange { path, .. } => path,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.kind() == ErrorKind::Locked
    }
}

/// Result type alias for file operations
pub type Result<T> = std::result::Result<T, SafeFileError>;

//! Error types for the transfer engine.
//!
//! `EngineError` is the rich error produced by filesystem and hashing
//! operations. It wraps `io::Error` and is therefore not `Clone`, so the queue
//! converts it into a `JobError` before attaching it to a `TransferJob`.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the engine's building blocks.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The source tree could not be listed.
    #[error("Failed to enumerate directory: {}", .path.display())]
    EnumerationFailed { path: PathBuf, source: io::Error },

    /// Failed to read from a source (or verified destination) file.
    #[error("Failed to read file: {}", .path.display())]
    ReadError { path: PathBuf, source: io::Error },

    /// Failed to write to a destination file.
    #[error("Failed to write file: {}", .path.display())]
    WriteError { path: PathBuf, source: io::Error },

    /// Failed to create a directory.
    #[error("Failed to create directory: {}", .path.display())]
    DirectoryCreationFailed { path: PathBuf, source: io::Error },

    /// Failed to delete an existing destination tree (Replace).
    #[error("Failed to remove existing destination: {}", .path.display())]
    RemoveFailed { path: PathBuf, source: io::Error },

    /// A destination file's digest differs from the digest recorded while copying.
    #[error("Checksum mismatch for {}: expected {expected}, got {actual}", .path.display())]
    IntegrityMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// A copied file has no recorded digest to verify against.
    #[error("No checksum recorded for {}", .path.display())]
    MissingChecksum { path: PathBuf },

    /// The conflict decision surface gave no answer.
    #[error("No conflict resolution chosen for {}", .path.display())]
    ConflictUnresolved { path: PathBuf },

    /// The configuration file could not be read.
    #[error("Failed to read config file: {}", .path.display())]
    ConfigRead { path: PathBuf, source: io::Error },

    /// The configuration file is not valid TOML for `EngineConfig`.
    #[error("Invalid config file {}: {message}", .path.display())]
    ConfigParse { path: PathBuf, message: String },

    /// A background thread could not be started.
    #[error("Failed to start {name} thread")]
    ThreadSpawn {
        name: &'static str,
        source: io::Error,
    },

    /// The engine thread is no longer running.
    #[error("Transfer queue has shut down")]
    QueueClosed,
}

impl EngineError {
    /// Extract the OS error code from this error, if available.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::EnumerationFailed { source, .. }
            | Self::ReadError { source, .. }
            | Self::WriteError { source, .. }
            | Self::DirectoryCreationFailed { source, .. }
            | Self::RemoveFailed { source, .. }
            | Self::ConfigRead { source, .. }
            | Self::ThreadSpawn { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }

    /// True for post-copy verification failures.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            Self::IntegrityMismatch { .. } | Self::MissingChecksum { .. }
        )
    }
}

/// Failure reason attached to a `TransferJob`.
///
/// Unlike `EngineError` this is cloneable, so job snapshots can be handed to
/// observers and decision providers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    /// Read, write or mkdir failure while preparing, copying or verifying.
    Io { message: String, os_code: Option<i32> },
    /// Verification failed; `path` is the first offending destination file.
    Integrity { path: PathBuf, message: String },
}

impl JobError {
    pub fn message(&self) -> &str {
        match self {
            Self::Io { message, .. } | Self::Integrity { message, .. } => message,
        }
    }
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { message, .. } => write!(f, "I/O error: {}", message),
            Self::Integrity { message, .. } => write!(f, "Integrity failure: {}", message),
        }
    }
}

impl From<&EngineError> for JobError {
    fn from(err: &EngineError) -> Self {
        match err {
            EngineError::IntegrityMismatch { path, .. } | EngineError::MissingChecksum { path } => {
                JobError::Integrity {
                    path: path.clone(),
                    message: err.to_string(),
                }
            }
            other => {
                // Keep the underlying OS message; the Display above only names the path.
                let message = match std::error::Error::source(other) {
                    Some(source) => format!("{} ({})", other, source),
                    None => other.to_string(),
                };
                JobError::Io {
                    message,
                    os_code: other.raw_os_error(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_keeps_os_message() {
        let err = EngineError::ReadError {
            path: PathBuf::from("/cards/A001/clip.mxf"),
            source: io::Error::new(io::ErrorKind::Other, "device not configured"),
        };
        let job_err = JobError::from(&err);
        match job_err {
            JobError::Io { ref message, .. } => {
                assert!(message.contains("clip.mxf"));
                assert!(message.contains("device not configured"));
            }
            other => panic!("expected Io, got {:?}", other),
        }
    }

    #[test]
    fn test_integrity_error_names_file() {
        let err = EngineError::IntegrityMismatch {
            path: PathBuf::from("/dst/clip.mxf"),
            expected: "aa".to_string(),
            actual: "bb".to_string(),
        };
        assert!(err.is_integrity_failure());
        let job_err = JobError::from(&err);
        assert_eq!(
            job_err,
            JobError::Integrity {
                path: PathBuf::from("/dst/clip.mxf"),
                message: err.to_string(),
            }
        );
        assert!(job_err.to_string().starts_with("Integrity failure"));
    }
}

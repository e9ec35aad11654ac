//! Core data model for transfer jobs.
//!
//! This module defines the main data structures for representing offloads:
//! - TransferJob: one source tree copied into one destination tree
//! - FileEntry: a single regular file within a job
//! - TransferStatus, FileStatus: lifecycle enums
//! - Volume: the descriptor a volume/folder provider hands to the queue

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::checksums::{ChecksumAlgorithm, ChecksumValue};
use crate::error::JobError;

/// Opaque, stable identifier of a job.
pub type JobId = Uuid;

/// A mounted volume or manually chosen folder.
///
/// Only `name` and `root_path` matter to the queue; the capacity fields are
/// carried for callers that display them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    pub name: String,
    pub root_path: PathBuf,
    pub is_removable: bool,
    pub total_bytes: u64,
    pub free_bytes: u64,
}

impl Volume {
    /// Describe a plain folder, naming it after its last path component.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        let root_path = path.as_ref().to_path_buf();
        let name = root_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| root_path.to_string_lossy().into_owned());
        Volume {
            name,
            root_path,
            is_removable: false,
            total_bytes: 0,
            free_bytes: 0,
        }
    }
}

/// One transfer: a source tree mirrored under a destination directory.
#[derive(Debug, Clone)]
pub struct TransferJob {
    /// Unique identifier for this job
    pub id: JobId,

    /// Display name of the source volume or folder
    pub source_name: String,

    /// Root source directory
    pub source_path: PathBuf,

    /// Directory the job was submitted against (the destination volume root)
    pub destination_root: PathBuf,

    /// `destination_root/<source_name>_<token>`, renamed only by KeepBoth
    pub destination_path: PathBuf,

    /// Sum of all file sizes, 0 until enumeration completes
    pub total_size: u64,

    /// Bytes written so far in the current attempt
    pub copied_size: u64,

    pub status: TransferStatus,

    /// Files in enumeration order
    pub files: Vec<FileEntry>,

    /// False while the job is still a placeholder awaiting enumeration
    pub enumerated: bool,

    /// Set once Preparing has made the destination ready. A retried job
    /// reuses its own partial destination instead of treating it as a conflict.
    pub destination_created: bool,

    /// Digest used for this job, fixed at submission
    pub checksum_algorithm: ChecksumAlgorithm,

    pub error: Option<JobError>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TransferJob {
    /// Fraction of bytes copied, 0.0 when the total is unknown or zero.
    pub fn progress(&self) -> f64 {
        if self.total_size == 0 {
            return 0.0;
        }
        self.copied_size as f64 / self.total_size as f64
    }

    /// Last component of the destination path.
    pub fn destination_name(&self) -> String {
        self.destination_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// A single regular file within a job.
#[derive(Debug, Clone)]
pub struct FileEntry {
    /// Full source path
    pub source_path: PathBuf,

    /// Path relative to the job's source root, no leading separator
    pub relative_path: PathBuf,

    /// Full destination path (`job.destination_path` joined with `relative_path`)
    pub destination_path: PathBuf,

    pub size: u64,

    /// Digest of the bytes streamed to the destination, set once the copy finishes
    pub checksum: Option<ChecksumValue>,

    pub status: FileStatus,
}

/// Lifecycle of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferStatus {
    Queued,
    Preparing,
    Transferring,
    Verifying,
    Completed,
    Failed,
    Cancelled,
}

impl TransferStatus {
    /// Preparing, Transferring or Verifying. At most one job is ever active.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            TransferStatus::Preparing | TransferStatus::Transferring | TransferStatus::Verifying
        )
    }

    /// Completed, Failed or Cancelled. A Failed job leaves this set only on Retry.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferStatus::Completed | TransferStatus::Failed | TransferStatus::Cancelled
        )
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferStatus::Queued => "Queued",
            TransferStatus::Preparing => "Preparing",
            TransferStatus::Transferring => "Transferring",
            TransferStatus::Verifying => "Verifying",
            TransferStatus::Completed => "Completed",
            TransferStatus::Failed => "Failed",
            TransferStatus::Cancelled => "Cancelled",
        };
        write!(f, "{}", name)
    }
}

/// The state of an individual file within a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    /// Not yet copied
    Queued,
    /// Copied, digest recorded
    Completed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_from_path_uses_last_component() {
        let volume = Volume::from_path("/Volumes/A001_C002");
        assert_eq!(volume.name, "A001_C002");
        assert_eq!(volume.root_path, PathBuf::from("/Volumes/A001_C002"));
        assert!(!volume.is_removable);
    }

    #[test]
    fn test_status_classification() {
        assert!(TransferStatus::Preparing.is_active());
        assert!(TransferStatus::Transferring.is_active());
        assert!(TransferStatus::Verifying.is_active());
        assert!(!TransferStatus::Queued.is_active());
        assert!(!TransferStatus::Queued.is_terminal());
        assert!(TransferStatus::Failed.is_terminal());
        assert!(TransferStatus::Cancelled.is_terminal());
        assert_eq!(TransferStatus::Verifying.to_string(), "Verifying");
    }
}

//! Job construction and bookkeeping.
//!
//! This module provides the job-level steps the queue applies:
//! - Naming a job's destination directory
//! - Creating the placeholder job on submission
//! - Planning a job from enumeration results
//! - Recording finished files
//! - Rebasing onto a KeepBoth path and resetting for Retry

use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use crate::checksums::{ChecksumAlgorithm, ChecksumValue};
use crate::fs_ops::EnumeratedFile;
use crate::model::{FileEntry, FileStatus, TransferJob, TransferStatus, Volume};

/// Produces destination tokens that never repeat within a process.
///
/// Tokens are UTC timestamps with millisecond precision. When two
/// submissions fall in the same millisecond, the later one is bumped forward
/// so every token is strictly greater than the previous one.
#[derive(Debug, Default)]
pub struct TokenClock {
    last_ms: i64,
}

impl TokenClock {
    pub fn new() -> Self {
        TokenClock::default()
    }

    pub fn next_token(&mut self) -> String {
        self.next_token_at(Utc::now())
    }

    pub fn next_token_at(&mut self, now: DateTime<Utc>) -> String {
        let mut ms = now.timestamp_millis();
        if ms <= self.last_ms {
            ms = self.last_ms + 1;
        }
        self.last_ms = ms;

        let stamp = Utc.timestamp_millis_opt(ms).single().unwrap_or(now);
        stamp.format("%Y%m%d-%H%M%S-%3f").to_string()
    }
}

/// `<root>/<source_name>_<token>`
pub fn destination_for(root: &Path, source_name: &str, token: &str) -> PathBuf {
    root.join(format!("{}_{}", source_name, token))
}

/// Create the placeholder job for a submission.
///
/// The job has no files and a total size of 0 until `plan_job` runs.
pub fn create_job(
    source: &Volume,
    destination: &Volume,
    token: &str,
    checksum_algorithm: ChecksumAlgorithm,
) -> TransferJob {
    TransferJob {
        id: Uuid::new_v4(),
        source_name: source.name.clone(),
        source_path: source.root_path.clone(),
        destination_root: destination.root_path.clone(),
        destination_path: destination_for(&destination.root_path, &source.name, token),
        total_size: 0,
        copied_size: 0,
        status: TransferStatus::Queued,
        files: Vec::new(),
        enumerated: false,
        destination_created: false,
        checksum_algorithm,
        error: None,
        created_at: Utc::now(),
        started_at: None,
        finished_at: None,
    }
}

/// Populate a placeholder from enumeration results.
pub fn plan_job(job: &mut TransferJob, files: Vec<EnumeratedFile>) {
    job.files = files
        .into_iter()
        .map(|file| FileEntry {
            destination_path: job.destination_path.join(&file.relative_path),
            source_path: file.path,
            relative_path: file.relative_path,
            size: file.size,
            checksum: None,
            status: FileStatus::Queued,
        })
        .collect();
    job.total_size = job.files.iter().map(|f| f.size).sum();
    job.enumerated = true;
}

/// Move a job onto a new destination directory (KeepBoth).
pub fn rebase_destination(job: &mut TransferJob, destination: PathBuf) {
    for file in &mut job.files {
        file.destination_path = destination.join(&file.relative_path);
    }
    job.destination_path = destination;
}

/// Mark file `index` copied with the digest of the `bytes` streamed.
///
/// A source that changed size after enumeration moves the file size and the
/// job total with it, so `copied_size` always equals the sum of completed
/// file sizes.
pub fn complete_file(job: &mut TransferJob, index: usize, checksum: ChecksumValue, bytes: u64) {
    let Some(file) = job.files.get_mut(index) else {
        return;
    };
    if file.size != bytes {
        job.total_size = job.total_size.saturating_sub(file.size) + bytes;
        file.size = bytes;
    }
    file.checksum = Some(checksum);
    file.status = FileStatus::Completed;

    job.copied_size = job
        .files
        .iter()
        .filter(|f| f.status == FileStatus::Completed)
        .map(|f| f.size)
        .sum();
}

/// Return a failed job to Queued, keeping its file list.
pub fn reset_for_retry(job: &mut TransferJob) {
    job.status = TransferStatus::Queued;
    job.copied_size = 0;
    job.error = None;
    job.finished_at = None;
    for file in &mut job.files {
        file.checksum = None;
        file.status = FileStatus::Queued;
    }
}

/// Same source and same destination volume as `job`.
pub fn is_duplicate_of(job: &TransferJob, source_path: &Path, destination_root: &Path) -> bool {
    job.source_path == source_path && job.destination_root == destination_root
}

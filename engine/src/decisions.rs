//! Decision surfaces consulted by the queue.
//!
//! The engine never assumes who answers: a terminal prompt, a GUI dialog or a
//! fixed policy all implement [`Decisions`]. Both methods are called from the
//! queue's I/O worker, so a slow (interactive) answer holds up the active job
//! only; submissions, enumeration and snapshots keep working meanwhile.

use std::path::PathBuf;

use crate::error::JobError;
use crate::model::{JobId, TransferJob};

/// A job's destination directory already exists before copying starts.
#[derive(Debug, Clone)]
pub struct Conflict {
    pub job_id: JobId,
    /// The occupied destination path
    pub destination: PathBuf,
    /// Its last path component
    pub name: String,
}

/// Answer to a [`Conflict`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictChoice {
    /// Delete the existing tree and recreate it empty
    Replace,
    /// Copy into a new `<name>_<n>` sibling, leaving the existing tree alone
    KeepBoth,
    /// Cancel the job without touching the filesystem
    Skip,
}

/// A job has failed and the queue waits for instructions.
#[derive(Debug, Clone)]
pub struct Failure {
    /// Snapshot of the failed job
    pub job: TransferJob,
    pub error: JobError,
}

/// Answer to a [`Failure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureChoice {
    /// Requeue the job with its file list, resetting progress and error
    Retry,
    /// Leave the job Failed and continue with the next queued job
    Skip,
    /// Halt the queue; queued jobs stay queued
    Stop,
}

/// Caller-supplied decision provider.
///
/// Returning `None` means no valid answer was obtained. The queue then
/// skips a conflicting job (never replaces) and stops on a failure.
pub trait Decisions: Send + Sync {
    fn resolve_conflict(&self, conflict: &Conflict) -> Option<ConflictChoice>;

    fn resolve_failure(&self, failure: &Failure) -> Option<FailureChoice>;
}

/// Fixed answers, for unattended runs.
#[derive(Debug, Clone, Copy)]
pub struct PolicyDecisions {
    pub on_conflict: Option<ConflictChoice>,
    pub on_failure: Option<FailureChoice>,
}

impl PolicyDecisions {
    pub fn new(on_conflict: ConflictChoice, on_failure: FailureChoice) -> Self {
        PolicyDecisions {
            on_conflict: Some(on_conflict),
            on_failure: Some(on_failure),
        }
    }
}

impl Default for PolicyDecisions {
    /// Keep both copies and move past failures; nothing is ever deleted.
    fn default() -> Self {
        PolicyDecisions::new(ConflictChoice::KeepBoth, FailureChoice::Skip)
    }
}

impl Decisions for PolicyDecisions {
    fn resolve_conflict(&self, _conflict: &Conflict) -> Option<ConflictChoice> {
        self.on_conflict
    }

    fn resolve_failure(&self, _failure: &Failure) -> Option<FailureChoice> {
        self.on_failure
    }
}

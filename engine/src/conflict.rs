//! Destination conflict handling.
//!
//! A conflict exists when a job's destination directory is already on disk
//! before the first file is copied. The check runs once per job; nothing here
//! is consulted mid-copy.
//!
//! The existence check and the following create/rename are not atomic: an
//! external process may create or remove the directory in between.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::decisions::{Conflict, ConflictChoice, Decisions};
use crate::error::EngineError;
use crate::fs_ops;
use crate::model::JobId;

/// How a job's destination was made ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// No conflict; the destination was created
    Clear,
    /// The existing tree was deleted and recreated empty
    Replace,
    /// A fresh sibling directory was created; the job must adopt this path
    KeepBoth(PathBuf),
    /// The job is to be cancelled; nothing was touched
    Skip,
}

/// First `"<path>_<n>"` with `n >= 2` whose name is free. A dangling
/// symlink counts as taken.
pub fn unique_sibling(path: &Path) -> PathBuf {
    let base = path.as_os_str().to_os_string();
    let mut counter: u32 = 2;
    loop {
        let mut candidate = base.clone();
        candidate.push(format!("_{}", counter));
        let candidate = PathBuf::from(candidate);
        if fs::symlink_metadata(&candidate).is_err() {
            return candidate;
        }
        counter += 1;
    }
}

/// Resolves destination conflicts through a [`Decisions`] provider.
pub struct ConflictResolver<'a> {
    decisions: &'a dyn Decisions,
}

impl<'a> ConflictResolver<'a> {
    pub fn new(decisions: &'a dyn Decisions) -> Self {
        ConflictResolver { decisions }
    }

    /// Ask the provider what to do with an occupied destination.
    ///
    /// An unanswered conflict becomes `Skip`.
    pub fn decide(&self, job_id: JobId, destination: &Path) -> ConflictChoice {
        let conflict = Conflict {
            job_id,
            destination: destination.to_path_buf(),
            name: destination
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };

        match self.decisions.resolve_conflict(&conflict) {
            Some(choice) => choice,
            None => {
                let err = EngineError::ConflictUnresolved {
                    path: destination.to_path_buf(),
                };
                warn!(job = %job_id, "{}; skipping job", err);
                ConflictChoice::Skip
            }
        }
    }

    /// Make `destination` ready for copying, consulting the provider if it
    /// already exists.
    pub fn prepare(&self, job_id: JobId, destination: &Path) -> Result<Resolution, EngineError> {
        self.prepare_if(job_id, destination, || true)
    }

    /// Like `prepare`, but `still_wanted` is asked again once the provider
    /// has answered. If the job was withdrawn while the question was open,
    /// the answer is dropped and nothing on disk changes.
    pub fn prepare_if<F>(
        &self,
        job_id: JobId,
        destination: &Path,
        still_wanted: F,
    ) -> Result<Resolution, EngineError>
    where
        F: Fn() -> bool,
    {
        // symlink_metadata: a dangling link still occupies the name.
        if fs::symlink_metadata(destination).is_err() {
            fs_ops::ensure_dir_exists(destination)?;
            return Ok(Resolution::Clear);
        }

        let choice = self.decide(job_id, destination);
        if !still_wanted() {
            info!(job = %job_id, ?choice, "job withdrawn while deciding, answer dropped");
            return Ok(Resolution::Skip);
        }

        match choice {
            ConflictChoice::Replace => {
                info!(job = %job_id, path = %destination.display(), "replacing existing destination");
                remove_existing(destination)?;
                fs_ops::ensure_dir_exists(destination)?;
                Ok(Resolution::Replace)
            }
            ConflictChoice::KeepBoth => {
                // Computed after the answer arrives; the provider may have taken a while.
                let renamed = unique_sibling(destination);
                info!(job = %job_id, path = %renamed.display(), "keeping both, using new destination");
                fs_ops::ensure_dir_exists(&renamed)?;
                Ok(Resolution::KeepBoth(renamed))
            }
            ConflictChoice::Skip => {
                info!(job = %job_id, path = %destination.display(), "destination exists, skipping job");
                Ok(Resolution::Skip)
            }
        }
    }
}

fn remove_existing(path: &Path) -> Result<(), EngineError> {
    let is_dir = fs::symlink_metadata(path)
        .map(|metadata| metadata.is_dir())
        .unwrap_or(false);
    let result = if is_dir {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    result.map_err(|e| EngineError::RemoveFailed {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decisions::{FailureChoice, PolicyDecisions};
    use uuid::Uuid;

    fn policy(choice: Option<ConflictChoice>) -> PolicyDecisions {
        PolicyDecisions {
            on_conflict: choice,
            on_failure: Some(FailureChoice::Stop),
        }
    }

    #[test]
    fn test_unique_sibling_starts_at_two() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let dest = temp_dir.path().join("A001_20261019");
        fs::create_dir(&dest).expect("Failed to create dir");

        assert_eq!(unique_sibling(&dest), temp_dir.path().join("A001_20261019_2"));
    }

    #[test]
    fn test_unique_sibling_skips_occupied_names() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let dest = temp_dir.path().join("card");
        fs::create_dir(&dest).expect("Failed to create dir");
        for n in 2..=5 {
            fs::create_dir(temp_dir.path().join(format!("card_{}", n)))
                .expect("Failed to create dir");
        }

        assert_eq!(unique_sibling(&dest), temp_dir.path().join("card_6"));
        // Nothing was created, so asking again gives the same answer.
        assert_eq!(unique_sibling(&dest), temp_dir.path().join("card_6"));
    }

    #[cfg(unix)]
    #[test]
    fn test_unique_sibling_skips_dangling_symlink() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let dest = temp_dir.path().join("card");
        fs::create_dir(&dest).expect("Failed to create dir");
        std::os::unix::fs::symlink(temp_dir.path().join("gone"), temp_dir.path().join("card_2"))
            .expect("Failed to create symlink");

        assert_eq!(unique_sibling(&dest), temp_dir.path().join("card_3"));

        let decisions = policy(Some(ConflictChoice::KeepBoth));
        let resolution = ConflictResolver::new(&decisions)
            .prepare(Uuid::new_v4(), &dest)
            .expect("Prepare should succeed");
        let renamed = temp_dir.path().join("card_3");
        assert_eq!(resolution, Resolution::KeepBoth(renamed.clone()));
        assert!(renamed.is_dir());
        assert!(fs::symlink_metadata(temp_dir.path().join("card_2"))
            .expect("Symlink should remain")
            .file_type()
            .is_symlink());
    }

    #[test]
    fn test_prepare_without_conflict_creates_destination() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let dest = temp_dir.path().join("volume").join("card_x");
        let decisions = policy(None);

        let resolution = ConflictResolver::new(&decisions)
            .prepare(Uuid::new_v4(), &dest)
            .expect("Prepare should succeed");
        assert_eq!(resolution, Resolution::Clear);
        assert!(dest.is_dir());
    }

    #[test]
    fn test_prepare_replace_empties_destination() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let dest = temp_dir.path().join("card");
        fs::create_dir_all(dest.join("old")).expect("Failed to create dir");
        fs::write(dest.join("old").join("stale.mov"), b"stale").expect("Failed to write");
        let decisions = policy(Some(ConflictChoice::Replace));

        let resolution = ConflictResolver::new(&decisions)
            .prepare(Uuid::new_v4(), &dest)
            .expect("Prepare should succeed");
        assert_eq!(resolution, Resolution::Replace);
        assert!(dest.is_dir());
        assert_eq!(fs::read_dir(&dest).expect("Failed to list").count(), 0);
    }

    #[test]
    fn test_prepare_keep_both_leaves_original_untouched() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let dest = temp_dir.path().join("card");
        fs::create_dir(&dest).expect("Failed to create dir");
        fs::write(dest.join("keep.mov"), b"keep").expect("Failed to write");
        let decisions = policy(Some(ConflictChoice::KeepBoth));

        let resolution = ConflictResolver::new(&decisions)
            .prepare(Uuid::new_v4(), &dest)
            .expect("Prepare should succeed");
        let renamed = temp_dir.path().join("card_2");
        assert_eq!(resolution, Resolution::KeepBoth(renamed.clone()));
        assert!(renamed.is_dir());
        assert_eq!(fs::read(dest.join("keep.mov")).expect("Failed to read"), b"keep");
    }

    #[test]
    fn test_prepare_skip_touches_nothing() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let dest = temp_dir.path().join("card");
        fs::create_dir(&dest).expect("Failed to create dir");
        fs::write(dest.join("keep.mov"), b"keep").expect("Failed to write");
        let decisions = policy(Some(ConflictChoice::Skip));

        let resolution = ConflictResolver::new(&decisions)
            .prepare(Uuid::new_v4(), &dest)
            .expect("Prepare should succeed");
        assert_eq!(resolution, Resolution::Skip);
        assert!(!temp_dir.path().join("card_2").exists());
        assert_eq!(fs::read(dest.join("keep.mov")).expect("Failed to read"), b"keep");
    }

    #[test]
    fn test_unanswered_conflict_is_skip_not_replace() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let dest = temp_dir.path().join("card");
        fs::create_dir(&dest).expect("Failed to create dir");
        fs::write(dest.join("keep.mov"), b"keep").expect("Failed to write");
        let decisions = policy(None);

        let resolution = ConflictResolver::new(&decisions)
            .prepare(Uuid::new_v4(), &dest)
            .expect("Prepare should succeed");
        assert_eq!(resolution, Resolution::Skip);
        assert!(dest.join("keep.mov").exists());
    }

    #[test]
    fn test_withdrawn_job_drops_replace_answer() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let dest = temp_dir.path().join("card");
        fs::create_dir(&dest).expect("Failed to create dir");
        fs::write(dest.join("keep.mov"), b"keep").expect("Failed to write");
        let decisions = policy(Some(ConflictChoice::Replace));

        let resolution = ConflictResolver::new(&decisions)
            .prepare_if(Uuid::new_v4(), &dest, || false)
            .expect("Prepare should succeed");
        assert_eq!(resolution, Resolution::Skip);
        assert_eq!(fs::read(dest.join("keep.mov")).expect("Failed to read"), b"keep");
    }
}

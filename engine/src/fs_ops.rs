//! Filesystem operations module.
//!
//! This module provides low-level operations for:
//! - Enumerating the regular files of a source tree
//! - Streaming a file to its destination while hashing it
//! - Creating directories recursively

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::checksums::{create_hasher, ChecksumAlgorithm, ChecksumValue};
use crate::error::EngineError;

/// A regular file found under a source root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumeratedFile {
    /// Absolute source path
    pub path: PathBuf,
    pub size: u64,
    /// Root-relative path, no leading separator
    pub relative_path: PathBuf,
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

/// Enumerate the regular files under `root`.
///
/// Hidden entries (dot-files and dot-directories), symlinks and anything that
/// is not a regular file are skipped. Entries are visited in byte-wise name
/// order so the resulting list is stable across runs.
///
/// # Errors
/// Returns `EnumerationFailed` if `root` itself cannot be listed. Unreadable
/// entries below the root are logged and skipped.
pub fn enumerate_tree(root: &Path) -> Result<Vec<EnumeratedFile>, EngineError> {
    let mut files = Vec::new();

    fn recurse(
        dir: &Path,
        rel_dir: &Path,
        files: &mut Vec<EnumeratedFile>,
    ) -> Result<(), EngineError> {
        let entries = fs::read_dir(dir).map_err(|e| EngineError::EnumerationFailed {
            path: dir.to_path_buf(),
            source: e,
        })?;

        let mut entries: Vec<fs::DirEntry> = entries
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "skipping unreadable entry");
                    None
                }
            })
            .collect();
        entries.sort_by_key(|entry| entry.file_name());

        for entry in entries {
            let file_name = entry.file_name();
            if is_hidden(&file_name) {
                continue;
            }

            // DirEntry::file_type does not follow symlinks.
            let file_type = match entry.file_type() {
                Ok(file_type) => file_type,
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "skipping entry");
                    continue;
                }
            };

            let entry_path = entry.path();
            let rel_path = rel_dir.join(&file_name);

            if file_type.is_dir() {
                if let Err(e) = recurse(&entry_path, &rel_path, files) {
                    warn!(path = %entry_path.display(), error = %e, "skipping unreadable directory");
                }
            } else if file_type.is_file() {
                match entry.metadata() {
                    Ok(metadata) => files.push(EnumeratedFile {
                        path: entry_path,
                        size: metadata.len(),
                        relative_path: rel_path,
                    }),
                    Err(e) => {
                        warn!(path = %entry_path.display(), error = %e, "skipping file");
                    }
                }
            }
        }

        Ok(())
    }

    recurse(root, Path::new(""), &mut files)?;
    Ok(files)
}

/// Stream `src` into `dst` through a `buffer_size` buffer, hashing every chunk.
///
/// Each chunk is fed to the hasher and written to the destination before the
/// next read. `progress` receives the byte count of every chunk once it has
/// been written. The source modification time is carried over on success.
///
/// # Errors
/// Read failures map to `ReadError`, create/write failures to `WriteError`.
/// Bytes already written are left in place.
pub fn copy_file<F>(
    src: &Path,
    dst: &Path,
    algorithm: ChecksumAlgorithm,
    buffer_size: usize,
    mut progress: F,
) -> Result<ChecksumValue, EngineError>
where
    F: FnMut(u64),
{
    let mut src_file = fs::File::open(src).map_err(|e| EngineError::ReadError {
        path: src.to_path_buf(),
        source: e,
    })?;

    let src_mtime = src_file
        .metadata()
        .ok()
        .and_then(|metadata| metadata.modified().ok());

    let mut dst_file = fs::File::create(dst).map_err(|e| EngineError::WriteError {
        path: dst.to_path_buf(),
        source: e,
    })?;

    let mut buffer = vec![0u8; buffer_size.max(1)];
    let mut hasher = create_hasher(algorithm);

    loop {
        let n = match src_file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(EngineError::ReadError {
                    path: src.to_path_buf(),
                    source: e,
                })
            }
        };

        let chunk = &buffer[..n];
        hasher.update(chunk);
        dst_file
            .write_all(chunk)
            .map_err(|e| EngineError::WriteError {
                path: dst.to_path_buf(),
                source: e,
            })?;

        progress(n as u64);
    }

    dst_file.flush().map_err(|e| EngineError::WriteError {
        path: dst.to_path_buf(),
        source: e,
    })?;
    drop(dst_file);

    if let Some(mtime) = src_mtime {
        let _ = filetime::set_file_mtime(dst, filetime::FileTime::from_system_time(mtime));
    }

    Ok(hasher.finalize())
}

/// Ensure the parent directory of a path exists, creating it if necessary.
pub fn ensure_parent_dir_exists(path: &Path) -> Result<(), EngineError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => ensure_dir_exists(parent),
        _ => Ok(()),
    }
}

/// Ensure `dir` exists as a directory, creating missing ancestors.
pub fn ensure_dir_exists(dir: &Path) -> Result<(), EngineError> {
    match fs::metadata(dir) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(EngineError::DirectoryCreationFailed {
            path: dir.to_path_buf(),
            source: io::Error::new(
                io::ErrorKind::AlreadyExists,
                "path exists but is not a directory",
            ),
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(dir).map_err(|e| EngineError::DirectoryCreationFailed {
                path: dir.to_path_buf(),
                source: e,
            })
        }
        Err(e) => Err(EngineError::DirectoryCreationFailed {
            path: dir.to_path_buf(),
            source: e,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksums::{compute_file_checksum, DEFAULT_BUFFER_SIZE};

    #[test]
    fn test_enumerate_nested_directory() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("card");
        fs::create_dir_all(src.join("DCIM").join("100MEDIA")).expect("Failed to create dirs");

        fs::write(src.join("readme.txt"), b"data1").expect("Failed to write file");
        fs::write(src.join("DCIM").join("100MEDIA").join("C0001.MP4"), b"clip-bytes")
            .expect("Failed to write file");

        let files = enumerate_tree(&src).expect("Failed to enumerate");

        let rel: Vec<PathBuf> = files.iter().map(|f| f.relative_path.clone()).collect();
        assert_eq!(
            rel,
            vec![
                PathBuf::from("DCIM").join("100MEDIA").join("C0001.MP4"),
                PathBuf::from("readme.txt"),
            ]
        );
        assert_eq!(files[0].size, 10);
        assert_eq!(files[0].path, src.join("DCIM").join("100MEDIA").join("C0001.MP4"));
        assert!(files.iter().all(|f| !f.relative_path.has_root()));
    }

    #[test]
    fn test_enumerate_skips_hidden_entries() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path();
        fs::write(src.join(".DS_Store"), b"junk").expect("Failed to write file");
        fs::create_dir(src.join(".Spotlight-V100")).expect("Failed to create dir");
        fs::write(src.join(".Spotlight-V100").join("store.db"), b"junk")
            .expect("Failed to write file");
        fs::write(src.join("clip.mov"), b"movie").expect("Failed to write file");

        let files = enumerate_tree(src).expect("Failed to enumerate");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative_path, PathBuf::from("clip.mov"));
    }

    #[cfg(unix)]
    #[test]
    fn test_enumerate_skips_symlinks() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let outside = temp_dir.path().join("outside");
        fs::create_dir(&outside).expect("Failed to create dir");
        fs::write(outside.join("big.bin"), b"not part of the card").expect("Failed to write");

        let src = temp_dir.path().join("card");
        fs::create_dir(&src).expect("Failed to create dir");
        fs::write(src.join("clip.mov"), b"movie").expect("Failed to write file");
        std::os::unix::fs::symlink(&outside, src.join("linked_dir")).expect("Failed to link");
        std::os::unix::fs::symlink(outside.join("big.bin"), src.join("linked_file"))
            .expect("Failed to link");

        let files = enumerate_tree(&src).expect("Failed to enumerate");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative_path, PathBuf::from("clip.mov"));
    }

    #[test]
    fn test_enumerate_nonexistent_source() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let result = enumerate_tree(&temp_dir.path().join("nonexistent"));
        assert!(matches!(result, Err(EngineError::EnumerationFailed { .. })));
    }

    #[test]
    fn test_copy_file_reports_chunks_and_digest() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src_file = temp_dir.path().join("source.txt");
        let dst_file = temp_dir.path().join("dest.txt");
        fs::write(&src_file, b"test content").expect("Failed to write source");

        let mut chunks = Vec::new();
        let checksum = copy_file(&src_file, &dst_file, ChecksumAlgorithm::Sha256, 5, |n| {
            chunks.push(n)
        })
        .expect("Failed to copy");

        assert_eq!(chunks, vec![5, 5, 2]);
        assert_eq!(fs::read(&dst_file).expect("Failed to read dest"), b"test content");
        assert_eq!(
            checksum,
            compute_file_checksum(&dst_file, ChecksumAlgorithm::Sha256, DEFAULT_BUFFER_SIZE)
                .expect("Failed to hash dest")
        );
    }

    #[test]
    fn test_copy_file_empty_source() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src_file = temp_dir.path().join("empty");
        let dst_file = temp_dir.path().join("empty.copy");
        fs::write(&src_file, b"").expect("Failed to write source");

        let mut calls = 0;
        let checksum = copy_file(&src_file, &dst_file, ChecksumAlgorithm::Xxh3, 1024, |_| {
            calls += 1
        })
        .expect("Failed to copy");

        assert_eq!(calls, 0);
        assert!(dst_file.exists());
        assert_eq!(checksum.algorithm(), ChecksumAlgorithm::Xxh3);
    }

    #[test]
    fn test_copy_file_missing_source_is_read_error() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let result = copy_file(
            &temp_dir.path().join("gone"),
            &temp_dir.path().join("dest"),
            ChecksumAlgorithm::Sha256,
            DEFAULT_BUFFER_SIZE,
            |_| {},
        );
        assert!(matches!(result, Err(EngineError::ReadError { .. })));
    }

    #[test]
    fn test_copy_file_unwritable_destination_is_write_error() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src_file = temp_dir.path().join("source.txt");
        fs::write(&src_file, b"abc").expect("Failed to write source");

        // Parent of the destination is a regular file.
        let blocker = temp_dir.path().join("blocker");
        fs::write(&blocker, b"").expect("Failed to write blocker");

        let result = copy_file(
            &src_file,
            &blocker.join("dest.txt"),
            ChecksumAlgorithm::Sha256,
            DEFAULT_BUFFER_SIZE,
            |_| {},
        );
        assert!(matches!(result, Err(EngineError::WriteError { .. })));
    }

    #[test]
    fn test_ensure_parent_dir_exists() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("subdir").join("nested").join("file.txt");

        ensure_parent_dir_exists(&path).expect("Failed to create parent");
        assert!(temp_dir.path().join("subdir").join("nested").is_dir());
    }

    #[test]
    fn test_ensure_dir_rejects_regular_file() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("file");
        fs::write(&path, b"x").expect("Failed to write file");

        let result = ensure_dir_exists(&path);
        assert!(matches!(result, Err(EngineError::DirectoryCreationFailed { .. })));
    }
}

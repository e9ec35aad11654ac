//! Checksum computation.
//!
//! This module provides:
//! - The digest algorithms a job can be verified with (SHA-256 by default,
//!   BLAKE3 and MD5 as alternatives, XXH3 for rush mode)
//! - A streaming hasher abstraction shared by the copier and the verifier
//! - File-level checksum computation

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Default chunk size for streaming reads (1 MiB).
pub const DEFAULT_BUFFER_SIZE: usize = 1024 * 1024;

/// Supported checksum algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    /// SHA-256 (cryptographic, 256-bit)
    #[default]
    Sha256,
    /// BLAKE3 (cryptographic, fast, 256-bit)
    Blake3,
    /// MD5 (legacy, kept for interoperability with existing media manifests)
    Md5,
    /// XXH3-64 (non-cryptographic, used by rush mode)
    Xxh3,
}

impl ChecksumAlgorithm {
    /// Whether the digest resists deliberate collisions.
    pub fn is_cryptographic(&self) -> bool {
        !matches!(self, Self::Xxh3)
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sha256 => write!(f, "sha256"),
            Self::Blake3 => write!(f, "blake3"),
            Self::Md5 => write!(f, "md5"),
            Self::Xxh3 => write!(f, "xxh3"),
        }
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sha256" => Ok(Self::Sha256),
            "blake3" => Ok(Self::Blake3),
            "md5" => Ok(Self::Md5),
            "xxh3" | "xxhash" => Ok(Self::Xxh3),
            _ => Err(format!(
                "unknown checksum algorithm '{}' (expected sha256, blake3, md5 or xxh3)",
                s
            )),
        }
    }
}

/// A computed checksum value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumValue {
    algorithm: ChecksumAlgorithm,
    hex: String,
}

impl ChecksumValue {
    pub fn new(algorithm: ChecksumAlgorithm, hex: String) -> Self {
        ChecksumValue { algorithm, hex }
    }

    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    /// Get the hex string representation
    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// Format as "algo:hex"
    pub fn to_string_with_algo(&self) -> String {
        format!("{}:{}", self.algorithm, self.hex)
    }
}

impl fmt::Display for ChecksumValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hex)
    }
}

/// Streaming digest state.
///
/// The algorithm is chosen when the hasher is created and cannot change
/// until `finalize` consumes it.
pub trait ChecksumHasher: Send {
    /// Update the hasher with new data
    fn update(&mut self, data: &[u8]);

    /// Finalize and return the checksum value
    fn finalize(self: Box<Self>) -> ChecksumValue;
}

struct Sha256Hasher {
    hasher: sha2::Sha256,
}

impl ChecksumHasher for Sha256Hasher {
    fn update(&mut self, data: &[u8]) {
        use sha2::Digest;
        self.hasher.update(data);
    }

    fn finalize(self: Box<Self>) -> ChecksumValue {
        use sha2::Digest;
        let digest = self.hasher.finalize();
        ChecksumValue::new(ChecksumAlgorithm::Sha256, format!("{:x}", digest))
    }
}

struct Blake3Hasher {
    hasher: blake3::Hasher,
}

impl ChecksumHasher for Blake3Hasher {
    fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    fn finalize(self: Box<Self>) -> ChecksumValue {
        let digest = self.hasher.finalize();
        ChecksumValue::new(ChecksumAlgorithm::Blake3, digest.to_hex().to_string())
    }
}

struct Md5Hasher {
    context: md5::Context,
}

impl ChecksumHasher for Md5Hasher {
    fn update(&mut self, data: &[u8]) {
        self.context.consume(data);
    }

    fn finalize(self: Box<Self>) -> ChecksumValue {
        let digest = self.context.compute();
        ChecksumValue::new(ChecksumAlgorithm::Md5, format!("{:x}", digest))
    }
}

struct Xxh3Hasher {
    inner: xxhash_rust::xxh3::Xxh3,
}

impl ChecksumHasher for Xxh3Hasher {
    fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    fn finalize(self: Box<Self>) -> ChecksumValue {
        ChecksumValue::new(
            ChecksumAlgorithm::Xxh3,
            format!("{:016x}", self.inner.digest()),
        )
    }
}

/// Create a new hasher for the given algorithm
pub fn create_hasher(algorithm: ChecksumAlgorithm) -> Box<dyn ChecksumHasher> {
    match algorithm {
        ChecksumAlgorithm::Sha256 => Box::new(Sha256Hasher {
            hasher: sha2::Sha256::default(),
        }),
        ChecksumAlgorithm::Blake3 => Box::new(Blake3Hasher {
            hasher: blake3::Hasher::new(),
        }),
        ChecksumAlgorithm::Md5 => Box::new(Md5Hasher {
            context: md5::Context::new(),
        }),
        ChecksumAlgorithm::Xxh3 => Box::new(Xxh3Hasher {
            inner: xxhash_rust::xxh3::Xxh3::new(),
        }),
    }
}

/// Compute the checksum of a file, streaming it through a fixed-size buffer.
///
/// Bytes are hashed and discarded; memory use is bounded by `buffer_size`
/// regardless of file size.
pub fn compute_file_checksum(
    path: &Path,
    algorithm: ChecksumAlgorithm,
    buffer_size: usize,
) -> Result<ChecksumValue, EngineError> {
    let mut file = File::open(path).map_err(|e| EngineError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut buffer = vec![0u8; buffer_size.max(1)];
    let mut hasher = create_hasher(algorithm);

    loop {
        match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => hasher.update(&buffer[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(EngineError::ReadError {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        }
    }

    Ok(hasher.finalize())
}

/// Recompute a destination file's digest and compare it against the digest
/// recorded while copying.
///
/// Returns `MissingChecksum` when nothing was recorded and `IntegrityMismatch`
/// when the digests differ.
pub fn verify_against(
    path: &Path,
    recorded: Option<&ChecksumValue>,
    buffer_size: usize,
) -> Result<(), EngineError> {
    let recorded = recorded.ok_or_else(|| EngineError::MissingChecksum {
        path: path.to_path_buf(),
    })?;

    let actual = compute_file_checksum(path, recorded.algorithm(), buffer_size)?;
    if actual.hex() != recorded.hex() {
        return Err(EngineError::IntegrityMismatch {
            path: path.to_path_buf(),
            expected: recorded.hex().to_string(),
            actual: actual.hex().to_string(),
        });
    }

    Ok(())
}

//! Engine configuration.
//!
//! Loaded from a TOML file; every field is optional:
//!
//! ```toml
//! checksum = "sha256"      # sha256 | blake3 | md5 | xxh3
//! rush_mode = false        # verify new jobs with xxh3 instead
//! buffer_size = 1048576    # bytes per read/write chunk
//! notice_ttl_ms = 3000     # how long "added"/"duplicate" notices stay visible
//! verify_settle_ms = 0     # pause between the last copy and verification
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::checksums::{ChecksumAlgorithm, DEFAULT_BUFFER_SIZE};
use crate::error::EngineError;

/// Smallest accepted chunk size.
pub const MIN_BUFFER_SIZE: usize = 4 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Digest used when rush mode is off
    pub checksum: ChecksumAlgorithm,
    /// Trade the cryptographic digest for XXH3
    pub rush_mode: bool,
    pub buffer_size: usize,
    pub notice_ttl_ms: u64,
    pub verify_settle_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            checksum: ChecksumAlgorithm::Sha256,
            rush_mode: false,
            buffer_size: DEFAULT_BUFFER_SIZE,
            notice_ttl_ms: 3000,
            verify_settle_ms: 0,
        }
    }
}

impl EngineConfig {
    /// Read and parse a TOML config file.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path).map_err(|e| EngineError::ConfigRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content).map_err(|message| EngineError::ConfigParse {
            path: path.to_path_buf(),
            message,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, String> {
        toml::from_str::<EngineConfig>(content).map_err(|e| e.to_string())
    }

    /// Algorithm assigned to newly submitted jobs.
    pub fn effective_algorithm(&self) -> ChecksumAlgorithm {
        if self.rush_mode {
            ChecksumAlgorithm::Xxh3
        } else {
            self.checksum
        }
    }

    pub fn effective_buffer_size(&self) -> usize {
        self.buffer_size.max(MIN_BUFFER_SIZE)
    }

    pub fn notice_ttl(&self) -> Duration {
        Duration::from_millis(self.notice_ttl_ms)
    }

    pub fn verify_settle(&self) -> Duration {
        Duration::from_millis(self.verify_settle_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.effective_algorithm(), ChecksumAlgorithm::Sha256);
        assert_eq!(config.effective_buffer_size(), 1024 * 1024);
        assert_eq!(config.notice_ttl(), Duration::from_secs(3));
        assert_eq!(config.verify_settle(), Duration::ZERO);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml("checksum = \"blake3\"\nbuffer_size = 16\n")
            .expect("Config should parse");
        assert_eq!(config.checksum, ChecksumAlgorithm::Blake3);
        assert!(!config.rush_mode);
        assert_eq!(config.effective_buffer_size(), MIN_BUFFER_SIZE);
        assert_eq!(config.notice_ttl_ms, 3000);
    }

    #[test]
    fn test_rush_mode_overrides_checksum() {
        let config = EngineConfig::from_toml("checksum = \"sha256\"\nrush_mode = true\n")
            .expect("Config should parse");
        assert_eq!(config.effective_algorithm(), ChecksumAlgorithm::Xxh3);
    }

    #[test]
    fn test_unknown_algorithm_rejected() {
        assert!(EngineConfig::from_toml("checksum = \"crc32\"\n").is_err());
    }

    #[test]
    fn test_load_reports_path() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("offload.toml");
        std::fs::write(&path, "rush_mode = \"yes\"\n").expect("Failed to write config");

        match EngineConfig::load(&path) {
            Err(EngineError::ConfigParse { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("expected ConfigParse, got {:?}", other),
        }

        let missing = EngineConfig::load(&temp_dir.path().join("missing.toml"));
        assert!(matches!(missing, Err(EngineError::ConfigRead { .. })));
    }
}

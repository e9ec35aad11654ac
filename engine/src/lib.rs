//! # Offload Engine - Verified Transfer Queue
//!
//! A headless engine that copies whole source trees (camera cards, folders)
//! onto one or more destinations and proves every byte arrived.
//! Designed as the foundation for multiple UIs (CLI, GUI, automation).
//!
//! ## Overview
//!
//! The engine features:
//! - A FIFO queue processing one job at a time on a dedicated thread
//! - Background enumeration of each source tree at submission
//! - Streaming copy that hashes bytes as they are written
//! - Post-copy verification against the recorded digests
//! - Conflict and failure decisions delegated to the caller
//! - Progress reporting via event channels (decoupled from UI technology)
//!
//! ## Basic Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use engine::{EngineConfig, PolicyDecisions, QueueEvent, TransferQueue, Volume};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let queue = TransferQueue::new(EngineConfig::default(), Arc::new(PolicyDecisions::default()))?;
//! let events = queue.subscribe()?;
//!
//! let card = Volume::from_path("/Volumes/A001");
//! let shuttle = Volume::from_path("/Volumes/SHUTTLE");
//! queue.submit(&card, &shuttle)?;
//! queue.start();
//!
//! for event in events.iter() {
//!     if let QueueEvent::RunningChanged { running: false } = event {
//!         break;
//!     }
//! }
//!
//! for job in queue.jobs() {
//!     println!("{} -> {}: {}", job.source_name, job.destination_path.display(), job.status);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **model**: Core data structures (TransferJob, FileEntry, Volume, statuses)
//! - **error**: Error types and handling
//! - **checksums**: Streaming digests and verification
//! - **fs_ops**: Low-level filesystem operations (enumerate, copy)
//! - **conflict**: Destination conflict handling
//! - **decisions**: Caller-supplied conflict and failure answers
//! - **job**: Job construction and bookkeeping
//! - **progress**: Queue events and transient notices
//! - **config**: TOML configuration
//! - **queue**: The transfer queue itself

pub mod checksums;
pub mod config;
pub mod conflict;
pub mod decisions;
pub mod error;
pub mod fs_ops;
pub mod job;
pub mod model;
pub mod progress;
pub mod queue;

// Re-export main types and functions
pub use checksums::{compute_file_checksum, ChecksumAlgorithm, ChecksumValue};
pub use config::EngineConfig;
pub use conflict::{ConflictResolver, Resolution};
pub use decisions::{
    Conflict, ConflictChoice, Decisions, Failure, FailureChoice, PolicyDecisions,
};
pub use error::{EngineError, JobError};
pub use model::{FileEntry, FileStatus, JobId, TransferJob, TransferStatus, Volume};
pub use progress::{Notice, NoticeKind, QueueEvent};
pub use queue::{QueueSnapshot, TransferQueue};

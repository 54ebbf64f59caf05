//! Core data types used throughout the vcfs library
//!
//! ## Overview
//!
//! The types in this module represent:
//! - **Configuration**: `VcfsConfig`, `StoreMetadata` - how a tracked root is set up
//! - **Operation results**: `WriteReport`, `RollbackOutcome`, `RedoOutcome`
//! - **Inspection**: `HistoryStatus` - a read-only view of one file's history
//!
//! ## Examples
//!
//! ```rust
//! use vcfs::types::{RollbackOutcome, VcfsConfig};
//! use std::path::PathBuf;
//!
//! let config = VcfsConfig::new(PathBuf::from("./project"));
//! assert_eq!(config.compaction_threshold, 30);
//! assert!(!RollbackOutcome::NoHistory.is_applied());
//! ```

use crate::codec::DEFAULT_MARGIN;
use crate::path_key::PathKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default name of the metadata directory inside the tracked root
pub const DEFAULT_META_DIR: &str = ".vcfs_meta";

/// Default number of recorded writes after which backward history is discarded
pub const DEFAULT_COMPACTION_THRESHOLD: u64 = 30;

/// Current on-disk format version
pub const FORMAT_VERSION: u32 = 1;

/// Configuration for a vcfs instance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VcfsConfig {
    /// Root directory whose files are tracked
    pub root_path: PathBuf,
    /// Name of the metadata directory, relative to the root
    pub meta_dir: String,
    /// Write count at which the backward log is wiped
    pub compaction_threshold: u64,
    /// Context carried around each patch hunk, in characters
    #[serde(default = "default_patch_margin")]
    pub patch_margin: usize,
    /// vcfs version that created this config
    pub version: String,
}

impl VcfsConfig {
    /// Default configuration for `root_path`
    pub fn new(root_path: PathBuf) -> Self {
        Self {
            root_path,
            meta_dir: DEFAULT_META_DIR.to_string(),
            compaction_threshold: DEFAULT_COMPACTION_THRESHOLD,
            patch_margin: DEFAULT_MARGIN,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Absolute path of the metadata directory
    pub fn meta_path(&self) -> PathBuf {
        self.root_path.join(&self.meta_dir)
    }
}

fn default_patch_margin() -> usize {
    DEFAULT_MARGIN
}

/// Metadata persisted as `config.json` in the metadata directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMetadata {
    /// Version of the artifact format
    pub format_version: u32,
    /// vcfs version that created the store
    pub vcfs_version: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last accessed timestamp
    pub last_accessed: DateTime<Utc>,
    /// Configuration
    pub config: VcfsConfig,
}

/// What a write did to the backward history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryUpdate {
    /// A reverse patch was appended and the counter incremented
    Recorded,
    /// The write produced no textual change; history untouched
    Unchanged,
    /// The threshold was reached; backward history wiped and counter reset
    Compacted,
}

/// Result of [`Vcfs::record_write`](crate::Vcfs::record_write)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteReport {
    /// Bytes written by the file store
    pub bytes_written: usize,
    /// Effect on the backward history
    pub update: HistoryUpdate,
}

/// Result of an undo
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RollbackOutcome {
    /// The last record was applied and moved to the forward stack
    Reverted {
        /// Records left in the backward log
        remaining_records: usize,
        /// Snapshots now on the forward stack
        forward_depth: usize,
    },
    /// The backward log exists but holds no records; nothing changed
    NoHistory,
}

impl RollbackOutcome {
    /// Whether the rollback changed anything
    pub fn is_applied(&self) -> bool {
        matches!(self, RollbackOutcome::Reverted { .. })
    }
}

/// Result of a redo
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RedoOutcome {
    /// The newest snapshot was restored
    Restored {
        /// Whether a reverse patch was appended to the backward log
        recorded: bool,
        /// Snapshots left on the forward stack
        forward_depth: usize,
    },
    /// No snapshot to restore; nothing changed
    NoForwardHistory,
}

impl RedoOutcome {
    /// Whether the redo changed anything
    pub fn is_applied(&self) -> bool {
        matches!(self, RedoOutcome::Restored { .. })
    }
}

/// Read-only view of one tracked file's history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryStatus {
    /// Derived path key
    pub key: PathKey,
    /// Recorded mutations since the last compaction
    pub counter: u64,
    /// Records in the backward log
    pub backward_records: usize,
    /// Snapshots on the forward stack
    pub forward_depth: usize,
    /// Whether the backward log artifact exists
    pub has_log: bool,
    /// Short SHA-256 of the current content
    pub content_digest: String,
    /// Current content length in bytes
    pub content_len: u64,
}

impl HistoryStatus {
    /// Whether an undo would change the file
    pub fn can_undo(&self) -> bool {
        self.backward_records > 0
    }

    /// Whether a redo would change the file
    pub fn can_redo(&self) -> bool {
        self.forward_depth > 0
    }
}

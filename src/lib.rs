//! # vcfs - Version-controlled file store
//!
//! A directory of ordinary files where every write is recorded as a reverse
//! patch, so that writes can be undone one at a time and undone writes redone.
//!
//! ## Overview
//!
//! vcfs keeps per-file history next to the files it tracks:
//! - Record each write as a patch that turns the new text back into the old
//! - Roll back the newest write, keeping a snapshot of what was undone
//! - Reverse a rollback from that snapshot until a new write invalidates it
//! - Bound history growth with a per-file compaction threshold
//!
//! ## Architecture
//!
//! - **File Store**: byte-level reads and writes of tracked content
//!   ([`FileStore`], [`DiskStore`])
//! - **Patch Codec**: character-level diffs, their text form, and fuzzy
//!   application ([`PatchCodec`], [`TextCodec`])
//! - **History Store**: backward logs, counters and forward stacks, one set
//!   per path key ([`HistoryStore`])
//! - **Engine**: ties the three together per tracked root ([`Vcfs`])
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use vcfs::{HistoryUpdate, Vcfs};
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let vcfs = Vcfs::init(PathBuf::from("./notes"))?;
//!
//! let report = vcfs.record_write("/todo.txt", b"hello", 0)?;
//! assert_eq!(report.update, HistoryUpdate::Recorded);
//! vcfs.record_write("/todo.txt", b" world", 5)?;
//!
//! vcfs.rollback("/todo.txt")?;
//! assert_eq!(vcfs.read("/todo.txt")?.as_deref(), Some("hello"));
//! # Ok(())
//! # }
//! ```
//!
//! ## Key Concepts
//!
//! ### Path keys
//!
//! A path such as `/docs/a.txt` is tracked under the key `docs__a.txt`. Every
//! history artifact is named after the key, so two paths that derive the same
//! key (`/a__b` and `/a/b`) share history. See [`PathKey`].
//!
//! ### Compaction
//!
//! When a write brings the counter of a file to the compaction threshold
//! (30 by default), the backward log is wiped and the counter reset. Undo
//! cannot go past that point.
//!
//! ### Outcomes versus errors
//!
//! Undoing with an empty log and redoing with an empty forward stack are
//! reported as [`RollbackOutcome::NoHistory`] and
//! [`RedoOutcome::NoForwardHistory`]. Missing history and patches that no
//! longer apply are errors ([`VcfsError::NotFound`], [`VcfsError::ApplyFailed`]).
//!
//! ## Module Organization
//!
//! - [`vcfs`](mod@vcfs): The engine and its builder
//! - [`history`]: History artifacts
//! - [`codec`]: Patch computation, text form and application
//! - [`file_store`]: Tracked file content
//! - [`framing`]: Length-prefixed frames inside history artifacts
//! - [`path_key`]: Keys derived from paths
//! - [`types`]: Configuration and outcome types
//! - [`error`]: Error types and handling

// Public API modules
pub mod codec;
pub mod error;
pub mod file_store;
pub mod framing;
pub mod history;
pub mod path_key;
pub mod types;
pub mod utils;
pub mod vcfs;

// Re-export main types for convenience
pub use codec::{PatchCodec, TextCodec};
pub use error::{Result, VcfsError};
pub use file_store::{DiskStore, FileStore};
pub use history::HistoryStore;
pub use path_key::PathKey;
pub use types::*;
pub use vcfs::{Vcfs, VcfsBuilder};

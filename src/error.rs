//! Error types for the vcfs library
//!
//! This module defines all error types that can occur while recording,
//! undoing or redoing changes to tracked files.
//!
//! Two outcomes that look like failures are deliberately *not* errors:
//! an undo with no recorded record left ([`RollbackOutcome::NoHistory`]) and a
//! redo with an empty forward stack ([`RedoOutcome::NoForwardHistory`]). Both
//! are informational no-ops and are returned as `Ok` values.
//!
//! [`RollbackOutcome::NoHistory`]: crate::types::RollbackOutcome::NoHistory
//! [`RedoOutcome::NoForwardHistory`]: crate::types::RedoOutcome::NoForwardHistory

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the vcfs library
pub type Result<T> = std::result::Result<T, VcfsError>;

/// Main error type for all vcfs operations
#[derive(Debug, Error)]
pub enum VcfsError {
    /// I/O errors during file or artifact operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization/deserialization of store metadata
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// No backward history exists for the undo target
    #[error("No history found for: {0}")]
    NotFound(String),

    /// A recorded patch did not apply cleanly to the current content
    #[error("Patch failed to apply to {path}: {failed_hunks} of {total_hunks} hunks rejected")]
    ApplyFailed {
        /// Virtual path of the file being reverted
        path: String,
        /// Number of hunks that could not be placed
        failed_hunks: usize,
        /// Number of hunks in the patch
        total_hunks: usize,
    },

    /// Diff or patch computation, or patch decoding, failed
    #[error("Codec error: {0}")]
    Codec(String),

    /// A metadata artifact could not be interpreted
    #[error("Corrupt metadata: {0}")]
    CorruptMetadata(String),

    /// Path cannot be tracked
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// The metadata directory has not been initialized
    #[error("Store not initialized at path: {0:?}")]
    StorageNotInitialized(PathBuf),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl VcfsError {
    /// Create a codec error with a custom message
    pub fn codec(msg: impl Into<String>) -> Self {
        VcfsError::Codec(msg.into())
    }

    /// Check if this error is recoverable by falling back to a default value
    pub fn is_recoverable(&self) -> bool {
        matches!(self, VcfsError::CorruptMetadata(_))
    }

    /// Check if this error means stored history no longer matches the file
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            VcfsError::ApplyFailed { .. } | VcfsError::Codec(_)
        )
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            VcfsError::NotFound(path) => {
                format!("No version history for '{}'. Write to the file first.", path)
            }
            VcfsError::ApplyFailed { path, .. } => {
                format!(
                    "Could not roll back '{}': the file no longer matches its recorded history. \
                     Nothing was changed.",
                    path
                )
            }
            VcfsError::StorageNotInitialized(path) => {
                format!("No vcfs metadata at {:?}. Run 'vcfs init' first.", path)
            }
            _ => self.to_string(),
        }
    }
}

//! Derivation of filesystem-safe keys from virtual paths
//!
//! Every history artifact is named after the key of the file it belongs to.
//! A key is the normalized relative path with each `/` replaced by `__`:
//!
//! ```rust
//! use vcfs::PathKey;
//!
//! let key = PathKey::derive("/docs//notes/./todo.txt").unwrap();
//! assert_eq!(key.as_str(), "docs__notes__todo.txt");
//! assert_eq!(key.relative_path(), "docs/notes/todo.txt");
//! ```

use crate::error::{Result, VcfsError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator substituted for `/` in keys
pub const KEY_SEPARATOR: &str = "__";

/// Stable identifier of a tracked path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PathKey {
    key: String,
    relative: String,
}

impl PathKey {
    /// Derive the key for a virtual path
    ///
    /// Leading, repeated and trailing slashes and `.` segments are ignored.
    ///
    /// # Errors
    ///
    /// [`VcfsError::InvalidPath`] if the path names the root, contains a `..`
    /// segment, or contains a NUL or newline character.
    pub fn derive(path: &str) -> Result<Self> {
        if path.contains('\0') || path.contains('\n') {
            return Err(VcfsError::InvalidPath(path.escape_debug().to_string()));
        }

        let segments: Vec<&str> = path
            .split('/')
            .filter(|s| !s.is_empty() && *s != ".")
            .collect();

        if segments.is_empty() {
            return Err(VcfsError::InvalidPath(format!("{:?} names no file", path)));
        }
        if segments.iter().any(|s| *s == "..") {
            return Err(VcfsError::InvalidPath(format!(
                "{:?} escapes the tracked root",
                path
            )));
        }

        Ok(Self {
            key: segments.join(KEY_SEPARATOR),
            relative: segments.join("/"),
        })
    }

    /// Key string used to name artifacts
    pub fn as_str(&self) -> &str {
        &self.key
    }

    /// Normalized path relative to the tracked root
    pub fn relative_path(&self) -> &str {
        &self.relative
    }

    /// First path segment
    pub fn first_segment(&self) -> &str {
        self.relative.split('/').next().unwrap_or_default()
    }
}

impl fmt::Display for PathKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

impl AsRef<str> for PathKey {
    fn as_ref(&self) -> &str {
        &self.key
    }
}

//! Utility functions for vcfs
//!
//! Hashing helpers for content digests, human-readable sizes, and atomic
//! whole-file writes used by the file store and the metadata writer.

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::Path;
use tracing::trace;

/// Number of hex characters shown for short digests
pub const SHORT_DIGEST_LEN: usize = 12;

/// Hash arbitrary data using SHA-256
///
/// Returns the 64-character hexadecimal digest.
///
/// # Example
///
/// ```rust
/// use vcfs::utils::hash_data;
///
/// let hash = hash_data(b"Hello, world!");
/// assert_eq!(hash.len(), 64);
/// ```
pub fn hash_data(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Shortened SHA-256 digest for display
pub fn short_digest(data: &[u8]) -> String {
    let mut hash = hash_data(data);
    hash.truncate(SHORT_DIGEST_LEN);
    hash
}

/// Format bytes as human-readable string
///
/// ```rust
/// use vcfs::utils::format_bytes;
///
/// assert_eq!(format_bytes(512), "512 B");
/// assert_eq!(format_bytes(1536), "1.50 KB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

/// Atomic file write (write to a temp file in the same directory, then rename)
///
/// Readers observe either the old or the new content, never a partial file.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;

    trace!("Atomically wrote {} bytes to {:?}", content.len(), path);
    Ok(())
}

//! Byte-level access to tracked files
//!
//! The history engine never touches tracked files directly; it goes through a
//! [`FileStore`]. [`DiskStore`] is a passthrough onto a real directory: a
//! virtual path `/a/b.txt` maps to `<root>/a/b.txt`.

use crate::error::Result;
use crate::path_key::PathKey;
use crate::utils;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::trace;

/// Storage for the content of tracked files
pub trait FileStore: Send + Sync {
    /// Read the whole file, or `None` if it does not exist
    fn read(&self, key: &PathKey) -> Result<Option<Vec<u8>>>;

    /// Write `bytes` at `offset`, creating the file if needed
    ///
    /// Returns the number of bytes written.
    fn write_at(&self, key: &PathKey, offset: u64, bytes: &[u8]) -> Result<usize>;

    /// Replace the whole file with `text`
    fn overwrite(&self, key: &PathKey, text: &str) -> Result<()>;
}

/// Passthrough file store rooted at a real directory
#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    /// Create a store over `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Real path backing a key
    pub fn real_path(&self, key: &PathKey) -> PathBuf {
        self.root.join(key.relative_path())
    }
}

impl FileStore for DiskStore {
    fn read(&self, key: &PathKey) -> Result<Option<Vec<u8>>> {
        match fs::read(self.real_path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_at(&self, key: &PathKey, offset: u64, bytes: &[u8]) -> Result<usize> {
        let path = self.real_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(bytes)?;

        trace!("Wrote {} bytes at offset {} to {:?}", bytes.len(), offset, path);
        Ok(bytes.len())
    }

    fn overwrite(&self, key: &PathKey, text: &str) -> Result<()> {
        let path = self.real_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        utils::atomic_write(&path, text.as_bytes())
    }
}

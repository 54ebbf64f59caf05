//! Version history engine
//!
//! This module provides [`Vcfs`], the entry point for recording writes to
//! tracked files and for undoing and redoing them.
//!
//! ## Overview
//!
//! Every write goes through [`Vcfs::record_write`], which performs the byte
//! write and then stores a *reverse* patch: the patch that turns the new text
//! back into the old one. [`Vcfs::rollback`] applies the newest reverse patch
//! and keeps a full snapshot of the undone text on a forward stack, from
//! which [`Vcfs::reverse_rollback`] restores it. Any new write clears the
//! forward stack.
//!
//! After `compaction_threshold` recorded writes the backward log of a file is
//! discarded and its counter starts over. History before that point can no
//! longer be undone.
//!
//! ## Thread Safety
//!
//! Every mutating operation takes a per-key lock, so calls for the same
//! file are serialized while different files proceed in parallel. The lock
//! table is keyed by the key string because distinct paths may derive the
//! same key and then share artifacts.
//!
//! ## Examples
//!
//! ```rust,no_run
//! use vcfs::{RollbackOutcome, Vcfs};
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let vcfs = Vcfs::init(PathBuf::from("./notes"))?;
//!
//! vcfs.record_write("/todo.txt", b"milk", 0)?;
//! vcfs.record_write("/todo.txt", b", eggs", 4)?;
//!
//! let outcome = vcfs.rollback("/todo.txt")?;
//! assert!(outcome.is_applied());
//! assert_eq!(vcfs.read("/todo.txt")?.as_deref(), Some("milk"));
//!
//! vcfs.reverse_rollback("/todo.txt")?;
//! assert_eq!(vcfs.read("/todo.txt")?.as_deref(), Some("milk, eggs"));
//! # Ok(())
//! # }
//! ```

use crate::codec::{PatchCodec, TextCodec, DEFAULT_MARGIN};
use crate::error::{Result, VcfsError};
use crate::file_store::{DiskStore, FileStore};
use crate::history::HistoryStore;
use crate::path_key::PathKey;
use crate::types::*;
use crate::utils;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Version history engine for one tracked root
///
/// Generic over the [`FileStore`] holding file content and the
/// [`PatchCodec`] computing reverse patches. The defaults operate on a real
/// directory with character-level patches.
///
/// # Examples
///
/// ```rust,no_run
/// use vcfs::VcfsBuilder;
/// use std::path::PathBuf;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let vcfs = VcfsBuilder::new()
///     .compaction_threshold(100)
///     .build(PathBuf::from("./notes"))?;
/// # Ok(())
/// # }
/// ```
pub struct Vcfs<F: FileStore = DiskStore, C: PatchCodec = TextCodec> {
    /// Configuration
    config: VcfsConfig,
    /// Content of tracked files
    store: F,
    /// Reverse patch computation
    codec: C,
    /// Per-file history artifacts
    history: HistoryStore,
    /// Per-key locks
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl<F: FileStore, C: PatchCodec> std::fmt::Debug for Vcfs<F, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vcfs")
            .field("config", &self.config)
            .field("history", &self.history)
            .field("locks", &format!("<{} keys>", self.locks.len()))
            .finish()
    }
}

impl Vcfs {
    /// Initialize history tracking for a directory
    ///
    /// Creates the metadata directory with the default configuration. If the
    /// directory is already tracked, under any metadata directory name, its
    /// stored configuration is opened instead.
    ///
    /// # Errors
    ///
    /// - [`VcfsError::InvalidConfiguration`] if `root_path` is not a directory
    /// - [`VcfsError::Io`] if the metadata directory cannot be created
    #[instrument]
    pub fn init(root_path: PathBuf) -> Result<Self> {
        if HistoryStore::discover(&root_path)?.is_some() {
            return Self::open(root_path);
        }

        info!("Initializing vcfs for {:?}", root_path);
        let config = VcfsConfig::new(root_path);
        let store = DiskStore::new(config.root_path.clone());
        Self::with_parts(config, store, TextCodec::new())
    }

    /// Open a directory that is already tracked
    ///
    /// The metadata directory is located with [`HistoryStore::discover`] and
    /// its stored configuration is used. The root may have moved since it
    /// was initialized.
    ///
    /// # Errors
    ///
    /// - [`VcfsError::StorageNotInitialized`] if the directory is not tracked
    /// - [`VcfsError::Json`] if the stored metadata is unreadable
    #[instrument]
    pub fn open(root_path: PathBuf) -> Result<Self> {
        let meta_path = HistoryStore::discover(&root_path)?
            .ok_or_else(|| VcfsError::StorageNotInitialized(root_path.join(DEFAULT_META_DIR)))?;
        let history = HistoryStore::open(meta_path)?;

        let mut config = history.metadata().read().config.clone();
        config.root_path = root_path.clone();
        validate_config(&config)?;

        info!(
            "Opened vcfs at {:?} (threshold {}, metadata in {})",
            root_path, config.compaction_threshold, config.meta_dir
        );

        let codec = TextCodec::new().with_margin(config.patch_margin);
        Ok(Self::assemble(
            config,
            DiskStore::new(root_path),
            codec,
            history,
        ))
    }
}

impl<F: FileStore, C: PatchCodec> Vcfs<F, C> {
    /// Build an engine from an explicit configuration and collaborators
    ///
    /// The metadata directory is created if needed. `config` is authoritative:
    /// if it differs from the stored configuration, the stored one is replaced.
    ///
    /// # Errors
    ///
    /// - [`VcfsError::InvalidConfiguration`] for a zero threshold, a bad
    ///   metadata directory name, or a missing root directory
    #[instrument(skip_all, fields(root = ?config.root_path))]
    pub fn with_parts(config: VcfsConfig, store: F, codec: C) -> Result<Self> {
        validate_config(&config)?;
        if !config.root_path.is_dir() {
            return Err(VcfsError::InvalidConfiguration(format!(
                "root {:?} is not a directory",
                config.root_path
            )));
        }

        let history = HistoryStore::init_or_open(config.meta_path(), config.clone())?;
        let stored = history.metadata().read().config.clone();
        if stored != config {
            history.update_metadata(|metadata| metadata.config = config.clone())?;
            debug!("Replaced stored configuration");
        }

        Ok(Self::assemble(config, store, codec, history))
    }

    fn assemble(config: VcfsConfig, store: F, codec: C, history: HistoryStore) -> Self {
        Self {
            config,
            store,
            codec,
            history,
            locks: DashMap::new(),
        }
    }

    /// Configuration in effect
    pub fn config(&self) -> &VcfsConfig {
        &self.config
    }

    /// Tracked root directory
    pub fn root_path(&self) -> &Path {
        &self.config.root_path
    }

    /// File store
    pub fn store(&self) -> &F {
        &self.store
    }

    /// Patch codec
    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// History artifacts
    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    /// Write `bytes` at `offset` and record how to undo it
    ///
    /// Any forward history is discarded. If this write brings the counter
    /// to the compaction threshold, the backward log is wiped and the
    /// counter reset instead of recording a patch.
    ///
    /// # Errors
    ///
    /// - [`VcfsError::InvalidPath`] for the root, `..` paths, or paths
    ///   inside the metadata directory
    /// - [`VcfsError::Codec`] if the reverse patch cannot be computed. The
    ///   byte write has already happened at that point.
    #[instrument(skip(self, bytes), fields(len = bytes.len()))]
    pub fn record_write(&self, path: &str, bytes: &[u8], offset: u64) -> Result<WriteReport> {
        self.record(path, |store, key| store.write_at(key, offset, bytes))
    }

    /// Replace the whole content of a file and record how to undo it
    ///
    /// Recording works as in [`Vcfs::record_write`]. Use this instead of a
    /// truncate followed by a write so that the replaced text stays undoable.
    #[instrument(skip(self, text), fields(len = text.len()))]
    pub fn record_replace(&self, path: &str, text: &str) -> Result<WriteReport> {
        self.record(path, |store, key| {
            store.overwrite(key, text)?;
            Ok(text.len())
        })
    }

    fn record<W>(&self, path: &str, write: W) -> Result<WriteReport>
    where
        W: FnOnce(&F, &PathKey) -> Result<usize>,
    {
        let key = self.key_for(path)?;
        let lock = self.lock_for(&key);
        let _guard = lock.lock();

        let before = self.current_text(&key);
        let bytes_written = write(&self.store, &key)?;
        let after = self.current_text(&key);

        self.history.clear_forward(&key)?;

        let counter = self.history.counter(&key);
        let next = counter.saturating_add(1);

        let update = if next >= self.config.compaction_threshold {
            self.history.wipe_log(&key)?;
            self.history.set_counter(&key, 0)?;
            info!("Compacted history of {} after {} writes", key, next);
            HistoryUpdate::Compacted
        } else {
            let patch_text = self.codec.reverse_patch_text(&after, &before)?;
            if patch_text.is_empty() {
                debug!("Write to {} changed nothing", key);
                HistoryUpdate::Unchanged
            } else {
                self.history.append_record(&key, &patch_text)?;
                self.history.set_counter(&key, next)?;
                debug!("Recorded write {} for {}", next, key);
                HistoryUpdate::Recorded
            }
        };

        Ok(WriteReport {
            bytes_written,
            update,
        })
    }

    /// Undo the newest recorded write
    ///
    /// The text being undone is pushed onto the forward stack so that
    /// [`Vcfs::reverse_rollback`] can restore it.
    ///
    /// # Errors
    ///
    /// - [`VcfsError::NotFound`] if the file has no backward log
    /// - [`VcfsError::Codec`] if the stored patch cannot be parsed
    /// - [`VcfsError::ApplyFailed`] if any hunk does not apply; nothing is
    ///   changed in that case
    #[instrument(skip(self))]
    pub fn rollback(&self, path: &str) -> Result<RollbackOutcome> {
        let key = self.key_for(path)?;
        let lock = self.lock_for(&key);
        let _guard = lock.lock();

        if !self.history.log_exists(&key) {
            return Err(VcfsError::NotFound(path.to_string()));
        }

        let Some(patch_text) = self.history.read_last_record(&key) else {
            info!("No history left to roll back for {}", key);
            return Ok(RollbackOutcome::NoHistory);
        };

        let patch = self.codec.deserialize(&patch_text)?;
        let current = self.current_text(&key);
        let (reverted, results) = self.codec.apply(&patch, &current);

        let failed_hunks = results.iter().filter(|applied| !**applied).count();
        if failed_hunks > 0 {
            warn!(
                "Rollback of {} rejected: {} of {} hunks failed",
                key,
                failed_hunks,
                results.len()
            );
            return Err(VcfsError::ApplyFailed {
                path: path.to_string(),
                failed_hunks,
                total_hunks: results.len(),
            });
        }

        self.history.push_snapshot(&key, &current)?;
        self.store.overwrite(&key, &reverted)?;
        self.history.drop_last_record(&key)?;

        let counter = self.history.counter(&key);
        self.history.set_counter(&key, counter.saturating_sub(1))?;

        let remaining_records = self.history.record_count(&key);
        let forward_depth = self.history.snapshot_count(&key);
        info!(
            "Rolled back {} ({} records left, {} redoable)",
            key, remaining_records, forward_depth
        );

        Ok(RollbackOutcome::Reverted {
            remaining_records,
            forward_depth,
        })
    }

    /// Redo the newest undone write
    ///
    /// The current text becomes undoable again: a reverse patch from the
    /// restored text back to it is appended to the backward log.
    ///
    /// # Errors
    ///
    /// - [`VcfsError::Codec`] if the reverse patch cannot be computed;
    ///   nothing is changed in that case
    #[instrument(skip(self))]
    pub fn reverse_rollback(&self, path: &str) -> Result<RedoOutcome> {
        let key = self.key_for(path)?;
        let lock = self.lock_for(&key);
        let _guard = lock.lock();

        let Some(restored) = self.history.peek_snapshot(&key) else {
            info!("Nothing to redo for {}", key);
            return Ok(RedoOutcome::NoForwardHistory);
        };

        let current = self.current_text(&key);
        let patch_text = self.codec.reverse_patch_text(&restored, &current)?;

        let recorded = !patch_text.is_empty();
        if recorded {
            self.history.append_record(&key, &patch_text)?;
            let counter = self.history.counter(&key);
            self.history.set_counter(&key, counter.saturating_add(1))?;
        }

        self.store.overwrite(&key, &restored)?;
        self.history.pop_snapshot(&key)?;

        let forward_depth = self.history.snapshot_count(&key);
        info!("Restored {} ({} more redoable)", key, forward_depth);

        Ok(RedoOutcome::Restored {
            recorded,
            forward_depth,
        })
    }

    /// Current text of a file, or `None` if it does not exist
    ///
    /// Invalid UTF-8 is replaced with U+FFFD.
    pub fn read(&self, path: &str) -> Result<Option<String>> {
        let key = self.key_for(path)?;
        Ok(self
            .store
            .read(&key)?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    /// History summary of a file
    pub fn status(&self, path: &str) -> Result<HistoryStatus> {
        let key = self.key_for(path)?;
        let lock = self.lock_for(&key);
        let _guard = lock.lock();

        let content = self.store.read(&key)?.unwrap_or_default();

        Ok(HistoryStatus {
            counter: self.history.counter(&key),
            backward_records: self.history.record_count(&key),
            forward_depth: self.history.snapshot_count(&key),
            has_log: self.history.log_exists(&key),
            content_digest: utils::short_digest(&content),
            content_len: content.len() as u64,
            key,
        })
    }

    /// Raw backward log of a file, or `None` if it has none
    pub fn versions(&self, path: &str) -> Result<Option<String>> {
        let key = self.key_for(path)?;
        self.history.read_log_raw(&key)
    }

    /// Keys of every file with history artifacts
    pub fn tracked(&self) -> Result<Vec<String>> {
        self.history.tracked_keys()
    }

    fn key_for(&self, path: &str) -> Result<PathKey> {
        let key = PathKey::derive(path)?;
        if key.first_segment() == self.config.meta_dir {
            return Err(VcfsError::InvalidPath(format!(
                "{:?} is inside the metadata directory",
                path
            )));
        }
        Ok(key)
    }

    fn lock_for(&self, key: &PathKey) -> Arc<Mutex<()>> {
        let entry = self
            .locks
            .entry(key.as_str().to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())));
        Arc::clone(entry.value())
    }

    /// Text of a file; missing, unreadable or non-UTF-8 content reads as empty
    fn current_text(&self, key: &PathKey) -> String {
        match self.store.read(key) {
            Ok(Some(bytes)) => String::from_utf8(bytes).unwrap_or_else(|_| {
                warn!("{} is not valid UTF-8, treating it as empty", key);
                String::new()
            }),
            Ok(None) => String::new(),
            Err(e) => {
                warn!("Failed to read {}, treating it as empty: {}", key, e);
                String::new()
            }
        }
    }
}

fn validate_config(config: &VcfsConfig) -> Result<()> {
    if config.compaction_threshold == 0 {
        return Err(VcfsError::InvalidConfiguration(
            "compaction threshold must be at least 1".to_string(),
        ));
    }

    let meta_dir = config.meta_dir.as_str();
    if meta_dir.is_empty() || meta_dir == "." || meta_dir == ".." || meta_dir.contains('/') {
        return Err(VcfsError::InvalidConfiguration(format!(
            "metadata directory {:?} must be a single path segment",
            meta_dir
        )));
    }

    Ok(())
}

/// Builder for configuring a [`Vcfs`] instance
///
/// Settings given to the builder replace whatever configuration the tracked
/// root already stores.
///
/// # Default Values
///
/// - `compaction_threshold`: 30
/// - `meta_dir`: `.vcfs_meta`
/// - `patch_margin`: 4 characters
#[derive(Debug, Clone)]
pub struct VcfsBuilder {
    compaction_threshold: u64,
    meta_dir: String,
    patch_margin: usize,
}

impl VcfsBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self {
            compaction_threshold: DEFAULT_COMPACTION_THRESHOLD,
            meta_dir: DEFAULT_META_DIR.to_string(),
            patch_margin: DEFAULT_MARGIN,
        }
    }

    /// Set the write count at which backward history is discarded
    ///
    /// Zero is rejected by [`VcfsBuilder::build`].
    pub fn compaction_threshold(mut self, threshold: u64) -> Self {
        self.compaction_threshold = threshold;
        self
    }

    /// Set the metadata directory name, relative to the root
    pub fn meta_dir(mut self, name: impl Into<String>) -> Self {
        self.meta_dir = name.into();
        self
    }

    /// Set the context carried around each patch hunk, in characters
    pub fn patch_margin(mut self, margin: usize) -> Self {
        self.patch_margin = margin;
        self
    }

    /// Build the engine for `root_path`
    ///
    /// # Errors
    ///
    /// - [`VcfsError::InvalidConfiguration`] for invalid settings or a
    ///   missing root directory
    pub fn build(self, root_path: PathBuf) -> Result<Vcfs> {
        let mut config = VcfsConfig::new(root_path);
        config.compaction_threshold = self.compaction_threshold;
        config.meta_dir = self.meta_dir;
        config.patch_margin = self.patch_margin;

        let store = DiskStore::new(config.root_path.clone());
        let codec = TextCodec::new().with_margin(config.patch_margin);
        Vcfs::with_parts(config, store, codec)
    }
}

impl Default for VcfsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

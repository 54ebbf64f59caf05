//! Per-file history artifacts
//!
//! This module owns the metadata directory of a tracked root. For every
//! tracked path it keeps three artifacts, named after the path key:
//!
//! ```text
//! <root>/.vcfs_meta/
//! ├── config.json        # Store metadata and configuration
//! ├── <key>.diffs        # Backward log: reverse patches, oldest first
//! ├── <key>.count        # Writes recorded since the last compaction
//! └── <key>.forward      # Forward stack: full snapshots for redo
//! ```
//!
//! Both the backward log and the forward stack are append-only files of
//! length-prefixed frames (see [`crate::framing`]). Removing the newest entry
//! truncates the file at that frame's offset, so neither push nor pop ever
//! rewrites earlier entries.
//!
//! ## Failure policy
//!
//! Missing or malformed artifacts read as empty history and never block the
//! caller: a missing counter is 0, an unparsable counter is 0 with a warning,
//! a log whose tail is damaged is read up to the last intact frame. The next
//! append cuts the damaged tail off, so new frames always follow intact ones.
//! Errors while *writing* artifacts are returned.
//!
//! ## Thread Safety
//!
//! Artifact operations are not transactional. Callers serialize access per
//! key; the [`Vcfs`](crate::Vcfs) engine does this with a per-key lock.

use crate::error::{Result, VcfsError};
use crate::framing::{Frame, FrameKind, FORWARD_FRAME, VERSION_FRAME};
use crate::path_key::PathKey;
use crate::types::{StoreMetadata, VcfsConfig, DEFAULT_META_DIR, FORMAT_VERSION};
use crate::utils;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, trace, warn};

/// File name of the store metadata inside the metadata directory
pub const METADATA_FILE: &str = "config.json";

const LOG_EXT: &str = "diffs";
const COUNTER_EXT: &str = "count";
const FORWARD_EXT: &str = "forward";

/// Durable backward logs, counters and forward stacks for one tracked root
pub struct HistoryStore {
    /// Metadata directory
    dir: PathBuf,
    /// Store metadata and configuration
    metadata: RwLock<StoreMetadata>,
}

impl std::fmt::Debug for HistoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryStore")
            .field("dir", &self.dir)
            .field("format_version", &self.metadata.read().format_version)
            .finish()
    }
}

impl HistoryStore {
    /// Create the metadata directory and write fresh store metadata
    ///
    /// # Errors
    ///
    /// - [`VcfsError::Io`] if the directory or metadata file cannot be written
    /// - [`VcfsError::Json`] if metadata serialization fails
    pub fn init(dir: PathBuf, config: VcfsConfig) -> Result<Self> {
        fs::create_dir_all(&dir)?;

        let metadata = StoreMetadata {
            format_version: FORMAT_VERSION,
            vcfs_version: env!("CARGO_PKG_VERSION").to_string(),
            created_at: Utc::now(),
            last_accessed: Utc::now(),
            config,
        };

        let metadata_json = serde_json::to_string_pretty(&metadata)?;
        utils::atomic_write(&dir.join(METADATA_FILE), metadata_json.as_bytes())?;

        info!("Initialized history store at {:?}", dir);

        Ok(Self {
            dir,
            metadata: RwLock::new(metadata),
        })
    }

    /// Open an existing metadata directory
    ///
    /// # Errors
    ///
    /// - [`VcfsError::StorageNotInitialized`] if there is no metadata file
    /// - [`VcfsError::Json`] if the metadata file is not valid
    pub fn open(dir: PathBuf) -> Result<Self> {
        let metadata_path = dir.join(METADATA_FILE);
        if !metadata_path.exists() {
            return Err(VcfsError::StorageNotInitialized(dir));
        }

        let metadata_json = fs::read_to_string(&metadata_path)?;
        let mut metadata: StoreMetadata = serde_json::from_str(&metadata_json)?;
        metadata.last_accessed = Utc::now();

        info!("Opened history store at {:?}", dir);

        Ok(Self {
            dir,
            metadata: RwLock::new(metadata),
        })
    }

    /// Open the store if it exists, otherwise initialize it with `config`
    pub fn init_or_open(dir: PathBuf, config: VcfsConfig) -> Result<Self> {
        if dir.join(METADATA_FILE).exists() {
            Self::open(dir)
        } else {
            Self::init(dir, config)
        }
    }

    /// Find the metadata directory of a tracked root
    ///
    /// The default name is tried first. Otherwise the first subdirectory, by
    /// name, whose metadata file names that subdirectory as the metadata
    /// directory is returned.
    pub fn discover(root: &Path) -> Result<Option<PathBuf>> {
        let default = root.join(DEFAULT_META_DIR);
        if default.join(METADATA_FILE).exists() {
            return Ok(Some(default));
        }

        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut candidates = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() && entry.path().join(METADATA_FILE).is_file() {
                candidates.push(entry.path());
            }
        }
        candidates.sort();

        for dir in candidates {
            let Ok(metadata_json) = fs::read_to_string(dir.join(METADATA_FILE)) else {
                continue;
            };
            let Ok(metadata) = serde_json::from_str::<StoreMetadata>(&metadata_json) else {
                continue;
            };
            if dir.file_name().and_then(|n| n.to_str()) == Some(metadata.config.meta_dir.as_str()) {
                debug!("Found metadata directory {:?}", dir);
                return Ok(Some(dir));
            }
        }

        Ok(None)
    }

    /// Metadata directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Store metadata
    pub fn metadata(&self) -> &RwLock<StoreMetadata> {
        &self.metadata
    }

    /// Update and persist store metadata
    pub fn update_metadata<F>(&self, updater: F) -> Result<()>
    where
        F: FnOnce(&mut StoreMetadata),
    {
        let mut metadata = self.metadata.write();
        updater(&mut metadata);
        metadata.last_accessed = Utc::now();

        let metadata_json = serde_json::to_string_pretty(&*metadata)?;
        utils::atomic_write(&self.dir.join(METADATA_FILE), metadata_json.as_bytes())?;
        Ok(())
    }

    // ----- backward log -------------------------------------------------

    /// Append one reverse patch to the backward log
    pub fn append_record(&self, key: &PathKey, patch_text: &str) -> Result<()> {
        let frame = VERSION_FRAME.encode(key.as_str(), patch_text);
        append(&self.log_path(key), VERSION_FRAME, &frame)?;
        trace!("Appended {} byte record to {}", patch_text.len(), key);
        Ok(())
    }

    /// Patch text of the newest record, if any
    pub fn read_last_record(&self, key: &PathKey) -> Option<String> {
        read_frames(&self.log_path(key), VERSION_FRAME)
            .pop()
            .map(|frame| frame.body)
    }

    /// Remove the newest record
    pub fn drop_last_record(&self, key: &PathKey) -> Result<()> {
        let path = self.log_path(key);
        if let Some(last) = read_frames(&path, VERSION_FRAME).pop() {
            truncate(&path, last.offset)?;
            trace!("Dropped record at byte {} of {}", last.offset, key);
        }
        Ok(())
    }

    /// Discard every record, leaving an empty log
    pub fn wipe_log(&self, key: &PathKey) -> Result<()> {
        fs::File::create(self.log_path(key))?;
        debug!("Wiped backward log of {}", key);
        Ok(())
    }

    /// Whether the backward log artifact exists
    pub fn log_exists(&self, key: &PathKey) -> bool {
        self.log_path(key).exists()
    }

    /// Number of intact records in the backward log
    pub fn record_count(&self, key: &PathKey) -> usize {
        read_frames(&self.log_path(key), VERSION_FRAME).len()
    }

    /// Raw text of the backward log, if it exists
    pub fn read_log_raw(&self, key: &PathKey) -> Result<Option<String>> {
        match fs::read(self.log_path(key)) {
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    // ----- counter ------------------------------------------------------

    /// Counter value, distinguishing "missing" from "unreadable"
    ///
    /// # Errors
    ///
    /// - [`VcfsError::Io`] if the counter exists but cannot be read
    /// - [`VcfsError::CorruptMetadata`] if it does not hold an integer
    pub fn try_counter(&self, key: &PathKey) -> Result<Option<u64>> {
        let text = match fs::read_to_string(self.counter_path(key)) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        text.trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| VcfsError::CorruptMetadata(format!("counter of {}: {}", key, e)))
    }

    /// Counter value; missing or unreadable counters read as 0
    pub fn counter(&self, key: &PathKey) -> u64 {
        match self.try_counter(key) {
            Ok(count) => count.unwrap_or(0),
            Err(e) if e.is_recoverable() => {
                warn!("Treating counter of {} as 0: {}", key, e);
                0
            }
            Err(e) => {
                error!("Failed to read counter of {}, using 0: {}", key, e);
                0
            }
        }
    }

    /// Persist a counter value
    pub fn set_counter(&self, key: &PathKey, count: u64) -> Result<()> {
        utils::atomic_write(&self.counter_path(key), count.to_string().as_bytes())
    }

    // ----- forward stack ------------------------------------------------

    /// Push a full-content snapshot onto the forward stack
    pub fn push_snapshot(&self, key: &PathKey, text: &str) -> Result<()> {
        let frame = FORWARD_FRAME.encode(key.as_str(), text);
        append(&self.forward_path(key), FORWARD_FRAME, &frame)?;
        trace!("Pushed {} byte snapshot for {}", text.len(), key);
        Ok(())
    }

    /// Newest snapshot, without removing it
    pub fn peek_snapshot(&self, key: &PathKey) -> Option<String> {
        read_frames(&self.forward_path(key), FORWARD_FRAME)
            .pop()
            .map(|frame| frame.body)
    }

    /// Pop the newest snapshot
    ///
    /// The artifact is deleted once its last snapshot is popped.
    pub fn pop_snapshot(&self, key: &PathKey) -> Result<Option<String>> {
        let path = self.forward_path(key);
        if !path.exists() {
            return Ok(None);
        }

        let mut frames = read_frames(&path, FORWARD_FRAME);
        let Some(last) = frames.pop() else {
            warn!("Forward stack of {} holds no snapshots, removing it", key);
            remove_if_exists(&path)?;
            return Ok(None);
        };

        if frames.is_empty() {
            remove_if_exists(&path)?;
        } else {
            truncate(&path, last.offset)?;
        }

        trace!("Popped snapshot of {} ({} left)", key, frames.len());
        Ok(Some(last.body))
    }

    /// Delete the forward stack
    pub fn clear_forward(&self, key: &PathKey) -> Result<()> {
        if remove_if_exists(&self.forward_path(key))? {
            debug!("Cleared forward stack of {}", key);
        }
        Ok(())
    }

    /// Number of snapshots on the forward stack
    pub fn snapshot_count(&self, key: &PathKey) -> usize {
        read_frames(&self.forward_path(key), FORWARD_FRAME).len()
    }

    // ----- inventory ----------------------------------------------------

    /// Keys that own at least one artifact, sorted
    pub fn tracked_keys(&self) -> Result<Vec<String>> {
        let mut keys = BTreeSet::new();

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some((key, ext)) = name.rsplit_once('.') {
                if !key.is_empty() && matches!(ext, LOG_EXT | COUNTER_EXT | FORWARD_EXT) {
                    keys.insert(key.to_string());
                }
            }
        }

        Ok(keys.into_iter().collect())
    }

    fn log_path(&self, key: &PathKey) -> PathBuf {
        self.artifact_path(key, LOG_EXT)
    }

    fn counter_path(&self, key: &PathKey) -> PathBuf {
        self.artifact_path(key, COUNTER_EXT)
    }

    fn forward_path(&self, key: &PathKey) -> PathBuf {
        self.artifact_path(key, FORWARD_EXT)
    }

    fn artifact_path(&self, key: &PathKey, ext: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", key.as_str(), ext))
    }
}

/// Decode an artifact; unreadable artifacts decode as empty
fn read_frames(path: &Path, kind: FrameKind) -> Vec<Frame> {
    match fs::read(path) {
        Ok(bytes) => kind.decode_all(&bytes),
        Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
        Err(e) => {
            warn!("Failed to read {:?}, treating as empty: {}", path, e);
            Vec::new()
        }
    }
}

/// Append one frame after the last intact frame of the artifact
///
/// A damaged tail is cut off first; frames written after it could never be
/// decoded.
fn append(path: &Path, kind: FrameKind, frame: &str) -> Result<()> {
    match fs::read(path) {
        Ok(bytes) => {
            let intact = kind.decode_all(&bytes).last().map_or(0, |f| f.end);
            if intact < bytes.len() as u64 {
                warn!(
                    "Discarding {} damaged bytes at the end of {:?}",
                    bytes.len() as u64 - intact,
                    path
                );
                truncate(path, intact)?;
            }
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(frame.as_bytes())?;
    Ok(())
}

fn truncate(path: &Path, len: u64) -> Result<()> {
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_len(len)?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

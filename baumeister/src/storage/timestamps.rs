//! Per-file modification stamps backing incremental dirtiness checks.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::debug;

use super::{load_snapshot, remove_snapshot, save_snapshot};
use crate::error::StorageError;

/// Persistent map of source file → millisecond mtime recorded when the file
/// was last compiled successfully. A file whose current mtime differs from
/// its stamp (or that has no stamp) is dirty.
#[derive(Debug)]
pub struct TimestampStorage {
    path: PathBuf,
    stamps: Mutex<HashMap<PathBuf, u64>>,
}

impl TimestampStorage {
    /// Open the storage at `path`, loading the previous snapshot if any.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let stamps = load_snapshot(&path)?.unwrap_or_default();
        Ok(Self {
            path,
            stamps: Mutex::new(stamps),
        })
    }

    /// Recorded stamp for `file`.
    pub fn stamp(&self, file: &Path) -> Option<u64> {
        self.stamps.lock().get(file).copied()
    }

    /// Record a stamp for `file`.
    pub fn set_stamp(&self, file: &Path, stamp: u64) {
        let _ = self.stamps.lock().insert(file.to_path_buf(), stamp);
    }

    /// Drop the stamp for `file`.
    pub fn remove_stamp(&self, file: &Path) {
        let _ = self.stamps.lock().remove(file);
    }

    /// Stamped files lying under `root`.
    pub fn stamped_under(&self, root: &Path) -> Vec<PathBuf> {
        self.stamps
            .lock()
            .keys()
            .filter(|path| path.starts_with(root))
            .cloned()
            .collect()
    }

    /// Persist the current stamps. Safe to call concurrently with a running
    /// build; the snapshot is whatever the map holds at the moment of the
    /// call.
    pub fn force(&self) -> Result<(), StorageError> {
        let snapshot: HashMap<PathBuf, u64> = self.stamps.lock().clone();
        debug!(stamps = snapshot.len(), "flushing timestamp storage");
        save_snapshot(&self.path, &snapshot)
    }

    /// Wipe all stamps, in memory and on disk.
    pub fn clean(&self) -> Result<(), StorageError> {
        self.stamps.lock().clear();
        remove_snapshot(&self.path)
    }
}

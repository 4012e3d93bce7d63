//! Persistent build state: timestamps, dirty files, source↔output mappings.
//!
//! Every store keeps its state in memory behind its own lock and serializes
//! to a JSON snapshot on flush. A snapshot that fails to decode surfaces
//! [`crate::error::StorageError::Corrupted`], which the driver classifies as
//! a rebuild request.

mod data;
mod dirty;
mod mappings;
mod timestamps;

pub use data::DataManager;
pub use dirty::DirtyStateStore;
pub use mappings::{OutputToSourceRegistry, PathsMapping, SourceToOutputMap};
pub use timestamps::TimestampStorage;

use std::path::{Path, PathBuf};

use crate::error::StorageError;

/// Canonical string form of a path used as a JSON map key.
pub(crate) fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

pub(crate) fn io_error(path: &Path, source: std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Load a JSON snapshot, mapping a missing file to `None` and a decode
/// failure to [`StorageError::Corrupted`].
pub(crate) fn load_snapshot<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> Result<Option<T>, StorageError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(io_error(path, err)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|err| StorageError::Corrupted {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })
}

/// Persist a JSON snapshot, creating parent directories as needed.
pub(crate) fn save_snapshot<T: serde::Serialize>(
    path: &Path,
    value: &T,
) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|err| io_error(parent, err))?;
    }
    let bytes = serde_json::to_vec(value).map_err(|err| StorageError::Corrupted {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })?;
    std::fs::write(path, bytes).map_err(|err| io_error(path, err))
}

/// Remove a snapshot file if present.
pub(crate) fn remove_snapshot(path: &Path) -> Result<(), StorageError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_error(path, err)),
    }
}

/// File-system-safe file name for a target id.
pub(crate) fn target_file_name(id: &str) -> PathBuf {
    let sanitized: String = id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
            c
        } else {
            '_'
        })
        .collect();
    PathBuf::from(format!("{sanitized}.json"))
}

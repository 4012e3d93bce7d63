//! Source↔output mappings and the inverse safe-to-delete registry.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{load_snapshot, remove_snapshot, save_snapshot};
use crate::error::StorageError;
use crate::target::TargetId;

/// Persistent many-to-many association between the source paths of one
/// target and the output paths produced from them.
#[derive(Debug)]
pub struct SourceToOutputMap {
    target: TargetId,
    path: PathBuf,
    map: Mutex<BTreeMap<String, Vec<String>>>,
    registry: Arc<OutputToSourceRegistry>,
}

impl SourceToOutputMap {
    /// Open the map for `target` at `path`. Writes keep `registry`, the
    /// inverse index, in sync.
    pub fn open(
        target: TargetId,
        path: PathBuf,
        registry: Arc<OutputToSourceRegistry>,
    ) -> Result<Self, StorageError> {
        let map = load_snapshot(&path)?.unwrap_or_default();
        Ok(Self {
            target,
            path,
            map: Mutex::new(map),
            registry,
        })
    }

    /// Target this map belongs to.
    pub fn target(&self) -> &TargetId {
        &self.target
    }

    /// All tracked source paths.
    pub fn sources(&self) -> Vec<String> {
        self.map.lock().keys().cloned().collect()
    }

    /// Outputs recorded for `source`.
    pub fn outputs(&self, source: &str) -> Vec<String> {
        self.map.lock().get(source).cloned().unwrap_or_default()
    }

    /// Replace the outputs of `source`, updating the inverse registry. An
    /// empty list drops the association.
    pub fn set_outputs(&self, source: &str, outputs: Vec<String>) {
        let previous = {
            let mut map = self.map.lock();
            if outputs.is_empty() {
                map.remove(source).unwrap_or_default()
            } else {
                map.insert(source.to_string(), outputs.clone())
                    .unwrap_or_default()
            }
        };
        for old in &previous {
            if !outputs.contains(old) {
                self.registry.unregister(old, source);
            }
        }
        for new in &outputs {
            self.registry.register(new, source);
        }
    }

    /// Append one output to `source`, updating the inverse registry.
    pub fn append_output(&self, source: &str, output: &str) {
        let mut map = self.map.lock();
        let outputs = map.entry(source.to_string()).or_default();
        if !outputs.iter().any(|o| o == output) {
            outputs.push(output.to_string());
        }
        drop(map);
        self.registry.register(output, source);
    }

    /// Persist the current snapshot.
    pub fn save(&self) -> Result<(), StorageError> {
        let snapshot = self.map.lock().clone();
        save_snapshot(&self.path, &snapshot)
    }
}

/// Inverse index answering whether an output path is claimed by any source
/// other than a given one. Shared by all per-target maps of a project.
#[derive(Debug, Default)]
pub struct OutputToSourceRegistry {
    path: PathBuf,
    map: Mutex<BTreeMap<String, BTreeSet<String>>>,
}

impl OutputToSourceRegistry {
    /// Open the registry at `path`.
    pub fn open(path: PathBuf) -> Result<Self, StorageError> {
        let map = load_snapshot(&path)?.unwrap_or_default();
        Ok(Self {
            path,
            map: Mutex::new(map),
        })
    }

    /// Record that `source` produces `output`.
    pub fn register(&self, output: &str, source: &str) {
        let _ = self
            .map
            .lock()
            .entry(output.to_string())
            .or_default()
            .insert(source.to_string());
    }

    /// Drop the claim of `source` on `output`.
    pub fn unregister(&self, output: &str, source: &str) {
        let mut map = self.map.lock();
        if let Some(sources) = map.get_mut(output) {
            let _ = sources.remove(source);
            if sources.is_empty() {
                let _ = map.remove(output);
            }
        }
    }

    /// Of `outputs`, those safe to delete when `source` goes away: an output
    /// is kept back if any other live source also claims it.
    pub fn safe_to_delete_outputs(&self, outputs: &[String], source: &str) -> Vec<String> {
        let map = self.map.lock();
        outputs
            .iter()
            .filter(|output| {
                map.get(*output)
                    .map(|sources| sources.iter().all(|s| s == source))
                    .unwrap_or(true)
            })
            .cloned()
            .collect()
    }

    /// Persist the current snapshot.
    pub fn save(&self) -> Result<(), StorageError> {
        let snapshot = self.map.lock().clone();
        save_snapshot(&self.path, &snapshot)
    }

    /// Wipe the registry, in memory and on disk.
    pub fn clean(&self) -> Result<(), StorageError> {
        self.map.lock().clear();
        remove_snapshot(&self.path)
    }
}

/// Generic persistent one-to-many paths mapping (source → bound form files).
#[derive(Debug, Default)]
pub struct PathsMapping {
    path: PathBuf,
    map: Mutex<BTreeMap<String, Vec<String>>>,
}

impl PathsMapping {
    /// Open the mapping at `path`.
    pub fn open(path: PathBuf) -> Result<Self, StorageError> {
        let map = load_snapshot(&path)?.unwrap_or_default();
        Ok(Self {
            path,
            map: Mutex::new(map),
        })
    }

    /// Bound paths for `source`.
    pub fn state(&self, source: &str) -> Option<Vec<String>> {
        self.map.lock().get(source).cloned()
    }

    /// Replace the bound paths of `source`.
    pub fn set_state(&self, source: &str, bound: Vec<String>) {
        let _ = self.map.lock().insert(source.to_string(), bound);
    }

    /// Drop the mapping for `source`.
    pub fn remove(&self, source: &str) {
        let _ = self.map.lock().remove(source);
    }

    /// Persist the current snapshot.
    pub fn save(&self) -> Result<(), StorageError> {
        let snapshot = self.map.lock().clone();
        save_snapshot(&self.path, &snapshot)
    }

    /// Wipe the mapping, in memory and on disk.
    pub fn clean(&self) -> Result<(), StorageError> {
        self.map.lock().clear();
        remove_snapshot(&self.path)
    }
}

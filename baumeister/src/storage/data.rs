//! The data manager: owns the per-target mappings and drives flushes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{
    load_snapshot, remove_snapshot, save_snapshot, target_file_name, DirtyStateStore,
    OutputToSourceRegistry, PathsMapping, SourceToOutputMap,
};
use crate::error::StorageError;
use crate::target::{TargetChunk, TargetId};

/// Current on-disk format version. Bump on incompatible layout changes.
const DATA_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct VersionStamp {
    version: u32,
}

/// Owns the project's persistent mapping stores: per-target source↔output
/// maps (opened lazily, closed per chunk), the inverse output→source
/// registry, the source→form mapping and the dirty-state snapshot.
///
/// `flush` is safe to call concurrently with a running build; each store
/// snapshots under its own lock.
pub struct DataManager {
    data_dir: PathBuf,
    mappings_dir: PathBuf,
    maps: Mutex<HashMap<TargetId, Arc<SourceToOutputMap>>>,
    out_to_src: Arc<OutputToSourceRegistry>,
    src_to_form: Arc<PathsMapping>,
    dirty: Arc<DirtyStateStore>,
}

impl DataManager {
    /// Open the manager rooted at `data_dir`.
    pub fn open(
        data_dir: impl Into<PathBuf>,
        dirty: Arc<DirtyStateStore>,
    ) -> Result<Self, StorageError> {
        let data_dir = data_dir.into();
        let mappings_dir = data_dir.join("mappings");
        let out_to_src = Arc::new(OutputToSourceRegistry::open(data_dir.join("out2src.json"))?);
        let src_to_form = Arc::new(PathsMapping::open(data_dir.join("src2form.json"))?);
        Ok(Self {
            data_dir,
            mappings_dir,
            maps: Mutex::new(HashMap::new()),
            out_to_src,
            src_to_form,
            dirty,
        })
    }

    /// The source↔output map of `target`, opened from disk on first use.
    pub fn source_to_output_map(
        &self,
        target: &TargetId,
    ) -> Result<Arc<SourceToOutputMap>, StorageError> {
        let mut maps = self.maps.lock();
        if let Some(existing) = maps.get(target) {
            return Ok(Arc::clone(existing));
        }
        let path = self.mappings_dir.join(target_file_name(target.as_str()));
        let map = Arc::new(SourceToOutputMap::open(
            target.clone(),
            path,
            Arc::clone(&self.out_to_src),
        )?);
        let _ = maps.insert(target.clone(), Arc::clone(&map));
        Ok(map)
    }

    /// The inverse output→source registry.
    pub fn output_to_source_registry(&self) -> &Arc<OutputToSourceRegistry> {
        &self.out_to_src
    }

    /// The source→form mapping.
    pub fn source_to_form_map(&self) -> &Arc<PathsMapping> {
        &self.src_to_form
    }

    /// Persist and drop the source↔output maps of the given chunks. Called
    /// from chunk finalize, after which dependent chunks may open the maps
    /// afresh.
    pub fn close_source_to_output_storages<'a>(
        &self,
        chunks: impl IntoIterator<Item = &'a TargetChunk>,
    ) -> Result<(), StorageError> {
        let mut maps = self.maps.lock();
        for chunk in chunks {
            for target in chunk.targets() {
                if let Some(map) = maps.remove(target.id()) {
                    map.save()?;
                }
            }
        }
        Ok(())
    }

    /// Persist every open store. `final_flush` marks the flush that ends an
    /// invocation (the log line is the only difference; the write set is
    /// identical, so the low-memory callback can share this path).
    pub fn flush(&self, final_flush: bool) -> Result<(), StorageError> {
        let maps: Vec<Arc<SourceToOutputMap>> = self.maps.lock().values().cloned().collect();
        for map in maps {
            map.save()?;
        }
        self.out_to_src.save()?;
        self.src_to_form.save()?;
        self.dirty.save()?;
        if final_flush {
            info!("build data flushed");
        } else {
            debug!("intermediate build data flush");
        }
        Ok(())
    }

    /// Stamp the on-disk format version after a successful run.
    pub fn save_version(&self) -> Result<(), StorageError> {
        save_snapshot(
            &self.data_dir.join("version.json"),
            &VersionStamp {
                version: DATA_VERSION,
            },
        )
    }

    /// Whether the on-disk version stamp is absent or stale.
    pub fn version_differs(&self) -> Result<bool, StorageError> {
        let stamp: Option<VersionStamp> = load_snapshot(&self.data_dir.join("version.json"))?;
        Ok(stamp.map(|s| s.version != DATA_VERSION).unwrap_or(true))
    }

    /// Wipe every mapping store, in memory and on disk.
    pub fn clean(&self) -> Result<(), StorageError> {
        self.maps.lock().clear();
        self.out_to_src.clean()?;
        self.src_to_form.clean()?;
        remove_snapshot(&self.data_dir.join("version.json"))?;
        if self.mappings_dir.exists() {
            std::fs::remove_dir_all(&self.mappings_dir)
                .map_err(|err| super::io_error(&self.mappings_dir, err))?;
        }
        Ok(())
    }

    /// Root directory of the manager's stores.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

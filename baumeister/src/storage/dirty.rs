//! Dirty-state store: which files need recompilation, which were deleted.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{load_snapshot, save_snapshot, TimestampStorage};
use crate::context::{CompileContext, ContextKey};
use crate::error::{Result, StorageError};
use crate::fs_ops;
use crate::target::{BuildTarget, TargetChunk, TargetId};

/// Targets whose dirty state was reconciled during this invocation.
static FS_INITIALIZED: ContextKey<Mutex<HashSet<TargetId>>> =
    ContextKey::global("dirty.state.initialized.targets");

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct TargetState {
    initialized: bool,
    // root id → files to recompile
    dirty: BTreeMap<String, BTreeSet<PathBuf>>,
    deleted: BTreeSet<PathBuf>,
}

impl TargetState {
    fn dirty_files(&self) -> impl Iterator<Item = (&String, &PathBuf)> {
        self.dirty
            .iter()
            .flat_map(|(root, files)| files.iter().map(move |f| (root, f)))
    }
}

/// Tracks, per target, the sources that must be recompiled and the sources
/// deleted since the last build. Persisted between invocations; round and
/// chunk scratch areas are keyed by context identity and cleared at the
/// chunk runner's well-defined points.
#[derive(Debug, Default)]
pub struct DirtyStateStore {
    path: PathBuf,
    targets: Mutex<HashMap<TargetId, TargetState>>,
    // ctx id → dirty marks deferred to the next round
    round_scratch: Mutex<HashMap<u64, Vec<(Arc<BuildTarget>, PathBuf)>>>,
    // ctx id → targets of the chunk currently running under that context
    chunk_scratch: Mutex<HashMap<u64, Vec<TargetId>>>,
}

impl DirtyStateStore {
    /// Open the store at `path`, loading the previous snapshot if any.
    pub fn open(path: impl Into<PathBuf>) -> std::result::Result<Self, StorageError> {
        let path = path.into();
        let persisted: HashMap<TargetId, TargetState> =
            load_snapshot(&path)?.unwrap_or_default();
        Ok(Self {
            path,
            targets: Mutex::new(persisted),
            ..Self::default()
        })
    }

    /// Make sure the target's dirty state reflects both the persisted
    /// snapshot and the current filesystem. Runs at most once per target per
    /// invocation; forced and rebuild scopes mark everything dirty.
    pub fn ensure_initialized(&self, ctx: &CompileContext, target: &BuildTarget) -> Result<()> {
        let initialized = ctx.user_data_or_init(&FS_INITIALIZED, || Mutex::new(HashSet::new()));
        if !initialized.lock().insert(target.id().clone()) {
            return Ok(());
        }

        let project = Arc::clone(ctx.project());
        let timestamps = project.timestamps();
        let roots = project.root_index().target_roots(target, ctx);

        let force_all = ctx.scope().is_rebuild()
            || ctx.scope().is_forced(target)
            || !self
                .targets
                .lock()
                .get(target.id())
                .map(|s| s.initialized)
                .unwrap_or(false);

        let mut new_dirty: BTreeMap<String, BTreeSet<PathBuf>> = BTreeMap::new();
        let mut new_deleted: BTreeSet<PathBuf> = BTreeSet::new();

        for root in roots.iter().filter(|r| !r.temporary) {
            let files = fs_ops::files_under(&root.path);
            let entry = new_dirty.entry(root.root_id.clone()).or_default();
            for file in files {
                if force_all || timestamps.stamp(&file) != fs_ops::mtime_stamp(&file) {
                    let _ = entry.insert(file);
                }
            }
            // stamped files that vanished from disk are deletions
            for stamped in timestamps.stamped_under(&root.path) {
                if !stamped.exists() {
                    let _ = new_deleted.insert(stamped.clone());
                    timestamps.remove_stamp(&stamped);
                }
            }
        }

        let mut targets = self.targets.lock();
        let state = targets.entry(target.id().clone()).or_default();
        if ctx.scope().is_rebuild() {
            // outputs are wiped wholesale on rebuild; stale deletions are moot
            state.deleted.clear();
        } else {
            state.deleted.append(&mut new_deleted);
        }
        for (root, files) in new_dirty {
            state.dirty.entry(root).or_default().extend(files);
        }
        debug!(target = %target.id(), forced = force_all, "dirty state initialized");
        Ok(())
    }

    /// Snapshot of `root → files` to recompile for `target`.
    pub fn sources_to_recompile(
        &self,
        _ctx: &CompileContext,
        target: &TargetId,
    ) -> BTreeMap<String, BTreeSet<PathBuf>> {
        self.targets
            .lock()
            .get(target)
            .map(|s| s.dirty.clone())
            .unwrap_or_default()
    }

    /// Whether `target` has at least one dirty file the scope affects.
    pub fn has_affected_dirty(&self, ctx: &CompileContext, target: &BuildTarget) -> bool {
        self.targets
            .lock()
            .get(target.id())
            .map(|state| {
                state
                    .dirty_files()
                    .any(|(_, file)| ctx.is_affected(target, file))
            })
            .unwrap_or(false)
    }

    /// Iterate the scope-affected dirty files of `target` through
    /// `processor`; a `false` return stops the iteration. Returns whether
    /// the iteration ran to completion.
    pub fn process_files_to_recompile(
        &self,
        ctx: &CompileContext,
        target: &BuildTarget,
        processor: &mut dyn FnMut(&Path) -> Result<bool>,
    ) -> Result<bool> {
        let files: Vec<PathBuf> = {
            let targets = self.targets.lock();
            targets
                .get(target.id())
                .map(|s| s.dirty_files().map(|(_, f)| f.clone()).collect())
                .unwrap_or_default()
        };
        for file in files {
            if !ctx.is_affected(target, &file) {
                continue;
            }
            if !processor(&file)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Mark one file of `target` dirty. Inside a builder round the mark is
    /// deferred and becomes visible at the next round start; outside rounds
    /// it is applied immediately.
    pub fn mark_dirty(&self, ctx: &CompileContext, target: &Arc<BuildTarget>, file: &Path) {
        let mut scratch = self.round_scratch.lock();
        if let Some(pending) = scratch.get_mut(&ctx.id()) {
            pending.push((Arc::clone(target), file.to_path_buf()));
            return;
        }
        drop(scratch);
        self.mark_dirty_now(target, file);
    }

    fn mark_dirty_now(&self, target: &BuildTarget, file: &Path) {
        let root_id = target
            .roots()
            .iter()
            .filter(|root| file.starts_with(&root.path))
            .max_by_key(|root| root.path.as_os_str().len())
            .map(|root| root.root_id.clone())
            .unwrap_or_default();
        let mut targets = self.targets.lock();
        let state = targets.entry(target.id().clone()).or_default();
        let _ = state
            .dirty
            .entry(root_id)
            .or_default()
            .insert(file.to_path_buf());
    }

    /// Forcibly mark every file of every chunk target dirty (chunk rebuild).
    pub fn mark_chunk_dirty(&self, ctx: &CompileContext, chunk: &TargetChunk) {
        let project = Arc::clone(ctx.project());
        for target in chunk.targets() {
            for root in project.root_index().target_roots(target, ctx) {
                for file in fs_ops::files_under(&root.path) {
                    self.mark_dirty_now(target, &file);
                }
            }
        }
    }

    /// Record a deleted source; drops its dirty mark and its stamp.
    pub fn register_deleted(
        &self,
        target: &TargetId,
        file: &Path,
        timestamps: Option<&TimestampStorage>,
    ) {
        let mut targets = self.targets.lock();
        let state = targets.entry(target.clone()).or_default();
        let _ = state.deleted.insert(file.to_path_buf());
        for files in state.dirty.values_mut() {
            let _ = files.remove(file);
        }
        drop(targets);
        if let Some(timestamps) = timestamps {
            timestamps.remove_stamp(file);
        }
    }

    /// Drain the deleted-paths list of `target`.
    pub fn get_and_clear_deleted_paths(&self, target: &TargetId) -> Vec<PathBuf> {
        let mut targets = self.targets.lock();
        match targets.get_mut(target) {
            Some(state) => std::mem::take(&mut state.deleted).into_iter().collect(),
            None => Vec::new(),
        }
    }

    /// Pre-round hook: record the chunk under this context.
    pub fn before_chunk_build_start(&self, ctx: &CompileContext, chunk: &TargetChunk) {
        let _ = self
            .chunk_scratch
            .lock()
            .insert(ctx.id(), chunk.target_ids());
    }

    /// Round-start hook: publish marks deferred during the previous round
    /// and activate deferral for the coming one.
    pub fn before_next_round_start(&self, ctx: &CompileContext, _chunk: &TargetChunk) {
        let pending = {
            let mut scratch = self.round_scratch.lock();
            scratch.insert(ctx.id(), Vec::new()).unwrap_or_default()
        };
        for (target, file) in pending {
            self.mark_dirty_now(&target, &file);
        }
    }

    /// Deactivate round deferral for this context. Pending marks are
    /// promoted, not dropped: a file dirtied in the last round must stay
    /// dirty for the next build.
    pub fn clear_context_round_data(&self, ctx: &CompileContext) {
        let pending = self.round_scratch.lock().remove(&ctx.id());
        for (target, file) in pending.unwrap_or_default() {
            self.mark_dirty_now(&target, &file);
        }
    }

    /// Discard all per-chunk scratch for this context.
    pub fn clear_context_chunk(&self, ctx: &CompileContext) {
        self.clear_context_round_data(ctx);
        let _ = self.chunk_scratch.lock().remove(&ctx.id());
    }

    /// Drop the dirty set of one root (used when temp roots are cleared).
    pub fn clear_recompile(&self, target: &TargetId, root_id: &str) {
        let mut targets = self.targets.lock();
        if let Some(state) = targets.get_mut(target) {
            let _ = state.dirty.remove(root_id);
        }
    }

    /// Stamp the scope-affected dirty files of `target` as compiled and drop
    /// them from the dirty set.
    pub fn mark_up_to_date(&self, ctx: &CompileContext, target: &BuildTarget) -> Result<()> {
        let affected: Vec<(String, PathBuf)> = {
            let targets = self.targets.lock();
            targets
                .get(target.id())
                .map(|s| {
                    s.dirty_files()
                        .filter(|(_, f)| ctx.is_affected(target, f))
                        .map(|(r, f)| (r.clone(), f.clone()))
                        .collect()
                })
                .unwrap_or_default()
        };

        let timestamps = Arc::clone(ctx.project().timestamps());
        let compilation_start = ctx.compilation_start_stamp();
        let mut stamped = Vec::new();
        for (root, file) in affected {
            // a source touched after compilation started stays dirty
            match fs_ops::mtime_stamp(&file) {
                Some(stamp) if stamp <= compilation_start => {
                    timestamps.set_stamp(&file, stamp);
                    stamped.push((root, file));
                }
                _ => {}
            }
        }

        let mut targets = self.targets.lock();
        let state = targets.entry(target.id().clone()).or_default();
        for (root, file) in stamped {
            if let Some(files) = state.dirty.get_mut(&root) {
                let _ = files.remove(&file);
            }
        }
        state.initialized = true;
        Ok(())
    }

    /// Wipe everything, including scratch state.
    pub fn clear_all(&self) {
        self.targets.lock().clear();
        self.round_scratch.lock().clear();
        self.chunk_scratch.lock().clear();
    }

    /// Persist the current snapshot.
    pub fn save(&self) -> std::result::Result<(), StorageError> {
        let snapshot: HashMap<TargetId, TargetState> = self.targets.lock().clone();
        save_snapshot(&self.path, &snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::TargetId;
    use tempfile::TempDir;

    #[test]
    fn deleted_paths_drain_once() {
        let dir = TempDir::new().unwrap();
        let store = DirtyStateStore::open(dir.path().join("dirty.json")).unwrap();
        let id = TargetId::new("m1");

        store.register_deleted(&id, Path::new("/p/src/gone.x"), None);
        let drained = store.get_and_clear_deleted_paths(&id);
        assert_eq!(drained, vec![PathBuf::from("/p/src/gone.x")]);
        assert!(store.get_and_clear_deleted_paths(&id).is_empty());
    }

    #[test]
    fn snapshot_roundtrip_preserves_dirty_sets() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dirty.json");
        {
            let store = DirtyStateStore::open(&path).unwrap();
            let target = BuildTarget::new(
                "m1",
                "m1",
                crate::target::TargetKind::ModuleBased,
                vec![crate::target::SourceRootDescriptor::new("src", "/p/m1/src")],
                vec![],
            );
            store.mark_dirty_now(&target, Path::new("/p/m1/src/a.x"));
            store.save().unwrap();
        }
        let store = DirtyStateStore::open(&path).unwrap();
        let targets = store.targets.lock();
        let state = targets.get(&TargetId::new("m1")).unwrap();
        assert!(state.dirty["src"].contains(Path::new("/p/m1/src/a.x")));
    }
}

//! Project descriptor and the index interfaces the driver consumes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chunk_graph::DepGraph;
use parking_lot::Mutex;

use crate::context::CompileContext;
use crate::error::StorageError;
use crate::fs_ops;
use crate::storage::{DataManager, DirtyStateStore, TimestampStorage};
use crate::target::{BuildTarget, SourceRootDescriptor, TargetChunk, TargetId};

/// Target index: the project's targets and their dependency structure.
pub trait BuildTargetIndex: Send + Sync {
    /// Every target of the project.
    fn all_targets(&self) -> Vec<Arc<BuildTarget>>;

    /// Target chunks (strongly-connected components) topologically sorted,
    /// dependencies first.
    fn sorted_target_chunks(&self, ctx: &CompileContext) -> Vec<TargetChunk>;

    /// Direct dependencies of `target`.
    fn dependencies(&self, target: &BuildTarget, ctx: &CompileContext) -> Vec<Arc<BuildTarget>>;
}

/// Root index: source roots per target, including temporarily registered
/// ones.
pub trait BuildRootIndex: Send + Sync {
    /// All source roots of `target`, temp roots included.
    fn target_roots(&self, target: &BuildTarget, ctx: &CompileContext)
        -> Vec<SourceRootDescriptor>;

    /// Register a root for this invocation only.
    fn register_temp_root(&self, target: &TargetId, root: SourceRootDescriptor);

    /// Remove and return every temp root.
    fn clear_temp_roots(&self, ctx: &CompileContext) -> Vec<(TargetId, SourceRootDescriptor)>;
}

/// Content/exclusion queries over the project layout.
pub trait ModuleExcludeIndex: Send + Sync {
    /// Whether `file` lies inside the project content.
    fn is_in_content(&self, file: &Path) -> bool;

    /// Whether `file` is excluded from the project content.
    fn is_excluded(&self, file: &Path) -> bool;
}

/// In-memory target index over an explicit dependency edge list. Chunk
/// computation condenses the dependency graph through `chunk-graph`.
pub struct GraphTargetIndex {
    targets: Vec<Arc<BuildTarget>>,
    by_id: HashMap<TargetId, Arc<BuildTarget>>,
    deps: HashMap<TargetId, Vec<TargetId>>,
}

impl GraphTargetIndex {
    /// Index over `targets` with `deps` edges (`from` depends on `to`).
    pub fn new(targets: Vec<Arc<BuildTarget>>, deps: Vec<(TargetId, TargetId)>) -> Self {
        let by_id = targets
            .iter()
            .map(|t| (t.id().clone(), Arc::clone(t)))
            .collect();
        let mut dep_map: HashMap<TargetId, Vec<TargetId>> = HashMap::new();
        for (from, to) in deps {
            dep_map.entry(from).or_default().push(to);
        }
        Self {
            targets,
            by_id,
            deps: dep_map,
        }
    }
}

impl BuildTargetIndex for GraphTargetIndex {
    fn all_targets(&self) -> Vec<Arc<BuildTarget>> {
        self.targets.clone()
    }

    fn sorted_target_chunks(&self, _ctx: &CompileContext) -> Vec<TargetChunk> {
        let mut graph = DepGraph::new();
        let mut node_of = HashMap::new();
        for target in &self.targets {
            let node = graph.add_node(Arc::clone(target));
            let _ = node_of.insert(target.id().clone(), node);
        }
        for (from, tos) in &self.deps {
            for to in tos {
                if let (Some(&f), Some(&t)) = (node_of.get(from), node_of.get(to)) {
                    graph.add_dependency(f, t);
                }
            }
        }
        graph
            .condense()
            .into_iter()
            .map(|component| {
                TargetChunk::new(
                    component
                        .node_ids()
                        .iter()
                        .map(|id| graph.node(*id).expect("node from own condensation").clone())
                        .collect(),
                )
            })
            .collect()
    }

    fn dependencies(&self, target: &BuildTarget, _ctx: &CompileContext) -> Vec<Arc<BuildTarget>> {
        self.deps
            .get(target.id())
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.by_id.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Root index serving each target's declared roots plus temp registrations.
#[derive(Default)]
pub struct ProjectRootIndex {
    temp: Mutex<Vec<(TargetId, SourceRootDescriptor)>>,
}

impl ProjectRootIndex {
    /// Empty index; roots come from the targets themselves.
    pub fn new() -> Self {
        Self::default()
    }
}

impl BuildRootIndex for ProjectRootIndex {
    fn target_roots(
        &self,
        target: &BuildTarget,
        _ctx: &CompileContext,
    ) -> Vec<SourceRootDescriptor> {
        let mut roots = target.roots().to_vec();
        for (id, root) in self.temp.lock().iter() {
            if id == target.id() {
                roots.push(root.clone());
            }
        }
        roots
    }

    fn register_temp_root(&self, target: &TargetId, mut root: SourceRootDescriptor) {
        root.temporary = true;
        self.temp.lock().push((target.clone(), root));
    }

    fn clear_temp_roots(&self, _ctx: &CompileContext) -> Vec<(TargetId, SourceRootDescriptor)> {
        std::mem::take(&mut *self.temp.lock())
    }
}

/// Exclude index over explicit content and excluded root lists.
pub struct ContentExcludeIndex {
    content_roots: Vec<PathBuf>,
    excluded_roots: Vec<PathBuf>,
}

impl ContentExcludeIndex {
    /// Index with the given content and excluded roots.
    pub fn new(content_roots: Vec<PathBuf>, excluded_roots: Vec<PathBuf>) -> Self {
        Self {
            content_roots,
            excluded_roots,
        }
    }
}

impl ModuleExcludeIndex for ContentExcludeIndex {
    fn is_in_content(&self, file: &Path) -> bool {
        fs_ops::is_under_any(&self.content_roots, file)
    }

    fn is_excluded(&self, file: &Path) -> bool {
        fs_ops::is_under_any(&self.excluded_roots, file)
    }
}

/// Everything a build invocation needs to know about a project: indexes and
/// persistent stores. Stores live under `<system_root>/data`.
pub struct ProjectDescriptor {
    system_root: PathBuf,
    target_index: Arc<dyn BuildTargetIndex>,
    root_index: Arc<dyn BuildRootIndex>,
    exclude_index: Arc<dyn ModuleExcludeIndex>,
    dirty_state: Arc<DirtyStateStore>,
    timestamps: Arc<TimestampStorage>,
    data_manager: Arc<DataManager>,
}

impl ProjectDescriptor {
    /// Open a descriptor with explicit index implementations.
    pub fn new(
        system_root: impl Into<PathBuf>,
        target_index: Arc<dyn BuildTargetIndex>,
        root_index: Arc<dyn BuildRootIndex>,
        exclude_index: Arc<dyn ModuleExcludeIndex>,
    ) -> Result<Self, StorageError> {
        let system_root = system_root.into();
        let data_dir = system_root.join("data");
        let dirty_state = Arc::new(DirtyStateStore::open(data_dir.join("dirty.json"))?);
        let timestamps = Arc::new(TimestampStorage::open(data_dir.join("timestamps.json"))?);
        let data_manager = Arc::new(DataManager::open(data_dir, Arc::clone(&dirty_state))?);
        Ok(Self {
            system_root,
            target_index,
            root_index,
            exclude_index,
            dirty_state,
            timestamps,
            data_manager,
        })
    }

    /// Convenience constructor over in-memory indexes: content roots are the
    /// targets' source roots, nothing is excluded.
    pub fn in_memory(
        system_root: impl Into<PathBuf>,
        targets: Vec<Arc<BuildTarget>>,
        deps: Vec<(TargetId, TargetId)>,
    ) -> Result<Self, StorageError> {
        let content_roots = targets
            .iter()
            .flat_map(|t| t.roots().iter().map(|r| r.path.clone()))
            .collect();
        Self::new(
            system_root,
            Arc::new(GraphTargetIndex::new(targets, deps)),
            Arc::new(ProjectRootIndex::new()),
            Arc::new(ContentExcludeIndex::new(content_roots, Vec::new())),
        )
    }

    /// Project system root (holds the data dir and local temp space).
    pub fn system_root(&self) -> &Path {
        &self.system_root
    }

    /// The target index.
    pub fn target_index(&self) -> &Arc<dyn BuildTargetIndex> {
        &self.target_index
    }

    /// The root index.
    pub fn root_index(&self) -> &Arc<dyn BuildRootIndex> {
        &self.root_index
    }

    /// The content/exclusion index.
    pub fn exclude_index(&self) -> &Arc<dyn ModuleExcludeIndex> {
        &self.exclude_index
    }

    /// The dirty-state store.
    pub fn dirty_state(&self) -> &Arc<DirtyStateStore> {
        &self.dirty_state
    }

    /// The timestamp storage.
    pub fn timestamps(&self) -> &Arc<TimestampStorage> {
        &self.timestamps
    }

    /// The data manager.
    pub fn data_manager(&self) -> &Arc<DataManager> {
        &self.data_manager
    }
}

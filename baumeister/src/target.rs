//! Build targets and target chunks.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Stable target identity, unique within a project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetId(pub String);

impl TargetId {
    /// New id from any string-ish value.
    pub fn new(id: impl Into<String>) -> Self {
        TargetId(id.into())
    }

    /// The raw id string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Discriminates module-based targets from everything else. Only module-based
/// targets may participate in cyclic chunks and run the module-level builder
/// pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetKind {
    /// Module production or test sources.
    ModuleBased,
    /// Any other target variety (artifacts, resources, ...).
    Other,
}

/// A source root belonging to a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRootDescriptor {
    /// Identity of the root within its target.
    pub root_id: String,
    /// Filesystem location of the root.
    pub path: PathBuf,
    /// Whether the root holds generated sources (safe to delete).
    pub generated: bool,
    /// Whether the root was registered temporarily for this invocation only.
    pub temporary: bool,
}

impl SourceRootDescriptor {
    /// Plain non-generated, non-temporary root.
    pub fn new(root_id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            root_id: root_id.into(),
            path: path.into(),
            generated: false,
            temporary: false,
        }
    }

    /// Mark the root as holding generated sources.
    pub fn generated(mut self) -> Self {
        self.generated = true;
        self
    }
}

/// A unit of build work: stable identity, presentable name, source roots,
/// output roots and a kind discriminator.
#[derive(Debug, Clone)]
pub struct BuildTarget {
    id: TargetId,
    name: String,
    kind: TargetKind,
    roots: Vec<SourceRootDescriptor>,
    output_roots: Vec<PathBuf>,
}

impl BuildTarget {
    /// Assemble a target.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        kind: TargetKind,
        roots: Vec<SourceRootDescriptor>,
        output_roots: Vec<PathBuf>,
    ) -> Self {
        Self {
            id: TargetId::new(id),
            name: name.into(),
            kind,
            roots,
            output_roots,
        }
    }

    /// Stable identity.
    pub fn id(&self) -> &TargetId {
        &self.id
    }

    /// Human-readable name for diagnostics.
    pub fn presentable_name(&self) -> &str {
        &self.name
    }

    /// Kind discriminator.
    pub fn kind(&self) -> TargetKind {
        self.kind
    }

    /// Whether this target is module-based.
    pub fn is_module_based(&self) -> bool {
        self.kind == TargetKind::ModuleBased
    }

    /// Source roots of this target.
    pub fn roots(&self) -> &[SourceRootDescriptor] {
        &self.roots
    }

    /// Output roots of this target.
    pub fn output_roots(&self) -> &[PathBuf] {
        &self.output_roots
    }
}

impl fmt::Display for BuildTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.presentable_name())
    }
}

/// One strongly-connected component of the target graph: the unit of
/// scheduling. Most chunks are singletons; multi-target chunks represent
/// cyclic dependencies and are only legal when all members are module-based.
#[derive(Debug, Clone)]
pub struct TargetChunk {
    targets: Vec<Arc<BuildTarget>>,
}

impl TargetChunk {
    /// New chunk over the given targets. Panics on an empty target list —
    /// the chunk graph never produces one.
    pub fn new(targets: Vec<Arc<BuildTarget>>) -> Self {
        assert!(!targets.is_empty(), "a chunk must contain at least one target");
        Self { targets }
    }

    /// Targets of the chunk, in graph insertion order.
    pub fn targets(&self) -> &[Arc<BuildTarget>] {
        &self.targets
    }

    /// Ids of the chunk's targets.
    pub fn target_ids(&self) -> Vec<TargetId> {
        self.targets.iter().map(|t| t.id().clone()).collect()
    }

    /// Whether every member is module-based.
    pub fn is_all_module_based(&self) -> bool {
        self.targets.iter().all(|t| t.is_module_based())
    }

    /// Number of member targets.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Whether the chunk has exactly one target.
    pub fn is_singleton(&self) -> bool {
        self.targets.len() == 1
    }

    /// Presentable name: the member names joined for diagnostics.
    pub fn name(&self) -> String {
        self.targets
            .iter()
            .map(|t| t.presentable_name())
            .collect::<Vec<_>>()
            .join("+")
    }
}

impl fmt::Display for TargetChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

//! Compile scopes: immutable predicates describing what a build affects.

use std::collections::HashSet;
use std::path::Path;

use crate::target::{BuildTarget, TargetId};

/// Immutable predicate object deciding what the current invocation touches.
pub trait BuildScope: Send + Sync {
    /// Whether `target` participates in this build at all.
    fn is_affected(&self, target: &BuildTarget) -> bool;

    /// Whether `file` of `target` participates in this build.
    fn is_affected_file(&self, target: &BuildTarget, _file: &Path) -> bool {
        self.is_affected(target)
    }

    /// Whether `target` must be recompiled regardless of dirtiness.
    fn is_forced(&self, target: &BuildTarget) -> bool;

    /// Whether this is a whole-project rebuild.
    fn is_rebuild(&self) -> bool;
}

/// Whole-project rebuild: everything affected, everything forced.
#[derive(Debug, Default)]
pub struct RebuildScope;

impl BuildScope for RebuildScope {
    fn is_affected(&self, _target: &BuildTarget) -> bool {
        true
    }

    fn is_forced(&self, _target: &BuildTarget) -> bool {
        true
    }

    fn is_rebuild(&self) -> bool {
        true
    }
}

/// Incremental make over the whole project: everything affected, nothing
/// forced; only dirty files are recompiled.
#[derive(Debug, Default)]
pub struct MakeScope;

impl BuildScope for MakeScope {
    fn is_affected(&self, _target: &BuildTarget) -> bool {
        true
    }

    fn is_forced(&self, _target: &BuildTarget) -> bool {
        false
    }

    fn is_rebuild(&self) -> bool {
        false
    }
}

/// Scope restricted to an explicit target set, optionally forcing full
/// recompilation of those targets.
#[derive(Debug)]
pub struct TargetsScope {
    targets: HashSet<TargetId>,
    forced: bool,
}

impl TargetsScope {
    /// Scope over `targets`; `forced` demands full recompilation of each.
    pub fn new(targets: impl IntoIterator<Item = TargetId>, forced: bool) -> Self {
        Self {
            targets: targets.into_iter().collect(),
            forced,
        }
    }
}

impl BuildScope for TargetsScope {
    fn is_affected(&self, target: &BuildTarget) -> bool {
        self.targets.contains(target.id())
    }

    fn is_forced(&self, target: &BuildTarget) -> bool {
        self.forced && self.targets.contains(target.id())
    }

    fn is_rebuild(&self) -> bool {
        false
    }
}

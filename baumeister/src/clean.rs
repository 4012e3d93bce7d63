//! Output cleaning: whole-project clean on rebuild, selective clean per
//! target, and the cleared-outputs registry.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::async_tasks::AsyncTaskList;
use crate::builder::DirtyFilesHolder;
use crate::context::{CompileContext, ContextKey};
use crate::error::Result;
use crate::fs_ops;
use crate::message::{BuildMessage, MessageKind};
use crate::storage::path_key;
use crate::target::{BuildTarget, TargetId};

/// Targets whose outputs were purged during this invocation. Later deletion
/// steps consult this to skip redundant work.
static TARGETS_WITH_CLEARED_OUTPUT: ContextKey<Mutex<HashSet<TargetId>>> =
    ContextKey::global("targets.with.cleared.output");

/// Record that at least one output-clear operation completed for `targets`.
pub(crate) fn register_targets_with_cleared_output<'a>(
    ctx: &CompileContext,
    targets: impl IntoIterator<Item = &'a TargetId>,
) {
    let registry = ctx.user_data_or_init(&TARGETS_WITH_CLEARED_OUTPUT, || {
        Mutex::new(HashSet::new())
    });
    let mut cleared = registry.lock();
    for target in targets {
        let _ = cleared.insert(target.clone());
    }
}

/// Whether `target`'s outputs were already cleared this invocation.
pub(crate) fn is_target_output_cleared(ctx: &CompileContext, target: &TargetId) -> bool {
    ctx.get_user_data(&TARGETS_WITH_CLEARED_OUTPUT)
        .map(|registry| registry.lock().contains(target))
        .unwrap_or(false)
}

/// Selective clean: walk the target's source↔output map and delete every
/// listed output. Module-based targets additionally get their emptied parent
/// directories pruned.
pub fn clear_output_files(ctx: &CompileContext, target: &BuildTarget) -> Result<()> {
    let map = ctx
        .project()
        .data_manager()
        .source_to_output_map(target.id())?;
    let mut dirs_to_prune = target.is_module_based().then(HashSet::new);

    for source in map.sources() {
        let outputs = map.outputs(&source);
        if outputs.is_empty() {
            continue;
        }
        let mut deleted = Vec::new();
        for output in &outputs {
            let _ = fs_ops::delete_recursively(
                Path::new(output),
                &mut deleted,
                dirs_to_prune.as_mut(),
            )?;
        }
        if !deleted.is_empty() {
            ctx.process_message(BuildMessage::FileDeleted { paths: deleted });
        }
    }

    register_targets_with_cleared_output(ctx, [target.id()]);
    if let Some(dirs) = dirs_to_prune {
        fs_ops::prune_empty_dirs(dirs);
    }
    Ok(())
}

/// Selective clean that never fails the build: failures are logged and
/// reported as a warning.
pub(crate) fn clear_output_files_uninterruptibly(ctx: &CompileContext, target: &BuildTarget) {
    if let Err(err) = clear_output_files(ctx, target) {
        info!(target = %target.id(), error = %err, "problems clearing output files");
        ctx.process_message(BuildMessage::compiler(
            MessageKind::Warning,
            format!(
                "Problems clearing output files for target \"{}\": {err}",
                target.presentable_name()
            ),
        ));
    }
}

/// Whole-project clean: delete the contents of every affected output root,
/// falling back to selective cleaning where an output root overlaps a
/// source root. Leftovers that resist deletion are retried asynchronously.
pub(crate) fn clear_outputs(ctx: &CompileContext, async_tasks: &AsyncTaskList) -> Result<()> {
    let project = Arc::clone(ctx.project());
    let all_targets = project.target_index().all_targets();

    // output root → targets producing into it
    let mut roots_to_delete: HashMap<PathBuf, Vec<Arc<BuildTarget>>> = HashMap::new();
    for target in &all_targets {
        if ctx.scope().is_affected(target) {
            for root in target.output_roots() {
                roots_to_delete
                    .entry(root.clone())
                    .or_default()
                    .push(Arc::clone(target));
            }
        }
    }

    // non-generated roots whose content is visible to the user: deleting
    // them would take sources with it
    let exclude_index = Arc::clone(project.exclude_index());
    let mut source_roots: HashSet<PathBuf> = HashSet::new();
    for target in &all_targets {
        for root in project.root_index().target_roots(target, ctx) {
            if !root.generated
                && exclude_index.is_in_content(&root.path)
                && !exclude_index.is_excluded(&root.path)
            {
                let _ = source_roots.insert(root.path.clone());
            }
        }
    }

    let mut leftovers: Vec<PathBuf> = Vec::new();
    for (output_root, targets) in &roots_to_delete {
        ctx.check_canceled()?;

        let ok_to_delete = if exclude_index.is_excluded(output_root) {
            // an excluded output root cannot hold manageable sources even
            // when it sits under a source root
            true
        } else {
            !fs_ops::is_under_any(&source_roots, output_root)
                && !source_roots
                    .iter()
                    .any(|src| fs_ops::is_ancestor(output_root, src, false))
        };

        if ok_to_delete {
            // never delete the root itself: that would fire spurious
            // roots-changed notifications upstream
            for child in fs_ops::children_of(output_root) {
                let removed = if child.is_dir() {
                    std::fs::remove_dir_all(&child)
                } else {
                    std::fs::remove_file(&child)
                };
                if removed.is_err() {
                    leftovers.push(child);
                }
            }
            register_targets_with_cleared_output(ctx, targets.iter().map(|t| t.id()));
        } else {
            ctx.process_message(BuildMessage::compiler(
                MessageKind::Warning,
                format!(
                    "Output path {} intersects with a source root. Only files that were created by build will be cleaned.",
                    output_root.display()
                ),
            ));
            for target in targets {
                clear_output_files_uninterruptibly(ctx, target);
            }
        }
    }

    ctx.progress_message("Cleaning output directories...");
    if !leftovers.is_empty() {
        debug!(count = leftovers.len(), "scheduling async deletion of leftovers");
        async_tasks.spawn("output leftovers deletion", move || {
            for path in leftovers {
                let mut deleted = Vec::new();
                if let Err(err) = fs_ops::delete_recursively(&path, &mut deleted, None) {
                    warn!(path = %path.display(), error = %err, "failed to delete leftover output");
                }
            }
        });
    }
    Ok(())
}

/// Delete the outputs corresponding to every *changed* (dirty) source of the
/// holder's targets, so builders re-emit them from scratch. Returns, per
/// target, the dirty sources whose outputs were cleaned.
pub(crate) fn clean_outputs_for_changed_files(
    ctx: &CompileContext,
    holder: &DirtyFilesHolder<'_>,
) -> Result<HashMap<TargetId, BTreeSet<PathBuf>>> {
    let mut cleaned: HashMap<TargetId, BTreeSet<PathBuf>> = HashMap::new();
    let mut dirs_to_prune: HashSet<PathBuf> = HashSet::new();
    let mut deleted_paths: Vec<PathBuf> = Vec::new();
    let data_manager = Arc::clone(ctx.project().data_manager());

    let _ = holder.process_dirty_files(&mut |target, file| {
        let map = data_manager.source_to_output_map(target.id())?;
        let outputs = map.outputs(&path_key(file));
        if !outputs.is_empty() {
            for output in &outputs {
                let prune = target.is_module_based().then_some(&mut dirs_to_prune);
                let _ = fs_ops::delete_recursively(Path::new(output), &mut deleted_paths, prune)?;
            }
            let _ = cleaned
                .entry(target.id().clone())
                .or_default()
                .insert(file.to_path_buf());
        }
        Ok(true)
    })?;

    if !deleted_paths.is_empty() {
        ctx.process_message(BuildMessage::FileDeleted {
            paths: deleted_paths,
        });
    }
    fs_ops::prune_empty_dirs(dirs_to_prune);
    Ok(cleaned)
}

//! The incremental build driver: lifecycle coordination and the per-chunk
//! build pipeline.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::async_tasks::AsyncTaskList;
use crate::builder::{
    BuilderCategory, BuilderRegistry, DirtyFilesHolder, ExitCode, TargetBuilder,
};
use crate::cancel::CancelToken;
use crate::clean;
use crate::context::{CompileContext, ContextKey, ERRORS_DETECTED};
use crate::error::{BuildError, RebuildRequested, Result};
use crate::external;
use crate::fs_ops;
use crate::memory::LowMemoryWatcher;
use crate::message::{BuildMessage, MessageBus, MessageHandler, MessageKind, TargetEvent};
use crate::output::ChunkOutputConsumer;
use crate::project::ProjectDescriptor;
use crate::scheduler;
use crate::scope::BuildScope;
use crate::storage::path_key;
use crate::target::{BuildTarget, TargetChunk, TargetId};

/// Parameter enabling parallel chunk execution.
pub const COMPILE_PARALLEL_OPTION: &str = "compile.parallel";
/// Parameter overriding the worker pool size.
pub const COMPILE_PARALLEL_MAX_THREADS_OPTION: &str = "compile.parallel.max.threads";
/// Parameter enabling output index emission after successful chunks.
pub const GENERATE_CLASSPATH_INDEX_OPTION: &str = "generate.classpath.index";
/// Parameter controlling whether a rebuild clears whole output directories.
pub const CLEAR_OUTPUT_DIR_ON_REBUILD_OPTION: &str = "clear.output.directory.on.rebuild";

/// Name of the optional per-output-root index file.
const OUTPUT_INDEX_FILE_NAME: &str = "output.index";

type RemovedSources = Mutex<HashMap<TargetId, BTreeSet<PathBuf>>>;

/// Sources deleted during this chunk that builders have not yet integrated.
static REMOVED_SOURCES: ContextKey<RemovedSources> = ContextKey::local("removed.sources");

/// Top-level incremental build driver. One instance drives one project; each
/// [`IncrementalDriver::build`] call is an invocation with its own context.
pub struct IncrementalDriver {
    project: Arc<ProjectDescriptor>,
    registry: BuilderRegistry,
    params: HashMap<String, String>,
    cancel: CancelToken,
    bus: MessageBus,
    is_test_mode: bool,
    total_targets_work: f32,
    total_module_level_builder_count: usize,
    targets_processed: Mutex<f32>,
    async_tasks: AsyncTaskList,
}

impl IncrementalDriver {
    /// Assemble a driver over a project and its registered builders.
    pub fn new(
        project: Arc<ProjectDescriptor>,
        registry: BuilderRegistry,
        params: HashMap<String, String>,
        cancel: CancelToken,
        is_test_mode: bool,
    ) -> Self {
        let total_targets_work = project.target_index().all_targets().len() as f32;
        let total_module_level_builder_count = registry.module_level_builder_count();
        Self {
            project,
            registry,
            params,
            cancel,
            bus: MessageBus::new(),
            is_test_mode,
            total_targets_work,
            total_module_level_builder_count,
            targets_processed: Mutex::new(0.0),
            async_tasks: AsyncTaskList::new(),
        }
    }

    /// Register a handler for every message the build emits.
    pub fn add_message_handler(&self, handler: MessageHandler) {
        self.bus.add_handler(handler);
    }

    /// Quick scan: emit [`BuildMessage::DoneSomething`] as soon as any
    /// affected target has an affected dirty file. Any internal error
    /// conservatively reports work to do.
    pub fn check_up_to_date(&self, scope: Arc<dyn BuildScope>) {
        let ctx = self.create_context(scope);
        let scan = (|| -> Result<bool> {
            let dirty_state = Arc::clone(self.project.dirty_state());
            for target in self.project.target_index().all_targets() {
                if !ctx.scope().is_affected(&target) {
                    continue;
                }
                dirty_state.ensure_initialized(&ctx, &target)?;
                if dirty_state.has_affected_dirty(&ctx, &target) {
                    return Ok(true);
                }
            }
            Ok(false)
        })();
        match scan {
            Ok(true) => self.bus.dispatch(&BuildMessage::DoneSomething),
            Ok(false) => {}
            Err(err) => {
                info!(error = %err, "up-to-date check failed; reporting work to do");
                self.bus.dispatch(&BuildMessage::DoneSomething);
            }
        }
        self.flush_context(&ctx);
    }

    /// Run a build over `scope`. Returns `Err` only when persistent build
    /// data turned out to be corrupted and the caller should retry with a
    /// whole-project rebuild; every other failure is reported through
    /// messages and the call returns `Ok`.
    pub fn build(
        &self,
        scope: Arc<dyn BuildScope>,
        force_clean_caches: bool,
    ) -> std::result::Result<(), RebuildRequested> {
        let flush_project = Arc::clone(&self.project);
        let mem_watcher = LowMemoryWatcher::register(move || {
            if let Err(err) = flush_project.data_manager().flush(false) {
                warn!(error = %err, "low-memory flush of build data failed");
            }
            if let Err(err) = flush_project.timestamps().force() {
                warn!(error = %err, "low-memory flush of timestamps failed");
            }
        });

        self.start_temp_directory_cleanup();

        let ctx = self.create_context(scope);
        let outcome = self.run_build(&ctx, force_clean_caches).and_then(|()| {
            self.project.data_manager().save_version()?;
            Ok(())
        });

        mem_watcher.stop();
        self.flush_context(&ctx);
        self.async_tasks.wait_all(&self.cancel);

        match outcome {
            Ok(()) => Ok(()),
            Err(BuildError::StopBuild { message }) => {
                // a builder deliberately stopped the build
                if !message.trim().is_empty() {
                    ctx.progress_message(message);
                }
                Ok(())
            }
            Err(BuildError::Canceled) => {
                info!("build canceled");
                Ok(())
            }
            Err(err) if err.is_corruption() => {
                info!(error = %err, "requesting project rebuild");
                ctx.process_message(BuildMessage::compiler(
                    MessageKind::Info,
                    format!(
                        "Internal caches are corrupted or have outdated format, forcing project rebuild: {err}"
                    ),
                ));
                Err(RebuildRequested {
                    reason: err.to_string(),
                })
            }
            Err(err) => {
                ctx.process_message(BuildMessage::compiler(
                    MessageKind::Error,
                    compose_error_text(&err),
                ));
                Ok(())
            }
        }
    }

    fn create_context(&self, scope: Arc<dyn BuildScope>) -> CompileContext {
        *self.targets_processed.lock() = 0.0;
        CompileContext::new(
            Arc::clone(&self.project),
            scope,
            self.bus.clone(),
            self.cancel.clone(),
            self.params.clone(),
            self.is_test_mode,
        )
    }

    fn run_build(&self, ctx: &CompileContext, force_clean_caches: bool) -> Result<()> {
        ctx.set_done(0.0);
        info!(
            rebuild = ctx.scope().is_rebuild(),
            parallel = ctx.bool_param(COMPILE_PARALLEL_OPTION, false),
            "building project"
        );

        for builder in self.registry.target_builders() {
            builder.build_started(ctx);
        }
        for builder in self.registry.module_level_builders() {
            builder.build_started(ctx);
        }

        let result = (|| -> Result<()> {
            if ctx.scope().is_rebuild() || force_clean_caches {
                self.clean_output_roots(ctx)?;
            }

            ctx.progress_message("Running 'before' tasks");
            run_tasks(ctx, self.registry.before_tasks())?;
            debug!("'before' tasks finished");

            ctx.progress_message("Checking sources");
            self.build_chunks(ctx)?;
            debug!("building targets finished");

            ctx.progress_message("Running 'after' tasks");
            run_tasks(ctx, self.registry.after_tasks())?;
            debug!("'after' tasks finished");
            Ok(())
        })();

        for builder in self.registry.target_builders() {
            builder.build_finished(ctx);
        }
        for builder in self.registry.module_level_builders() {
            builder.build_finished(ctx);
        }
        ctx.progress_message("Finished, saving caches...");

        result
    }

    /// Final flush: always completes; failures are logged, never raised.
    /// Cancellation is deliberately not consulted here.
    fn flush_context(&self, ctx: &CompileContext) {
        if let Err(err) = self.project.timestamps().force() {
            warn!(error = %err, "failed to flush timestamps");
        }
        if let Err(err) = self.project.data_manager().flush(false) {
            warn!(error = %err, "failed to flush build data");
        }
        external::shutdown_attached(ctx);
    }

    fn start_temp_directory_cleanup(&self) {
        let system_root = self.project.system_root().to_path_buf();
        let temp_dir = std::env::temp_dir();
        if !fs_ops::is_ancestor(&system_root, &temp_dir, true) {
            // only a temp dir local to the project may be cleaned
            return;
        }
        let entries = fs_ops::children_of(&temp_dir);
        if entries.is_empty() {
            return;
        }
        self.async_tasks.spawn("temp directory cleanup", move || {
            for entry in entries {
                let mut deleted = Vec::new();
                if let Err(err) = fs_ops::delete_recursively(&entry, &mut deleted, None) {
                    debug!(path = %entry.display(), error = %err, "temp cleanup failed");
                }
            }
        });
    }

    fn clean_output_roots(&self, ctx: &CompileContext) -> Result<()> {
        if ctx.bool_param(CLEAR_OUTPUT_DIR_ON_REBUILD_OPTION, true) {
            clean::clear_outputs(ctx, &self.async_tasks)?;
        } else {
            for target in self.project.target_index().all_targets() {
                if ctx.scope().is_affected(&target) {
                    clean::clear_output_files_uninterruptibly(ctx, &target);
                }
            }
        }

        self.project.timestamps().clean().map_err(|err| {
            BuildError::project_with("Error cleaning timestamps storage", err.into())
        })?;
        self.project.data_manager().clean().map_err(|err| {
            BuildError::project_with("Error cleaning compiler storages", err.into())
        })?;
        self.project.dirty_state().clear_all();
        Ok(())
    }

    fn build_chunks(&self, ctx: &CompileContext) -> Result<()> {
        let parallel = ctx.bool_param(COMPILE_PARALLEL_OPTION, false);
        let threads = scheduler::max_builder_threads(ctx);
        let chunks = self.project.target_index().sorted_target_chunks(ctx);

        if parallel && threads > 1 {
            scheduler::build_in_parallel(self, ctx, chunks, threads)
        } else {
            for chunk in &chunks {
                let built = self.build_chunk_if_affected(ctx, chunk);
                let finalized = self.finalize_chunk(ctx, chunk);
                built?;
                finalized?;
            }
            Ok(())
        }
    }

    /// Per-chunk finalize: runs on every path, before any dependent chunk
    /// may start.
    pub(crate) fn finalize_chunk(&self, ctx: &CompileContext, chunk: &TargetChunk) -> Result<()> {
        ctx.update_compilation_start_stamp();
        self.project
            .data_manager()
            .close_source_to_output_storages([chunk])?;
        self.project.data_manager().flush(false)?;
        Ok(())
    }

    pub(crate) fn build_chunk_if_affected(
        &self,
        ctx: &CompileContext,
        chunk: &TargetChunk,
    ) -> Result<()> {
        if chunk
            .targets()
            .iter()
            .any(|target| ctx.scope().is_affected(target))
        {
            self.build_targets_chunk(ctx, chunk)
        } else {
            self.update_done_fraction(ctx, chunk.len() as f32);
            Ok(())
        }
    }

    fn build_targets_chunk(&self, ctx: &CompileContext, chunk: &TargetChunk) -> Result<()> {
        ctx.process_message(BuildMessage::BuildingTargets {
            targets: chunk.target_ids(),
            event: TargetEvent::Started,
        });
        ctx.put_user_data(&ERRORS_DETECTED, Some(Arc::new(false)));

        let dirty_state = Arc::clone(self.project.dirty_state());
        let result = (|| -> Result<bool> {
            for target in chunk.targets() {
                dirty_state.ensure_initialized(ctx, target)?;
            }

            let mut done_something = self.process_deleted_paths(ctx, chunk.targets())?;

            dirty_state.before_chunk_build_start(ctx, chunk);
            done_something |= self.run_builders_for_chunk(ctx, chunk)?;
            self.on_chunk_build_complete(ctx, chunk)?;
            Ok(done_something)
        })();

        if matches!(result, Ok(true)) && ctx.bool_param(GENERATE_CLASSPATH_INDEX_OPTION, false) {
            let targets: Vec<Arc<BuildTarget>> = chunk.targets().to_vec();
            self.async_tasks
                .spawn("output index generation", move || {
                    create_output_index(&targets);
                });
        }

        // restore deleted paths that no builder integrated, then let go of
        // the per-chunk record
        for (target_id, root) in self.project.root_index().clear_temp_roots(ctx) {
            dirty_state.clear_recompile(&target_id, &root.root_id);
        }
        if let Some(removed) = ctx.get_user_data(&REMOVED_SOURCES) {
            for (target_id, paths) in removed.lock().iter() {
                for path in paths {
                    dirty_state.register_deleted(target_id, path, None);
                }
            }
            ctx.put_user_data(&REMOVED_SOURCES, None);
        }
        ctx.process_message(BuildMessage::BuildingTargets {
            targets: chunk.target_ids(),
            event: TargetEvent::Finished,
        });

        result.map(|_| ())
    }

    fn on_chunk_build_complete(&self, ctx: &CompileContext, chunk: &TargetChunk) -> Result<()> {
        let dirty_state = Arc::clone(self.project.dirty_state());

        if !ctx.errors_detected() && !self.cancel.is_canceled() {
            // stamp the compiled sources clean before the round scratch is
            // promoted: marks from the last round must stay dirty
            for target in chunk.targets() {
                dirty_state.mark_up_to_date(ctx, target)?;
            }
            // deletions are integrated now; drop them so the finalize
            // republication does not resurrect them
            if let Some(removed) = ctx.get_user_data(&REMOVED_SOURCES) {
                let mut removed = removed.lock();
                for target in chunk.targets() {
                    let _ = removed.remove(target.id());
                }
            }
        }

        dirty_state.clear_context_chunk(ctx);
        Ok(())
    }

    /// Deleted-path processing: physically remove the outputs of sources
    /// deleted since the last build, guard shared outputs through the
    /// safe-to-delete registry, dirty bound form files and record the
    /// removals for later integration.
    fn process_deleted_paths(
        &self,
        ctx: &CompileContext,
        targets: &[Arc<BuildTarget>],
    ) -> Result<bool> {
        let mut done_something = false;
        let mut dirs_to_prune: HashSet<PathBuf> = HashSet::new();
        let mut target_to_removed: HashMap<TargetId, BTreeSet<PathBuf>> = HashMap::new();

        let data_manager = Arc::clone(self.project.data_manager());
        let dirty_state = Arc::clone(self.project.dirty_state());

        for target in targets {
            let mut deleted_paths = dirty_state.get_and_clear_deleted_paths(target.id());
            if deleted_paths.is_empty() {
                continue;
            }
            target_to_removed
                .entry(target.id().clone())
                .or_default()
                .extend(deleted_paths.iter().cloned());

            if clean::is_target_output_cleared(ctx, target.id()) {
                // outputs are gone already; nothing physical left to do
                continue;
            }
            if ctx.is_test_mode() {
                deleted_paths.sort();
            }

            let map = data_manager.source_to_output_map(target.id())?;
            let registry = Arc::clone(data_manager.output_to_source_registry());
            let prune_empty = target.is_module_based();

            for deleted_source in &deleted_paths {
                ctx.check_canceled()?;
                let source_key = path_key(deleted_source);

                let outputs = map.outputs(&source_key);
                if !outputs.is_empty() {
                    let mut deleted_outputs = Vec::new();
                    for output in registry.safe_to_delete_outputs(&outputs, &source_key) {
                        let removed = fs_ops::delete_recursively(
                            Path::new(&output),
                            &mut deleted_outputs,
                            prune_empty.then_some(&mut dirs_to_prune),
                        )?;
                        if removed {
                            done_something = true;
                        }
                    }
                    if !deleted_outputs.is_empty() {
                        ctx.process_message(BuildMessage::FileDeleted {
                            paths: deleted_outputs,
                        });
                    }
                    map.set_outputs(&source_key, Vec::new());
                }

                if target.is_module_based() {
                    // a deleted source may leave bound form files behind
                    let form_map = data_manager.source_to_form_map();
                    if let Some(forms) = form_map.state(&source_key) {
                        for form in &forms {
                            let form_path = Path::new(form);
                            if form_path.exists() {
                                dirty_state.mark_dirty(ctx, target, form_path);
                            }
                        }
                        form_map.remove(&source_key);
                    }
                }
            }
        }

        if !target_to_removed.is_empty() {
            let removed = ctx.user_data_or_init(&REMOVED_SOURCES, || Mutex::new(HashMap::new()));
            let mut removed = removed.lock();
            for (target_id, paths) in target_to_removed {
                removed.entry(target_id).or_default().extend(paths);
            }
        }

        fs_ops::prune_empty_dirs(dirs_to_prune);
        Ok(done_something)
    }

    fn run_builders_for_chunk(&self, ctx: &CompileContext, chunk: &TargetChunk) -> Result<bool> {
        if chunk.len() > 1 {
            if !chunk.is_all_module_based() {
                for target in chunk.targets() {
                    if !target.is_module_based() {
                        ctx.process_message(BuildMessage::compiler(
                            MessageKind::Error,
                            format!(
                                "Cannot build {} because it is included into a circular dependency",
                                target.presentable_name()
                            ),
                        ));
                    }
                }
                return Ok(false);
            }
            return self.run_module_level_builders(ctx, chunk);
        }

        let target = &chunk.targets()[0];
        if target.is_module_based() {
            return self.run_module_level_builders(ctx, chunk);
        }

        // single non-module target: clean outputs of changed files first so
        // builders recreate them with exactly the current source casing
        if !ctx.scope().is_forced(target) {
            let holder = DirtyFilesHolder::new(ctx, std::slice::from_ref(target));
            let _ = clean::clean_outputs_for_changed_files(ctx, &holder)?;
        }

        let builders = self.registry.target_builders();
        for builder in builders {
            self.build_target(ctx, target, builder.as_ref())?;
            ctx.check_canceled()?;
            self.update_done_fraction(ctx, 1.0 / builders.len() as f32);
        }
        Ok(true)
    }

    fn build_target(
        &self,
        ctx: &CompileContext,
        target: &Arc<BuildTarget>,
        builder: &dyn TargetBuilder,
    ) -> Result<()> {
        let holder = DirtyFilesHolder::new(ctx, std::slice::from_ref(target));
        let consumer = ChunkOutputConsumer::new();
        builder.build(target, &holder, &consumer, ctx)?;
        consumer.save_instrumented()?;
        consumer.fire_file_generated_events(ctx);
        Ok(())
    }

    /// The module-level multi-pass pipeline over one chunk.
    fn run_module_level_builders(&self, ctx: &CompileContext, chunk: &TargetChunk) -> Result<bool> {
        for category in BuilderCategory::ALL {
            for builder in self.registry.builders(category) {
                builder.chunk_build_started(ctx, chunk);
            }
        }

        let dirty_state = Arc::clone(self.project.dirty_state());
        let data_manager = Arc::clone(self.project.data_manager());
        let consumer = ChunkOutputConsumer::new();

        let mut done_something = false;
        let mut rebuild_from_scratch_requested = false;
        let total_builders = self.total_module_level_builder_count as f32;
        let modules_in_chunk = chunk.len() as f32;
        let mut stage_count = total_builders;
        let mut builders_passed: f32 = 0.0;

        let result = (|| -> Result<bool> {
            loop {
                let mut next_pass_required = false;
                dirty_state.before_next_round_start(ctx, chunk);
                let holder = DirtyFilesHolder::new(ctx, chunk.targets());

                if !is_forced_recompilation(ctx, chunk) {
                    let cleaned = clean::clean_outputs_for_changed_files(ctx, &holder)?;
                    for (target_id, files) in cleaned {
                        // outputs are re-emitted by the coming pass; forget
                        // the stale associations
                        let map = data_manager.source_to_output_map(&target_id)?;
                        for file in files {
                            map.set_outputs(&path_key(&file), Vec::new());
                        }
                    }
                }

                'categories: for category in BuilderCategory::ALL {
                    let builders = self.registry.builders(category);
                    if category == BuilderCategory::ClassPostProcessor {
                        // post-processors must see instrumented content
                        consumer.save_instrumented()?;
                    }
                    if builders.is_empty() {
                        continue;
                    }

                    for builder in &builders {
                        let _ = self.process_deleted_paths(ctx, chunk.targets())?;

                        let exit_code = builder.build(ctx, chunk, &holder, &consumer)?;
                        if exit_code != ExitCode::NothingDone {
                            done_something = true;
                        }

                        if exit_code == ExitCode::Abort {
                            return Err(BuildError::StopBuild {
                                message: format!(
                                    "Builder {} requested build stop",
                                    builder.presentable_name()
                                ),
                            });
                        }
                        ctx.check_canceled()?;

                        if exit_code == ExitCode::AdditionalPassRequired {
                            if !next_pass_required {
                                // enlarge the denominator, re-anchoring the
                                // processed count so the fraction stays
                                // monotone
                                let mut processed = self.targets_processed.lock();
                                *processed -= (builders_passed * modules_in_chunk) / stage_count;
                                stage_count += total_builders;
                                *processed += (builders_passed * modules_in_chunk) / stage_count;
                            }
                            next_pass_required = true;
                        } else if exit_code == ExitCode::ChunkRebuildRequired {
                            if !rebuild_from_scratch_requested
                                && !is_forced_recompilation(ctx, chunk)
                            {
                                info!(
                                    builder = builder.presentable_name(),
                                    chunk = %chunk.name(),
                                    "builder requested rebuild of chunk"
                                );
                                rebuild_from_scratch_requested = true;
                                dirty_state.clear_context_round_data(ctx);
                                dirty_state.mark_chunk_dirty(ctx, chunk);
                                {
                                    let mut processed = self.targets_processed.lock();
                                    *processed -=
                                        (builders_passed * modules_in_chunk) / stage_count;
                                }
                                stage_count = total_builders;
                                builders_passed = 0.0;
                                next_pass_required = true;
                                consumer.clear();
                                break 'categories;
                            }
                            debug!(
                                builder = builder.presentable_name(),
                                "repeated chunk rebuild request ignored"
                            );
                        }

                        builders_passed += 1.0;
                        self.update_done_fraction(ctx, modules_in_chunk / stage_count);
                    }
                }

                if !next_pass_required {
                    break;
                }
            }
            Ok(done_something)
        })();

        let finish = (|| -> Result<()> {
            consumer.save_instrumented()?;
            consumer.fire_file_generated_events(ctx);
            consumer.clear();
            Ok(())
        })();
        for category in BuilderCategory::ALL {
            for builder in self.registry.builders(category) {
                builder.chunk_build_finished(ctx, chunk);
            }
        }

        let done = result?;
        finish?;
        Ok(done)
    }

    fn update_done_fraction(&self, ctx: &CompileContext, delta: f32) {
        let mut processed = self.targets_processed.lock();
        *processed += delta;
        ctx.set_done(*processed / self.total_targets_work.max(1.0));
    }
}

/// Whether the scope demands full recompilation of the whole chunk.
fn is_forced_recompilation(ctx: &CompileContext, chunk: &TargetChunk) -> bool {
    ctx.scope().is_rebuild()
        || chunk
            .targets()
            .iter()
            .all(|target| ctx.scope().is_forced(target))
}

fn run_tasks(ctx: &CompileContext, tasks: &[Arc<dyn crate::builder::BuildTask>]) -> Result<()> {
    for task in tasks {
        task.build(ctx)?;
    }
    Ok(())
}

fn compose_error_text(err: &BuildError) -> String {
    match err {
        BuildError::ProjectBuild {
            message,
            source: Some(cause),
        } => {
            let cause_text = cause.to_string();
            if cause_text.trim().is_empty() || cause_text == *message {
                message.clone()
            } else {
                format!("{message}: {cause_text}")
            }
        }
        other => other.to_string(),
    }
}

/// Write an `output.index` file into each module target's output roots,
/// listing every contained path relative to the root. Best-effort: the index
/// is an optional optimization and failures are ignored.
fn create_output_index(targets: &[Arc<BuildTarget>]) {
    let mut written: HashSet<&Path> = HashSet::new();
    for target in targets {
        if !target.is_module_based() {
            continue;
        }
        for root in target.output_roots() {
            if !written.insert(root.as_path()) || !root.is_dir() {
                continue;
            }
            let mut lines = vec![String::new()];
            for entry in walkdir::WalkDir::new(root)
                .min_depth(1)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                if entry.file_name().to_str() == Some(OUTPUT_INDEX_FILE_NAME) {
                    continue;
                }
                if let Ok(relative) = entry.path().strip_prefix(root) {
                    lines.push(relative.to_string_lossy().into_owned());
                }
            }
            let _ = std::fs::write(root.join(OUTPUT_INDEX_FILE_NAME), lines.join("\n"));
        }
    }
}

//! Pluggable builders, their categories and the registry.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::context::CompileContext;
use crate::error::Result;
use crate::output::ChunkOutputConsumer;
use crate::target::{BuildTarget, TargetChunk};

/// Exit code returned by a module-level builder pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Builder had nothing to do.
    NothingDone,
    /// Builder did real work.
    Ok,
    /// Builder deliberately stops the whole build.
    Abort,
    /// Builder wants another pass over the chunk after the remaining
    /// builders run.
    AdditionalPassRequired,
    /// Builder wants the whole chunk rebuilt from scratch. Honored at most
    /// once per chunk per invocation.
    ChunkRebuildRequired,
}

/// Ordered builder categories; module-level builders run category by
/// category in this order within every round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuilderCategory {
    /// Produces new sources before anything compiles.
    SourceGenerator,
    /// Transforms sources in place (preprocessing, instrumentation of
    /// sources).
    SourceProcessor,
    /// Translates sources into outputs.
    Translator,
    /// Instruments produced artifacts in memory.
    ClassInstrumenter,
    /// Post-processes artifacts after instrumentation is persisted.
    ClassPostProcessor,
}

impl BuilderCategory {
    /// All categories in execution order.
    pub const ALL: [BuilderCategory; 5] = [
        BuilderCategory::SourceGenerator,
        BuilderCategory::SourceProcessor,
        BuilderCategory::Translator,
        BuilderCategory::ClassInstrumenter,
        BuilderCategory::ClassPostProcessor,
    ];
}

/// Read access to the dirty files of the chunk (or single target) a builder
/// is invoked on.
pub struct DirtyFilesHolder<'a> {
    ctx: &'a CompileContext,
    targets: &'a [Arc<BuildTarget>],
}

impl<'a> DirtyFilesHolder<'a> {
    pub(crate) fn new(ctx: &'a CompileContext, targets: &'a [Arc<BuildTarget>]) -> Self {
        Self { ctx, targets }
    }

    /// Iterate the scope-affected dirty files of every held target;
    /// returning `false` from `processor` stops the iteration.
    pub fn process_dirty_files(
        &self,
        processor: &mut dyn FnMut(&Arc<BuildTarget>, &Path) -> Result<bool>,
    ) -> Result<bool> {
        let dirty_state = Arc::clone(self.ctx.project().dirty_state());
        for target in self.targets {
            let completed = dirty_state.process_files_to_recompile(
                self.ctx,
                target,
                &mut |file| processor(target, file),
            )?;
            if !completed {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Collected dirty files, target by target.
    pub fn dirty_files(&self) -> Result<Vec<(Arc<BuildTarget>, PathBuf)>> {
        let mut files = Vec::new();
        let _ = self.process_dirty_files(&mut |target, file| {
            files.push((Arc::clone(target), file.to_path_buf()));
            Ok(true)
        })?;
        Ok(files)
    }

    /// Whether any held target has a dirty file in scope.
    pub fn has_dirty_files(&self) -> Result<bool> {
        let mut found = false;
        let _ = self.process_dirty_files(&mut |_, _| {
            found = true;
            Ok(false)
        })?;
        Ok(found)
    }
}

/// Builder of a single non-module target; one pass per build.
pub trait TargetBuilder: Send + Sync {
    /// Name used in diagnostics.
    fn presentable_name(&self) -> &str;

    /// Called once per invocation before any chunk runs.
    fn build_started(&self, _ctx: &CompileContext) {}

    /// Called once per invocation on every exit path.
    fn build_finished(&self, _ctx: &CompileContext) {}

    /// Build the target from its dirty files.
    fn build(
        &self,
        target: &Arc<BuildTarget>,
        holder: &DirtyFilesHolder<'_>,
        output: &ChunkOutputConsumer,
        ctx: &CompileContext,
    ) -> Result<()>;
}

/// Builder participating in the module-level multi-pass pipeline.
pub trait ModuleLevelBuilder: Send + Sync {
    /// Category deciding when in the round this builder runs.
    fn category(&self) -> BuilderCategory;

    /// Name used in diagnostics.
    fn presentable_name(&self) -> &str;

    /// Called once per invocation before any chunk runs.
    fn build_started(&self, _ctx: &CompileContext) {}

    /// Called once per invocation on every exit path.
    fn build_finished(&self, _ctx: &CompileContext) {}

    /// Called when a chunk's pipeline starts.
    fn chunk_build_started(&self, _ctx: &CompileContext, _chunk: &TargetChunk) {}

    /// Called when a chunk's pipeline ends, after the last round.
    fn chunk_build_finished(&self, _ctx: &CompileContext, _chunk: &TargetChunk) {}

    /// One pass over the chunk.
    fn build(
        &self,
        ctx: &CompileContext,
        chunk: &TargetChunk,
        dirty: &DirtyFilesHolder<'_>,
        output: &ChunkOutputConsumer,
    ) -> Result<ExitCode>;
}

/// Task run before or after the chunk phase of a build.
pub trait BuildTask: Send + Sync {
    /// Run the task.
    fn build(&self, ctx: &CompileContext) -> Result<()>;
}

/// Registry of all pluggable builders and lifecycle tasks, iterated in
/// registration order.
#[derive(Default)]
pub struct BuilderRegistry {
    target_builders: Vec<Arc<dyn TargetBuilder>>,
    module_builders: Vec<Arc<dyn ModuleLevelBuilder>>,
    before_tasks: Vec<Arc<dyn BuildTask>>,
    after_tasks: Vec<Arc<dyn BuildTask>>,
}

impl BuilderRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a target builder.
    pub fn add_target_builder(&mut self, builder: Arc<dyn TargetBuilder>) {
        self.target_builders.push(builder);
    }

    /// Register a module-level builder.
    pub fn add_module_level_builder(&mut self, builder: Arc<dyn ModuleLevelBuilder>) {
        self.module_builders.push(builder);
    }

    /// Register a task run before chunk building.
    pub fn add_before_task(&mut self, task: Arc<dyn BuildTask>) {
        self.before_tasks.push(task);
    }

    /// Register a task run after chunk building.
    pub fn add_after_task(&mut self, task: Arc<dyn BuildTask>) {
        self.after_tasks.push(task);
    }

    /// Registered target builders.
    pub fn target_builders(&self) -> &[Arc<dyn TargetBuilder>] {
        &self.target_builders
    }

    /// All registered module-level builders.
    pub fn module_level_builders(&self) -> &[Arc<dyn ModuleLevelBuilder>] {
        &self.module_builders
    }

    /// Module-level builders of one category, in registration order.
    pub fn builders(&self, category: BuilderCategory) -> Vec<Arc<dyn ModuleLevelBuilder>> {
        self.module_builders
            .iter()
            .filter(|b| b.category() == category)
            .cloned()
            .collect()
    }

    /// Number of registered module-level builders.
    pub fn module_level_builder_count(&self) -> usize {
        self.module_builders.len()
    }

    /// Before tasks in registration order.
    pub fn before_tasks(&self) -> &[Arc<dyn BuildTask>] {
        &self.before_tasks
    }

    /// After tasks in registration order.
    pub fn after_tasks(&self) -> &[Arc<dyn BuildTask>] {
        &self.after_tasks
    }
}

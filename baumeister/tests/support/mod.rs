//! Shared fixtures for the driver integration tests: a throwaway project
//! layout on disk and scripted builders that record what the driver did.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use baumeister::{
    BuildTarget, BuilderCategory, BuilderRegistry, CancelToken, ChunkOutputConsumer,
    CollectingHandler, CompileContext, DirtyFilesHolder, ExitCode, IncrementalDriver,
    ModuleLevelBuilder, ProjectDescriptor, SourceRootDescriptor, TargetBuilder, TargetChunk,
    TargetId, TargetKind,
};

fn init_tracing() {
    static TRACING: std::sync::Once = std::sync::Once::new();
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Chronological record of builder activity, shared across builders.
pub type EventLog = Arc<Mutex<Vec<String>>>;

pub fn event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn events(log: &EventLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// Position of the first event containing `needle`.
pub fn first_index(log: &EventLog, needle: &str) -> Option<usize> {
    log.lock()
        .unwrap()
        .iter()
        .position(|event| event.contains(needle))
}

/// Position of the last event containing `needle`.
pub fn last_index(log: &EventLog, needle: &str) -> Option<usize> {
    log.lock()
        .unwrap()
        .iter()
        .rposition(|event| event.contains(needle))
}

/// Disposable project on disk: `src/<target>` source roots, `out/<target>`
/// output roots, persistent stores under `system/`.
pub struct TestProject {
    pub dir: TempDir,
    targets: Vec<Arc<BuildTarget>>,
    deps: Vec<(TargetId, TargetId)>,
}

impl TestProject {
    pub fn new() -> Self {
        init_tracing();
        Self {
            dir: TempDir::new().unwrap(),
            targets: Vec::new(),
            deps: Vec::new(),
        }
    }

    /// Add a module-based target with the conventional layout.
    pub fn add_module(&mut self, id: &str) -> Arc<BuildTarget> {
        let src = self.dir.path().join("src").join(id);
        let out = self.dir.path().join("out").join(id);
        self.add_target(id, TargetKind::ModuleBased, src, out)
    }

    /// Add a non-module target with the conventional layout.
    pub fn add_other(&mut self, id: &str) -> Arc<BuildTarget> {
        let src = self.dir.path().join("src").join(id);
        let out = self.dir.path().join("out").join(id);
        self.add_target(id, TargetKind::Other, src, out)
    }

    /// Add a target with explicit roots (overlap scenarios).
    pub fn add_target(
        &mut self,
        id: &str,
        kind: TargetKind,
        src: PathBuf,
        out: PathBuf,
    ) -> Arc<BuildTarget> {
        std::fs::create_dir_all(&src).unwrap();
        std::fs::create_dir_all(&out).unwrap();
        let target = Arc::new(BuildTarget::new(
            id,
            format!("'{id}'"),
            kind,
            vec![SourceRootDescriptor::new("src", src)],
            vec![out],
        ));
        self.targets.push(Arc::clone(&target));
        target
    }

    /// Record that `from` depends on `to`.
    pub fn depend(&mut self, from: &str, to: &str) {
        self.deps.push((TargetId::new(from), TargetId::new(to)));
    }

    pub fn source_path(&self, id: &str, name: &str) -> PathBuf {
        self.dir.path().join("src").join(id).join(name)
    }

    pub fn out_root(&self, id: &str) -> PathBuf {
        self.dir.path().join("out").join(id)
    }

    pub fn write_source(&self, id: &str, name: &str, content: &str) -> PathBuf {
        let path = self.source_path(id, name);
        std::fs::write(&path, content).unwrap();
        path
    }

    pub fn delete_source(&self, id: &str, name: &str) {
        std::fs::remove_file(self.source_path(id, name)).unwrap();
    }

    /// Every file currently under the project's `out/` tree, relative paths
    /// sorted.
    pub fn output_files(&self) -> Vec<String> {
        let out = self.dir.path().join("out");
        let mut files: Vec<String> = baumeister::fs_ops::files_under(&out)
            .into_iter()
            .map(|path| {
                path.strip_prefix(&out)
                    .unwrap()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();
        files.sort();
        files
    }

    /// Fresh descriptor over the same on-disk state, as a new process would
    /// open it.
    pub fn descriptor(&self) -> Arc<ProjectDescriptor> {
        Arc::new(
            ProjectDescriptor::in_memory(
                self.dir.path().join("system"),
                self.targets.clone(),
                self.deps.clone(),
            )
            .unwrap(),
        )
    }

    /// Driver over a fresh descriptor with a message collector attached.
    pub fn driver_with(
        &self,
        registry: BuilderRegistry,
        params: HashMap<String, String>,
        cancel: CancelToken,
    ) -> (IncrementalDriver, CollectingHandler) {
        let driver =
            IncrementalDriver::new(self.descriptor(), registry, params, cancel, true);
        let collector = CollectingHandler::new();
        driver.add_message_handler(collector.handler());
        (driver, collector)
    }
}

pub fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

type CallHook = Box<dyn Fn(usize, &CompileContext) + Send + Sync>;

/// Module-level builder that "compiles" every dirty source into
/// `<out-root>/<stem>.o`, following a script of forced exit codes before
/// falling back to Ok/NothingDone.
pub struct ScriptedBuilder {
    name: String,
    category: BuilderCategory,
    log: EventLog,
    script: Mutex<VecDeque<ExitCode>>,
    calls: AtomicUsize,
    ok_returns: AtomicUsize,
    hook: Option<CallHook>,
}

impl ScriptedBuilder {
    pub fn new(name: &str, category: BuilderCategory, log: EventLog) -> Self {
        Self {
            name: name.to_string(),
            category,
            log,
            script: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            ok_returns: AtomicUsize::new(0),
            hook: None,
        }
    }

    pub fn with_script(mut self, codes: impl IntoIterator<Item = ExitCode>) -> Self {
        self.script = Mutex::new(codes.into_iter().collect());
        self
    }

    /// Run `hook(call_number, ctx)` at the start of every build call.
    pub fn with_hook(mut self, hook: impl Fn(usize, &CompileContext) + Send + Sync + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn ok_returns(&self) -> usize {
        self.ok_returns.load(Ordering::SeqCst)
    }

    fn compile_dirty(
        &self,
        ctx: &CompileContext,
        holder: &DirtyFilesHolder<'_>,
        output: &ChunkOutputConsumer,
    ) -> baumeister::Result<usize> {
        let mut compiled = 0;
        let _ = holder.process_dirty_files(&mut |target, file| {
            let stem = file.file_stem().unwrap_or_default().to_string_lossy();
            let out = target.output_roots()[0].join(format!("{stem}.o"));
            if let Some(parent) = out.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&out, std::fs::read(file)?)?;
            output.register_output_file(ctx, target, &out, &[file.to_path_buf()])?;
            compiled += 1;
            Ok(true)
        })?;
        Ok(compiled)
    }
}

impl ModuleLevelBuilder for ScriptedBuilder {
    fn category(&self) -> BuilderCategory {
        self.category
    }

    fn presentable_name(&self) -> &str {
        &self.name
    }

    fn build(
        &self,
        ctx: &CompileContext,
        chunk: &TargetChunk,
        dirty: &DirtyFilesHolder<'_>,
        output: &ChunkOutputConsumer,
    ) -> baumeister::Result<ExitCode> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(hook) = &self.hook {
            hook(call, ctx);
        }
        self.log
            .lock()
            .unwrap()
            .push(format!("build:{}:{}", self.name, chunk.name()));

        let compiled = self.compile_dirty(ctx, dirty, output)?;
        if let Some(code) = self.script.lock().unwrap().pop_front() {
            return Ok(code);
        }
        if compiled > 0 {
            let _ = self.ok_returns.fetch_add(1, Ordering::SeqCst);
            Ok(ExitCode::Ok)
        } else {
            Ok(ExitCode::NothingDone)
        }
    }
}

/// Target builder counterpart for non-module targets.
pub struct ScriptedTargetBuilder {
    name: String,
    log: EventLog,
    calls: AtomicUsize,
}

impl ScriptedTargetBuilder {
    pub fn new(name: &str, log: EventLog) -> Self {
        Self {
            name: name.to_string(),
            log,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TargetBuilder for ScriptedTargetBuilder {
    fn presentable_name(&self) -> &str {
        &self.name
    }

    fn build(
        &self,
        target: &Arc<BuildTarget>,
        holder: &DirtyFilesHolder<'_>,
        output: &ChunkOutputConsumer,
        ctx: &CompileContext,
    ) -> baumeister::Result<()> {
        let _ = self.calls.fetch_add(1, Ordering::SeqCst);
        self.log
            .lock()
            .unwrap()
            .push(format!("build:{}:{}", self.name, target.id()));
        let _ = holder.process_dirty_files(&mut |target, file| {
            let stem = file.file_stem().unwrap_or_default().to_string_lossy();
            let out = target.output_roots()[0].join(format!("{stem}.o"));
            if let Some(parent) = out.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&out, std::fs::read(file)?)?;
            output.register_output_file(ctx, target, &out, &[file.to_path_buf()])?;
            Ok(true)
        })?;
        Ok(())
    }
}

/// Registry with one translator `ScriptedBuilder`; the common case.
pub fn translator_registry(log: &EventLog) -> (BuilderRegistry, Arc<ScriptedBuilder>) {
    let builder = Arc::new(ScriptedBuilder::new(
        "translator",
        BuilderCategory::Translator,
        Arc::clone(log),
    ));
    let mut registry = BuilderRegistry::new();
    registry.add_module_level_builder(Arc::clone(&builder) as Arc<dyn ModuleLevelBuilder>);
    (registry, builder)
}

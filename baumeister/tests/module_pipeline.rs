//! Module-level pipeline behavior: category ordering, instrumented artifact
//! persistence, and deliberate build stops.

mod support;

use std::sync::Arc;

use baumeister::{
    BuildMessage, BuildTarget, BuilderCategory, BuilderRegistry, CancelToken,
    ChunkOutputConsumer, CompileContext, CompiledArtifact, DirtyFilesHolder, ExitCode, MakeScope,
    ModuleLevelBuilder, TargetChunk,
};
use support::*;

#[test]
fn categories_run_in_declared_order_regardless_of_registration() {
    let mut project = TestProject::new();
    project.add_module("a");
    project.write_source("a", "a1.x", "a");

    let log = event_log();
    let mut registry = BuilderRegistry::new();
    // registered deliberately out of order
    for (name, category) in [
        ("post", BuilderCategory::ClassPostProcessor),
        ("gen", BuilderCategory::SourceGenerator),
        ("translate", BuilderCategory::Translator),
    ] {
        registry.add_module_level_builder(Arc::new(ScriptedBuilder::new(
            name,
            category,
            Arc::clone(&log),
        )) as Arc<dyn ModuleLevelBuilder>);
    }

    let (driver, _) = project.driver_with(registry, params(&[]), CancelToken::new());
    driver.build(Arc::new(MakeScope), false).unwrap();

    let gen = first_index(&log, "build:gen").unwrap();
    let translate = first_index(&log, "build:translate").unwrap();
    let post = first_index(&log, "build:post").unwrap();
    assert!(gen < translate && translate < post);
}

struct InstrumentingBuilder;

impl ModuleLevelBuilder for InstrumentingBuilder {
    fn category(&self) -> BuilderCategory {
        BuilderCategory::ClassInstrumenter
    }

    fn presentable_name(&self) -> &str {
        "instrumenter"
    }

    fn build(
        &self,
        ctx: &CompileContext,
        _chunk: &TargetChunk,
        dirty: &DirtyFilesHolder<'_>,
        output: &ChunkOutputConsumer,
    ) -> baumeister::Result<ExitCode> {
        let mut compiled = 0;
        let mut artifacts = Vec::new();
        let _ = dirty.process_dirty_files(&mut |target, file| {
            let stem = file.file_stem().unwrap_or_default().to_string_lossy();
            let out = target.output_roots()[0].join(format!("{stem}.art"));
            let artifact = Arc::new(CompiledArtifact::new(
                out,
                vec![file.to_path_buf()],
                b"raw".to_vec(),
            ));
            artifacts.push((Arc::clone(target), Arc::clone(&artifact)));
            compiled += 1;
            Ok(true)
        })?;
        for (target, artifact) in artifacts {
            output.register_compiled_artifact(ctx, &target, Arc::clone(&artifact))?;
            // in-memory rewrite, persisted by the driver before the
            // post-processor category runs
            artifact.set_content(b"instrumented".to_vec());
        }
        Ok(if compiled > 0 {
            ExitCode::Ok
        } else {
            ExitCode::NothingDone
        })
    }
}

struct PostProcessorProbe {
    observed: Arc<std::sync::Mutex<Vec<Vec<u8>>>>,
}

impl ModuleLevelBuilder for PostProcessorProbe {
    fn category(&self) -> BuilderCategory {
        BuilderCategory::ClassPostProcessor
    }

    fn presentable_name(&self) -> &str {
        "post-probe"
    }

    fn build(
        &self,
        _ctx: &CompileContext,
        chunk: &TargetChunk,
        _dirty: &DirtyFilesHolder<'_>,
        _output: &ChunkOutputConsumer,
    ) -> baumeister::Result<ExitCode> {
        for target in chunk.targets() {
            for artifact in read_artifacts(target) {
                self.observed.lock().unwrap().push(artifact);
            }
        }
        Ok(ExitCode::NothingDone)
    }
}

fn read_artifacts(target: &BuildTarget) -> Vec<Vec<u8>> {
    baumeister::fs_ops::files_under(&target.output_roots()[0])
        .into_iter()
        .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("art"))
        .filter_map(|path| std::fs::read(path).ok())
        .collect()
}

#[test]
fn instrumented_artifacts_hit_disk_before_post_processors() {
    let mut project = TestProject::new();
    project.add_module("a");
    project.write_source("a", "a1.x", "a");

    let observed = Arc::new(std::sync::Mutex::new(Vec::new()));
    let mut registry = BuilderRegistry::new();
    registry.add_module_level_builder(Arc::new(InstrumentingBuilder));
    registry.add_module_level_builder(Arc::new(PostProcessorProbe {
        observed: Arc::clone(&observed),
    }));

    let (driver, _) = project.driver_with(registry, params(&[]), CancelToken::new());
    driver.build(Arc::new(MakeScope), false).unwrap();

    let observed = observed.lock().unwrap();
    assert_eq!(observed.as_slice(), [b"instrumented".to_vec()]);
}

#[test]
fn abort_stops_the_build_and_skips_later_chunks() {
    let mut project = TestProject::new();
    project.add_module("a");
    project.add_module("b");
    project.depend("b", "a");
    project.write_source("a", "a1.x", "a");
    project.write_source("b", "b1.x", "b");

    let log = event_log();
    let builder = Arc::new(
        ScriptedBuilder::new("translator", BuilderCategory::Translator, Arc::clone(&log))
            .with_script([ExitCode::Abort]),
    );
    let mut registry = BuilderRegistry::new();
    registry.add_module_level_builder(Arc::clone(&builder) as Arc<dyn ModuleLevelBuilder>);

    let (driver, collector) = project.driver_with(registry, params(&[]), CancelToken::new());
    // a stop is not a failure
    driver.build(Arc::new(MakeScope), false).unwrap();

    assert_eq!(builder.calls(), 1);
    let stopped = collector.messages().iter().any(|message| {
        matches!(
            message,
            BuildMessage::Progress { text, .. } if text.contains("requested build stop")
        )
    });
    assert!(stopped);
}

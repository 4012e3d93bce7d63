//! Driver scenarios: chunk ordering, multi-pass protocols, deletion and
//! cleaning behavior, corruption recovery.

mod support;

use std::sync::Arc;

use baumeister::{
    BuildMessage, BuilderCategory, BuilderRegistry, CancelToken, ExitCode, MakeScope,
    MessageKind, ModuleLevelBuilder, RebuildScope, TargetKind,
};
use support::*;

fn progress_values(collector: &baumeister::CollectingHandler) -> Vec<f32> {
    collector
        .messages()
        .iter()
        .filter_map(|message| match message {
            BuildMessage::Progress { done, .. } => Some(*done),
            _ => None,
        })
        .collect()
}

fn deleted_paths(collector: &baumeister::CollectingHandler) -> Vec<String> {
    collector
        .messages()
        .iter()
        .filter_map(|message| match message {
            BuildMessage::FileDeleted { paths } => Some(paths.clone()),
            _ => None,
        })
        .flatten()
        .map(|path| path.to_string_lossy().into_owned())
        .collect()
}

#[test]
fn linear_graph_builds_in_dependency_order() {
    let mut project = TestProject::new();
    project.add_module("a");
    project.add_module("b");
    project.add_module("c");
    project.depend("b", "a");
    project.depend("c", "b");
    project.write_source("a", "a1.x", "a");
    project.write_source("b", "b1.x", "b");
    project.write_source("c", "c1.x", "c");

    let log = event_log();
    let (registry, _builder) = translator_registry(&log);
    let (driver, collector) = project.driver_with(registry, params(&[]), CancelToken::new());
    driver.build(Arc::new(MakeScope), false).unwrap();

    let a = first_index(&log, "build:translator:'a'").unwrap();
    let b = first_index(&log, "build:translator:'b'").unwrap();
    let c = first_index(&log, "build:translator:'c'").unwrap();
    assert!(a < b && b < c);

    assert_eq!(
        project.output_files(),
        vec!["a/a1.o", "b/b1.o", "c/c1.o"]
    );
    assert!(collector.compiler_messages(MessageKind::Warning).is_empty());
    assert!(progress_values(&collector).last().copied().unwrap_or(0.0) >= 1.0);
}

#[test]
fn diamond_graph_respects_join_point_in_parallel_mode() {
    let mut project = TestProject::new();
    project.add_module("a");
    project.add_module("b");
    project.add_module("c");
    project.add_module("d");
    project.depend("b", "a");
    project.depend("c", "a");
    project.depend("d", "b");
    project.depend("d", "c");
    for id in ["a", "b", "c", "d"] {
        project.write_source(id, &format!("{id}1.x"), id);
    }

    let log = event_log();
    let (registry, _builder) = translator_registry(&log);
    let (driver, collector) = project.driver_with(
        registry,
        params(&[
            ("compile.parallel", "true"),
            ("compile.parallel.max.threads", "2"),
        ]),
        CancelToken::new(),
    );
    driver.build(Arc::new(MakeScope), false).unwrap();

    let a = last_index(&log, "build:translator:'a'").unwrap();
    let b = last_index(&log, "build:translator:'b'").unwrap();
    let c = last_index(&log, "build:translator:'c'").unwrap();
    let d = first_index(&log, "build:translator:'d'").unwrap();
    assert!(a < b && a < c);
    assert!(d > b && d > c);

    // first-failure slot stays empty: nothing failed, nothing reported
    assert!(collector.compiler_messages(MessageKind::Error).is_empty());
    assert_eq!(
        project.output_files(),
        vec!["a/a1.o", "b/b1.o", "c/c1.o", "d/d1.o"]
    );
}

#[test]
fn parallel_and_sequential_builds_produce_identical_outputs() {
    let build = |parallel: bool| {
        let mut project = TestProject::new();
        project.add_module("a");
        project.add_module("b");
        project.add_module("c");
        project.add_module("d");
        project.depend("b", "a");
        project.depend("c", "a");
        project.depend("d", "b");
        project.depend("d", "c");
        for id in ["a", "b", "c", "d"] {
            project.write_source(id, &format!("{id}1.x"), id);
        }
        let log = event_log();
        let (registry, _) = translator_registry(&log);
        let opts = if parallel {
            params(&[
                ("compile.parallel", "true"),
                ("compile.parallel.max.threads", "3"),
            ])
        } else {
            params(&[])
        };
        let (driver, _) = project.driver_with(registry, opts, CancelToken::new());
        driver.build(Arc::new(MakeScope), false).unwrap();
        project.output_files()
    };

    assert_eq!(build(true), build(false));
}

#[test]
fn cyclic_module_targets_build_as_one_chunk() {
    let mut project = TestProject::new();
    project.add_module("m1");
    project.add_module("m2");
    project.depend("m1", "m2");
    project.depend("m2", "m1");
    project.write_source("m1", "a.x", "a");
    project.write_source("m2", "b.x", "b");

    let log = event_log();
    let (registry, builder) = translator_registry(&log);
    let (driver, collector) = project.driver_with(registry, params(&[]), CancelToken::new());
    driver.build(Arc::new(MakeScope), false).unwrap();

    // one module-level pipeline over the contracted chunk
    assert_eq!(builder.calls(), 1);
    assert!(first_index(&log, "build:translator:'m1'+'m2'").is_some());
    assert!(collector.compiler_messages(MessageKind::Error).is_empty());
    assert_eq!(project.output_files(), vec!["m1/a.o", "m2/b.o"]);
}

#[test]
fn non_module_target_in_cycle_is_rejected() {
    let mut project = TestProject::new();
    project.add_module("m");
    project.add_other("r");
    project.depend("m", "r");
    project.depend("r", "m");
    project.write_source("m", "a.x", "a");
    project.write_source("r", "b.x", "b");

    let log = event_log();
    let (registry, builder) = translator_registry(&log);
    let (driver, collector) = project.driver_with(registry, params(&[]), CancelToken::new());
    driver.build(Arc::new(MakeScope), false).unwrap();

    let errors = collector.compiler_messages(MessageKind::Error);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("Cannot build 'r' because it is included into a circular dependency"));
    assert_eq!(builder.calls(), 0);
    assert!(project.output_files().is_empty());
}

#[test]
fn additional_pass_runs_exactly_one_extra_round() {
    let mut project = TestProject::new();
    project.add_module("a");
    project.write_source("a", "a1.x", "a");

    let log = event_log();
    let builder = Arc::new(
        ScriptedBuilder::new("translator", BuilderCategory::Translator, Arc::clone(&log))
            .with_script([ExitCode::AdditionalPassRequired]),
    );
    let mut registry = BuilderRegistry::new();
    registry.add_module_level_builder(Arc::clone(&builder) as Arc<dyn ModuleLevelBuilder>);

    let (driver, collector) = project.driver_with(registry, params(&[]), CancelToken::new());
    driver.build(Arc::new(MakeScope), false).unwrap();

    assert_eq!(builder.calls(), 2);
    let progress = progress_values(&collector);
    assert!(progress.iter().all(|done| *done <= 1.0));
    assert!(progress.windows(2).all(|pair| pair[0] <= pair[1]));
}

#[test]
fn chunk_rebuild_request_is_honored_once() {
    let mut project = TestProject::new();
    project.add_module("a");
    project.write_source("a", "a1.x", "source-v1");

    let log = event_log();
    let builder = Arc::new(
        ScriptedBuilder::new("translator", BuilderCategory::Translator, Arc::clone(&log))
            .with_script([ExitCode::ChunkRebuildRequired]),
    );
    let mut registry = BuilderRegistry::new();
    registry.add_module_level_builder(Arc::clone(&builder) as Arc<dyn ModuleLevelBuilder>);

    let (driver, collector) = project.driver_with(registry, params(&[]), CancelToken::new());
    driver.build(Arc::new(MakeScope), false).unwrap();

    // one pass before the rebuild, one full pass after
    assert_eq!(builder.calls(), 2);
    assert!(collector.compiler_messages(MessageKind::Error).is_empty());
    assert_eq!(project.output_files(), vec!["a/a1.o"]);
    assert_eq!(
        std::fs::read_to_string(project.out_root("a").join("a1.o")).unwrap(),
        "source-v1"
    );
}

#[test]
fn repeated_chunk_rebuild_request_is_ignored() {
    let mut project = TestProject::new();
    project.add_module("a");
    project.write_source("a", "a1.x", "a");

    let log = event_log();
    let builder = Arc::new(
        ScriptedBuilder::new("translator", BuilderCategory::Translator, Arc::clone(&log))
            .with_script([ExitCode::ChunkRebuildRequired, ExitCode::ChunkRebuildRequired]),
    );
    let mut registry = BuilderRegistry::new();
    registry.add_module_level_builder(Arc::clone(&builder) as Arc<dyn ModuleLevelBuilder>);

    let (driver, _collector) = project.driver_with(registry, params(&[]), CancelToken::new());
    driver.build(Arc::new(MakeScope), false).unwrap();

    // the second request must not restart the chunk again
    assert_eq!(builder.calls(), 2);
    assert_eq!(project.output_files(), vec!["a/a1.o"]);
}

#[test]
fn deleted_source_outputs_are_removed_once() {
    let mut project = TestProject::new();
    project.add_module("a");
    project.write_source("a", "a1.x", "a");
    project.write_source("a", "b1.x", "b");

    {
        let log = event_log();
        let (registry, _) = translator_registry(&log);
        let (driver, _) = project.driver_with(registry, params(&[]), CancelToken::new());
        driver.build(Arc::new(MakeScope), false).unwrap();
    }
    assert_eq!(project.output_files(), vec!["a/a1.o", "a/b1.o"]);

    project.delete_source("a", "b1.x");

    let log = event_log();
    let (registry, _) = translator_registry(&log);
    let (driver, collector) = project.driver_with(registry, params(&[]), CancelToken::new());
    driver.build(Arc::new(MakeScope), false).unwrap();

    assert!(deleted_paths(&collector).iter().any(|p| p.ends_with("b1.o")));
    assert_eq!(project.output_files(), vec!["a/a1.o"]);

    // a further build has nothing left to delete
    let log = event_log();
    let (registry, _) = translator_registry(&log);
    let (driver, collector) = project.driver_with(registry, params(&[]), CancelToken::new());
    driver.build(Arc::new(MakeScope), false).unwrap();
    assert!(deleted_paths(&collector).is_empty());
}

#[test]
fn single_non_module_target_runs_target_builders() {
    let mut project = TestProject::new();
    project.add_other("res");
    project.write_source("res", "r1.x", "v1");

    let log = event_log();
    let builder = Arc::new(ScriptedTargetBuilder::new("copier", Arc::clone(&log)));
    let mut registry = BuilderRegistry::new();
    registry.add_target_builder(Arc::clone(&builder) as Arc<dyn baumeister::TargetBuilder>);

    let (driver, _) = project.driver_with(registry, params(&[]), CancelToken::new());
    driver.build(Arc::new(MakeScope), false).unwrap();
    assert_eq!(builder.calls(), 1);
    assert_eq!(project.output_files(), vec!["res/r1.o"]);

    // a changed source gets its stale output cleaned before rebuilding
    std::thread::sleep(std::time::Duration::from_millis(20));
    project.write_source("res", "r1.x", "v2");

    let log = event_log();
    let builder = Arc::new(ScriptedTargetBuilder::new("copier", Arc::clone(&log)));
    let mut registry = BuilderRegistry::new();
    registry.add_target_builder(Arc::clone(&builder) as Arc<dyn baumeister::TargetBuilder>);
    let (driver, collector) = project.driver_with(registry, params(&[]), CancelToken::new());
    driver.build(Arc::new(MakeScope), false).unwrap();

    assert!(deleted_paths(&collector).iter().any(|p| p.ends_with("r1.o")));
    assert_eq!(
        std::fs::read_to_string(project.out_root("res").join("r1.o")).unwrap(),
        "v2"
    );
}

#[test]
fn overlapping_output_root_falls_back_to_selective_clean() {
    let mut project = TestProject::new();
    let src = project.dir.path().join("src").join("ov");
    let out = src.join("out");
    project.add_target("ov", TargetKind::ModuleBased, src.clone(), out);
    project.write_source("ov", "a1.x", "a");

    let log = event_log();
    let (registry, _) = translator_registry(&log);
    let (driver, collector) = project.driver_with(registry, params(&[]), CancelToken::new());
    driver.build(Arc::new(RebuildScope), false).unwrap();

    let warnings = collector.compiler_messages(MessageKind::Warning);
    assert!(warnings
        .iter()
        .any(|text| text.contains("intersects with a source root")));
    // the source survived the clean
    assert!(project.source_path("ov", "a1.x").exists());
}

#[test]
fn storage_corruption_surfaces_rebuild_request_and_retry_succeeds() {
    let mut project = TestProject::new();
    project.add_module("a");
    project.write_source("a", "a1.x", "v1");

    {
        let log = event_log();
        let (registry, _) = translator_registry(&log);
        let (driver, _) = project.driver_with(registry, params(&[]), CancelToken::new());
        driver.build(Arc::new(MakeScope), false).unwrap();
    }

    // make a change so the next build opens the mapping, then corrupt it
    std::thread::sleep(std::time::Duration::from_millis(20));
    project.write_source("a", "a1.x", "v2");
    let mapping = project
        .dir
        .path()
        .join("system/data/mappings/a.json");
    std::fs::write(&mapping, b"{ corrupted").unwrap();

    let log = event_log();
    let (registry, _) = translator_registry(&log);
    let (driver, collector) = project.driver_with(registry, params(&[]), CancelToken::new());
    let err = driver.build(Arc::new(MakeScope), false).unwrap_err();
    assert!(!err.reason.is_empty());
    assert!(collector
        .compiler_messages(MessageKind::Info)
        .iter()
        .any(|text| text.contains("forcing project rebuild")));

    // retrying as a rebuild wipes the stores and succeeds
    let log = event_log();
    let (registry, _) = translator_registry(&log);
    let (driver, retry_collector) = project.driver_with(registry, params(&[]), CancelToken::new());
    driver.build(Arc::new(RebuildScope), false).unwrap();
    assert!(retry_collector.compiler_messages(MessageKind::Error).is_empty());
    assert_eq!(project.output_files(), vec!["a/a1.o"]);
    assert_eq!(
        std::fs::read_to_string(project.out_root("a").join("a1.o")).unwrap(),
        "v2"
    );
}

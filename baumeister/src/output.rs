//! Chunk output consumer: where builders register produced artifacts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::context::CompileContext;
use crate::error::Result;
use crate::message::BuildMessage;
use crate::storage::path_key;
use crate::target::BuildTarget;

/// A produced artifact held in memory so instrumenting builders can rewrite
/// it before it is persisted.
pub struct CompiledArtifact {
    output_path: PathBuf,
    source_paths: Vec<PathBuf>,
    content: Mutex<Vec<u8>>,
    dirty: AtomicBool,
}

impl CompiledArtifact {
    /// Artifact produced at `output_path` from `source_paths`. Starts dirty:
    /// it has not been written to disk yet.
    pub fn new(output_path: PathBuf, source_paths: Vec<PathBuf>, content: Vec<u8>) -> Self {
        Self {
            output_path,
            source_paths,
            content: Mutex::new(content),
            dirty: AtomicBool::new(true),
        }
    }

    /// Where the artifact is (or will be) written.
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Sources the artifact was produced from.
    pub fn source_paths(&self) -> &[PathBuf] {
        &self.source_paths
    }

    /// Current in-memory content.
    pub fn content(&self) -> Vec<u8> {
        self.content.lock().clone()
    }

    /// Replace the content (instrumentation), marking the artifact dirty.
    pub fn set_content(&self, content: Vec<u8>) {
        *self.content.lock() = content;
        self.dirty.store(true, Ordering::Release);
    }

    /// Whether the in-memory content is newer than the on-disk file.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Write the content to disk and clear the dirty flag.
    pub fn save(&self) -> std::io::Result<()> {
        if let Some(parent) = self.output_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.output_path, self.content.lock().as_slice())?;
        self.dirty.store(false, Ordering::Release);
        Ok(())
    }
}

/// Sink passed to builders: accumulates compiled artifacts, records
/// source→output mappings and defers file-generated events until the chunk
/// finishes a round.
#[derive(Default)]
pub struct ChunkOutputConsumer {
    artifacts: Mutex<HashMap<PathBuf, Arc<CompiledArtifact>>>,
    pending_generated: Mutex<Vec<PathBuf>>,
}

impl ChunkOutputConsumer {
    /// Empty consumer for one chunk.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `output` was produced from `sources` for `target`. The
    /// file itself is written by the builder; this updates the persistent
    /// mapping and queues the generated event.
    pub fn register_output_file(
        &self,
        ctx: &CompileContext,
        target: &BuildTarget,
        output: &Path,
        sources: &[PathBuf],
    ) -> Result<()> {
        let map = ctx
            .project()
            .data_manager()
            .source_to_output_map(target.id())?;
        for source in sources {
            map.append_output(&path_key(source), &path_key(output));
        }
        self.pending_generated.lock().push(output.to_path_buf());
        Ok(())
    }

    /// Register an in-memory artifact; its mapping is recorded immediately,
    /// the content is persisted by [`ChunkOutputConsumer::save_instrumented`]
    /// or at round end.
    pub fn register_compiled_artifact(
        &self,
        ctx: &CompileContext,
        target: &BuildTarget,
        artifact: Arc<CompiledArtifact>,
    ) -> Result<()> {
        let map = ctx
            .project()
            .data_manager()
            .source_to_output_map(target.id())?;
        for source in artifact.source_paths() {
            map.append_output(&path_key(source), &path_key(artifact.output_path()));
        }
        self.pending_generated
            .lock()
            .push(artifact.output_path().to_path_buf());
        let _ = self
            .artifacts
            .lock()
            .insert(artifact.output_path().to_path_buf(), artifact);
        Ok(())
    }

    /// Snapshot of the held artifacts.
    pub fn compiled_artifacts(&self) -> Vec<Arc<CompiledArtifact>> {
        self.artifacts.lock().values().cloned().collect()
    }

    /// Persist every artifact whose in-memory content is newer than disk.
    /// Instrumented classes must hit disk before post-processors run.
    pub fn save_instrumented(&self) -> Result<()> {
        for artifact in self.compiled_artifacts() {
            if artifact.is_dirty() {
                artifact.save()?;
            }
        }
        Ok(())
    }

    /// Emit one file-generated event for everything produced since the last
    /// firing.
    pub fn fire_file_generated_events(&self, ctx: &CompileContext) {
        let paths: Vec<PathBuf> = std::mem::take(&mut *self.pending_generated.lock());
        if !paths.is_empty() {
            ctx.process_message(BuildMessage::FileGenerated { paths });
        }
    }

    /// Drop all held artifacts and pending events (chunk rebuild, chunk
    /// end).
    pub fn clear(&self) {
        self.artifacts.lock().clear();
        self.pending_generated.lock().clear();
    }
}

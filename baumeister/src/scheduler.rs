//! Chunk task graph and the bounded parallel scheduler.
//!
//! Chunks become arena-allocated tasks addressed by index. A task is ready
//! when `remaining_deps` is empty; finishing a task releases its dependents.
//! Workers are plain OS threads draining a channel; the main thread awaits a
//! countdown latch and the first failure wins a shared slot.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;
use std::time::Duration;

use crossbeam_channel::{unbounded, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info};

use crate::context::CompileContext;
use crate::driver::{IncrementalDriver, COMPILE_PARALLEL_MAX_THREADS_OPTION};
use crate::error::{BuildError, Result};
use crate::target::TargetChunk;

const LATCH_POLL: Duration = Duration::from_millis(500);

/// Effective worker pool size: `max(1, min(6, CPU − 1))`, overridable via
/// the `compile.parallel.max.threads` parameter.
pub(crate) fn max_builder_threads(ctx: &CompileContext) -> usize {
    let default = std::cmp::min(6, num_cpus::get().saturating_sub(1));
    ctx.param(COMPILE_PARALLEL_MAX_THREADS_OPTION)
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(default)
        .max(1)
}

struct ChunkTask {
    chunk: TargetChunk,
    remaining_deps: HashSet<usize>,
    dependents: Vec<usize>,
}

/// DAG of chunk tasks built from the target index's dependency edges.
pub(crate) struct ChunkTaskGraph {
    tasks: Vec<ChunkTask>,
}

impl ChunkTaskGraph {
    /// Materialize tasks for `chunks`, wiring dependency edges between the
    /// owning chunks of dependent targets. Self-edges are ignored.
    pub(crate) fn build(ctx: &CompileContext, chunks: Vec<TargetChunk>) -> Self {
        let mut owner_of = HashMap::new();
        for (index, chunk) in chunks.iter().enumerate() {
            for target in chunk.targets() {
                let _ = owner_of.insert(target.id().clone(), index);
            }
        }

        let mut tasks: Vec<ChunkTask> = chunks
            .into_iter()
            .map(|chunk| ChunkTask {
                chunk,
                remaining_deps: HashSet::new(),
                dependents: Vec::new(),
            })
            .collect();

        let target_index = std::sync::Arc::clone(ctx.project().target_index());
        for index in 0..tasks.len() {
            for target in tasks[index].chunk.targets().to_vec() {
                for dependency in target_index.dependencies(&target, ctx) {
                    let Some(&dep_index) = owner_of.get(dependency.id()) else {
                        continue;
                    };
                    if dep_index == index {
                        continue;
                    }
                    if tasks[index].remaining_deps.insert(dep_index) {
                        tasks[dep_index].dependents.push(index);
                    }
                }
            }
        }
        Self { tasks }
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }

    pub(crate) fn chunk(&self, index: usize) -> &TargetChunk {
        &self.tasks[index].chunk
    }

    /// Indices of tasks with no unbuilt dependencies.
    pub(crate) fn ready_tasks(&self) -> Vec<usize> {
        (0..self.tasks.len())
            .filter(|&i| self.tasks[i].remaining_deps.is_empty())
            .collect()
    }

    /// Mark `index` finished; remove it from every dependent's remaining
    /// set (a missing edge is a programmer error) and return the dependents
    /// that became ready.
    pub(crate) fn mark_finished(&mut self, index: usize) -> Result<Vec<usize>> {
        let dependents = self.tasks[index].dependents.clone();
        let mut ready = Vec::new();
        for dependent in dependents {
            if !self.tasks[dependent].remaining_deps.remove(&index) {
                return Err(BuildError::Internal(format!(
                    "chunk task {} did not have {} among its dependencies",
                    self.tasks[dependent].chunk.name(),
                    self.tasks[index].chunk.name(),
                )));
            }
            if self.tasks[dependent].remaining_deps.is_empty() {
                ready.push(dependent);
            }
        }
        Ok(ready)
    }
}

struct CountDownLatch {
    count: Mutex<usize>,
    signal: Condvar,
}

impl CountDownLatch {
    fn new(count: usize) -> Self {
        Self {
            count: Mutex::new(count),
            signal: Condvar::new(),
        }
    }

    fn count_down(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.signal.notify_all();
        }
    }

    /// Block until the count reaches zero; a set cancel token breaks the
    /// wait early.
    fn wait(&self, ctx: &CompileContext) {
        loop {
            let mut count = self.count.lock();
            if *count == 0 {
                return;
            }
            let _ = self.signal.wait_for(&mut count, LATCH_POLL);
            if *count == 0 {
                return;
            }
            drop(count);
            if ctx.cancel_token().is_canceled() {
                return;
            }
        }
    }
}

enum WorkerMessage {
    Run(usize),
    Shutdown,
}

/// Run the chunks on a worker pool of `thread_count` threads, preserving
/// dependency order. The first failure is kept and rethrown after every task
/// finalized; later tasks skip their build step but still finalize.
pub(crate) fn build_in_parallel(
    driver: &IncrementalDriver,
    ctx: &CompileContext,
    chunks: Vec<TargetChunk>,
    thread_count: usize,
) -> Result<()> {
    let graph = Mutex::new(ChunkTaskGraph::build(ctx, chunks));
    let task_count = graph.lock().len();
    if task_count == 0 {
        return Ok(());
    }

    let latch = CountDownLatch::new(task_count);
    let mut first_error: OnceLock<BuildError> = OnceLock::new();
    let (tx, rx) = unbounded::<WorkerMessage>();

    let initial = graph.lock().ready_tasks();
    debug!(count = initial.len(), "queuing initially ready chunks");
    for index in initial {
        let _ = tx.send(WorkerMessage::Run(index));
    }

    std::thread::scope(|scope| {
        for _ in 0..thread_count {
            let rx = rx.clone();
            let tx: Sender<WorkerMessage> = tx.clone();
            let graph = &graph;
            let latch = &latch;
            let first_error = &first_error;
            let _ = scope.spawn(move || {
                while let Ok(message) = rx.recv() {
                    let index = match message {
                        WorkerMessage::Run(index) => index,
                        WorkerMessage::Shutdown => break,
                    };
                    run_task(driver, ctx, graph, first_error, index);
                    latch.count_down();
                    match graph.lock().mark_finished(index) {
                        Ok(ready) => {
                            for next in ready {
                                let _ = tx.send(WorkerMessage::Run(next));
                            }
                        }
                        Err(err) => {
                            info!(error = %err, "scheduler invariant violated");
                            let _ = first_error.set(err);
                        }
                    }
                }
            });
        }

        latch.wait(ctx);
        for _ in 0..thread_count {
            let _ = tx.send(WorkerMessage::Shutdown);
        }
    });

    match first_error.take() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn run_task(
    driver: &IncrementalDriver,
    ctx: &CompileContext,
    graph: &Mutex<ChunkTaskGraph>,
    first_error: &OnceLock<BuildError>,
    index: usize,
) {
    let chunk = graph.lock().chunk(index).clone();

    // an earlier failure skips the build step; finalize still runs
    let built = if first_error.get().is_none() {
        let wrapped = ctx.wrapped();
        driver.build_chunk_if_affected(&wrapped, &chunk)
    } else {
        Ok(())
    };

    let result = match (built, driver.finalize_chunk(ctx, &chunk)) {
        (Ok(()), finalized) => finalized,
        (Err(primary), Err(finalize_err)) => {
            info!(chunk = %chunk.name(), error = %finalize_err, "chunk finalize failed after build error");
            Err(primary)
        }
        (Err(primary), Ok(())) => Err(primary),
    };

    debug!(chunk = %chunk.name(), "finished compilation of chunk");
    if let Err(err) = result {
        info!(chunk = %chunk.name(), error = %err, "chunk build failed");
        let _ = first_error.set(err);
    }
}

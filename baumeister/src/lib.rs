//! Incremental build driver.
//!
//! `baumeister` is the orchestration core of an incremental project builder:
//! given a dependency graph of build targets and a scope describing what is
//! affected, it drives pluggable builders over strongly-connected target
//! *chunks*, in dependency order and in parallel where the graph allows,
//! while keeping the persistent build state (dirty files, timestamps,
//! source↔output mappings) consistent across invocations, cancellations and
//! failures.
//!
//! The crate deliberately stops at the driver boundary: compilers, the
//! virtual file system, configuration loading and UI shells are external
//! collaborators reached through the traits in [`project`] and [`builder`].
//!
//! # Sketch
//!
//! ```no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use baumeister::{
//!     BuilderRegistry, CancelToken, IncrementalDriver, MakeScope, ProjectDescriptor,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let project = Arc::new(ProjectDescriptor::in_memory("/tmp/demo", vec![], vec![])?);
//! let driver = IncrementalDriver::new(
//!     project,
//!     BuilderRegistry::new(),
//!     HashMap::new(),
//!     CancelToken::new(),
//!     false,
//! );
//! driver.build(Arc::new(MakeScope), false)?;
//! # Ok(())
//! # }
//! ```

pub mod async_tasks;
pub mod builder;
pub mod cancel;
pub mod clean;
pub mod context;
pub mod driver;
pub mod error;
pub mod external;
pub mod fs_ops;
pub mod memory;
pub mod message;
pub mod output;
pub mod project;
pub mod scope;
pub mod storage;
pub mod target;

mod scheduler;

pub use builder::{
    BuildTask, BuilderCategory, BuilderRegistry, DirtyFilesHolder, ExitCode, ModuleLevelBuilder,
    TargetBuilder,
};
pub use cancel::CancelToken;
pub use context::{CompileContext, ContextKey};
pub use driver::{
    IncrementalDriver, CLEAR_OUTPUT_DIR_ON_REBUILD_OPTION, COMPILE_PARALLEL_MAX_THREADS_OPTION,
    COMPILE_PARALLEL_OPTION, GENERATE_CLASSPATH_INDEX_OPTION,
};
pub use error::{BuildError, RebuildRequested, Result, StorageError};
pub use message::{BuildMessage, CollectingHandler, MessageBus, MessageKind, TargetEvent};
pub use output::{ChunkOutputConsumer, CompiledArtifact};
pub use project::{
    BuildRootIndex, BuildTargetIndex, ContentExcludeIndex, GraphTargetIndex, ModuleExcludeIndex,
    ProjectDescriptor, ProjectRootIndex,
};
pub use scope::{BuildScope, MakeScope, RebuildScope, TargetsScope};
pub use target::{BuildTarget, SourceRootDescriptor, TargetChunk, TargetId, TargetKind};

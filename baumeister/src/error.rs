//! Error types for the build driver.

use std::path::PathBuf;

/// Errors raised by the persistent storage layer.
///
/// Every variant implies the on-disk build data can no longer be trusted, so
/// the driver classifies all of them as corruption and answers with a
/// rebuild request.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Underlying I/O failure while reading or writing a store.
    #[error("storage I/O error at {path}: {source}")]
    Io {
        /// Store file the operation touched.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A persisted snapshot failed to decode.
    #[error("build data is corrupted at {path}: {reason}")]
    Corrupted {
        /// Store file that failed to decode.
        path: PathBuf,
        /// Decoder diagnostic.
        reason: String,
    },

    /// A source↔output mapping operation failed.
    #[error("mapping failed for {key}: {reason}")]
    Mapping {
        /// Mapping key involved.
        key: String,
        /// Failure description.
        reason: String,
    },
}

/// Errors produced while running a build.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// The cancel token was observed set.
    #[error("build canceled")]
    Canceled,

    /// A builder deliberately stopped the build. Not a failure: the carried
    /// message is surfaced as progress and the build returns normally.
    #[error("{message}")]
    StopBuild {
        /// Optional builder-supplied explanation.
        message: String,
    },

    /// Persistent build data is unusable.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A build step failed in a way that should stop the build with an error.
    #[error("{message}")]
    ProjectBuild {
        /// Human-readable failure description.
        message: String,
        /// Underlying cause, if any.
        #[source]
        source: Option<Box<BuildError>>,
    },

    /// Plain I/O failure outside the storage layer.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Scheduler invariant violation. Always a programmer error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl BuildError {
    /// Wrap an arbitrary failure as a project build error.
    pub fn project(message: impl Into<String>) -> Self {
        BuildError::ProjectBuild {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap `cause` as a project build error with a message.
    pub fn project_with(message: impl Into<String>, cause: BuildError) -> Self {
        BuildError::ProjectBuild {
            message: message.into(),
            source: Some(Box::new(cause)),
        }
    }

    /// Whether this error, or anything in its source chain, implies the
    /// persistent build data is corrupted and only a full rebuild can help.
    pub fn is_corruption(&self) -> bool {
        match self {
            BuildError::Storage(_) | BuildError::Io(_) => true,
            BuildError::ProjectBuild { source, .. } => {
                source.as_ref().is_some_and(|cause| cause.is_corruption())
            }
            _ => false,
        }
    }
}

/// Distinct outcome of [`crate::IncrementalDriver::build`]: the caller should
/// retry the invocation with a whole-project rebuild scope.
#[derive(Debug, thiserror::Error)]
#[error("project rebuild requested: {reason}")]
pub struct RebuildRequested {
    /// Description of the corruption that triggered the request.
    pub reason: String,
}

/// Convenience result alias used throughout the driver.
pub type Result<T> = std::result::Result<T, BuildError>;

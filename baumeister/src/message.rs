//! Build messages and the fan-out bus.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::target::TargetId;

/// Severity of a [`BuildMessage::Compiler`] message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    /// Informational, build continues.
    Info,
    /// Non-fatal problem, build continues.
    Warning,
    /// Error; sets the context error flag.
    Error,
}

/// Lifecycle event carried by [`BuildMessage::BuildingTargets`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetEvent {
    /// Chunk entered its pipeline.
    Started,
    /// Chunk finalize completed.
    Finished,
}

/// Messages emitted by the driver and by builders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BuildMessage {
    /// Free-form progress line with the current done fraction.
    Progress {
        /// Progress text.
        text: String,
        /// Done fraction in `[0, 1]` at emission time.
        done: f32,
    },
    /// Diagnostic attributed to a compiler or the driver itself.
    Compiler {
        /// Originating component ("" for the driver).
        source: String,
        /// Severity.
        kind: MessageKind,
        /// Diagnostic text.
        text: String,
    },
    /// Output files were physically deleted.
    FileDeleted {
        /// Deleted paths.
        paths: Vec<PathBuf>,
    },
    /// Builders produced new output files.
    FileGenerated {
        /// Generated paths.
        paths: Vec<PathBuf>,
    },
    /// A chunk's targets started or finished building.
    BuildingTargets {
        /// Targets of the chunk.
        targets: Vec<TargetId>,
        /// Started or finished.
        event: TargetEvent,
    },
    /// Marker that the build performed (or would perform) real work.
    DoneSomething,
}

impl BuildMessage {
    /// Shorthand for a driver-attributed compiler message.
    pub fn compiler(kind: MessageKind, text: impl Into<String>) -> Self {
        BuildMessage::Compiler {
            source: String::new(),
            kind,
            text: text.into(),
        }
    }

    /// Shorthand for a progress message.
    pub fn progress(text: impl Into<String>, done: f32) -> Self {
        BuildMessage::Progress {
            text: text.into(),
            done,
        }
    }
}

/// Handler invoked for every dispatched message.
pub type MessageHandler = Arc<dyn Fn(&BuildMessage) + Send + Sync>;

/// Fan-out dispatcher over registered handlers.
///
/// Handlers registered while a build runs see only messages dispatched after
/// registration. Dispatch order equals registration order.
#[derive(Clone, Default)]
pub struct MessageBus {
    handlers: Arc<RwLock<Vec<MessageHandler>>>,
}

impl MessageBus {
    /// New bus with no handlers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler.
    pub fn add_handler(&self, handler: MessageHandler) {
        self.handlers.write().push(handler);
    }

    /// Dispatch `message` to every registered handler.
    pub fn dispatch(&self, message: &BuildMessage) {
        for handler in self.handlers.read().iter() {
            handler(message);
        }
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("handlers", &self.handlers.read().len())
            .finish()
    }
}

/// Test-friendly handler collecting every message it sees.
#[derive(Clone, Default)]
pub struct CollectingHandler {
    messages: Arc<Mutex<Vec<BuildMessage>>>,
}

impl CollectingHandler {
    /// New empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handler closure to register on a [`MessageBus`].
    pub fn handler(&self) -> MessageHandler {
        let messages = Arc::clone(&self.messages);
        Arc::new(move |message| messages.lock().push(message.clone()))
    }

    /// Snapshot of collected messages.
    pub fn messages(&self) -> Vec<BuildMessage> {
        self.messages.lock().clone()
    }

    /// Collected compiler messages of the given kind.
    pub fn compiler_messages(&self, wanted: MessageKind) -> Vec<String> {
        self.messages
            .lock()
            .iter()
            .filter_map(|message| match message {
                BuildMessage::Compiler { kind, text, .. } if *kind == wanted => {
                    Some(text.clone())
                }
                _ => None,
            })
            .collect()
    }
}

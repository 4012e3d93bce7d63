//! Per-invocation build context with typed user data and wrapped overlays.
//!
//! A [`CompileContext`] is created once per `build` invocation. The parallel
//! scheduler hands every chunk a *wrapped* context: writes to *local* keys
//! land in a private overlay (with null-writes recorded as tombstones that
//! shadow the delegate), while *global* keys are shared across all contexts
//! of the invocation.

use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashSet;
use parking_lot::Mutex;

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::message::{BuildMessage, MessageBus, MessageKind};
use crate::project::ProjectDescriptor;
use crate::scope::BuildScope;
use crate::target::BuildTarget;

/// Whether a key is private to one context or shared across all wrapped
/// contexts of an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyKind {
    Local,
    Global,
}

/// Typed user-data key. Key names must be unique per value type within the
/// process; declare keys as statics.
pub struct ContextKey<T> {
    name: &'static str,
    kind: KeyKind,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ContextKey<T> {
    /// Key isolated per wrapped context.
    pub const fn local(name: &'static str) -> Self {
        Self {
            name,
            kind: KeyKind::Local,
            _marker: PhantomData,
        }
    }

    /// Key shared across all wrapped contexts of one invocation.
    pub const fn global(name: &'static str) -> Self {
        Self {
            name,
            kind: KeyKind::Global,
            _marker: PhantomData,
        }
    }
}

/// Marks that at least one ERROR message went through this context.
pub static ERRORS_DETECTED: ContextKey<bool> = ContextKey::local("errors.detected");

type TypedMap = HashMap<&'static str, Arc<dyn Any + Send + Sync>>;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// State shared by the base context and every wrapped context of one
/// invocation.
struct InvocationState {
    project: Arc<ProjectDescriptor>,
    scope: Arc<dyn BuildScope>,
    bus: MessageBus,
    cancel: CancelToken,
    params: HashMap<String, String>,
    globals: Mutex<TypedMap>,
    base_locals: Mutex<TypedMap>,
    // done fraction is kept monotone here; see `set_done`
    done: Mutex<f32>,
    // millis; sources modified after this stay dirty across the build
    compilation_start: Mutex<u64>,
    test_mode: bool,
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Private store of a wrapped context.
struct Overlay {
    locals: Mutex<TypedMap>,
    tombstones: DashSet<&'static str>,
}

/// Handle to the per-invocation build state. Cheap to clone; clones share
/// the same underlying state (and overlay, if wrapped).
#[derive(Clone)]
pub struct CompileContext {
    state: Arc<InvocationState>,
    overlay: Option<Arc<Overlay>>,
    id: u64,
}

impl CompileContext {
    /// Create the base context of an invocation.
    pub fn new(
        project: Arc<ProjectDescriptor>,
        scope: Arc<dyn BuildScope>,
        bus: MessageBus,
        cancel: CancelToken,
        params: HashMap<String, String>,
        test_mode: bool,
    ) -> Self {
        Self {
            state: Arc::new(InvocationState {
                project,
                scope,
                bus,
                cancel,
                params,
                globals: Mutex::new(TypedMap::new()),
                base_locals: Mutex::new(TypedMap::new()),
                done: Mutex::new(0.0),
                compilation_start: Mutex::new(now_millis()),
                test_mode,
            }),
            overlay: None,
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Wrapped variant with a private local-key store. Global keys keep
    /// passing through to the shared state.
    pub fn wrapped(&self) -> CompileContext {
        CompileContext {
            state: Arc::clone(&self.state),
            overlay: Some(Arc::new(Overlay {
                locals: Mutex::new(TypedMap::new()),
                tombstones: DashSet::new(),
            })),
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Identity of this context; wrapped contexts get their own.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The project descriptor.
    pub fn project(&self) -> &Arc<ProjectDescriptor> {
        &self.state.project
    }

    /// The invocation scope.
    pub fn scope(&self) -> &dyn BuildScope {
        self.state.scope.as_ref()
    }

    /// The cancel token.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.state.cancel
    }

    /// Raise if cancellation has been requested.
    pub fn check_canceled(&self) -> Result<()> {
        self.state.cancel.checked()
    }

    /// Whether the driver runs in test mode (deterministic iteration order).
    pub fn is_test_mode(&self) -> bool {
        self.state.test_mode
    }

    /// Builder parameter by name.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.state.params.get(name).map(String::as_str)
    }

    /// Boolean builder parameter with a default.
    pub fn bool_param(&self, name: &str, default: bool) -> bool {
        self.param(name)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Read typed user data.
    pub fn get_user_data<T: Any + Send + Sync>(&self, key: &ContextKey<T>) -> Option<Arc<T>> {
        let value = match (key.kind, &self.overlay) {
            (KeyKind::Global, _) => self.state.globals.lock().get(key.name).cloned(),
            (KeyKind::Local, Some(overlay)) => {
                if overlay.tombstones.contains(key.name) {
                    return None;
                }
                overlay
                    .locals
                    .lock()
                    .get(key.name)
                    .cloned()
                    .or_else(|| self.state.base_locals.lock().get(key.name).cloned())
            }
            (KeyKind::Local, None) => self.state.base_locals.lock().get(key.name).cloned(),
        };
        value.and_then(|any| any.downcast::<T>().ok())
    }

    /// Write typed user data; `None` removes the entry (and, in a wrapped
    /// context, shadows the delegate with a tombstone).
    pub fn put_user_data<T: Any + Send + Sync>(
        &self,
        key: &ContextKey<T>,
        value: Option<Arc<T>>,
    ) {
        match (key.kind, &self.overlay) {
            (KeyKind::Global, _) => {
                let mut globals = self.state.globals.lock();
                match value {
                    Some(v) => {
                        let _ = globals.insert(key.name, v);
                    }
                    None => {
                        let _ = globals.remove(key.name);
                    }
                }
            }
            (KeyKind::Local, Some(overlay)) => match value {
                Some(v) => {
                    let _ = overlay.tombstones.remove(key.name);
                    let _ = overlay.locals.lock().insert(key.name, v);
                }
                None => {
                    let _ = overlay.locals.lock().remove(key.name);
                    let _ = overlay.tombstones.insert(key.name);
                }
            },
            (KeyKind::Local, None) => {
                let mut locals = self.state.base_locals.lock();
                match value {
                    Some(v) => {
                        let _ = locals.insert(key.name, v);
                    }
                    None => {
                        let _ = locals.remove(key.name);
                    }
                }
            }
        }
    }

    /// Get-or-insert for keyed registries guarded by their own lock. The
    /// lookup and the insert happen under one map lock, so two concurrent
    /// chunks always observe the same registry instance.
    pub fn user_data_or_init<T, F>(&self, key: &ContextKey<T>, init: F) -> Arc<T>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        fn get_or_insert<T: Any + Send + Sync>(
            map: &mut TypedMap,
            name: &'static str,
            init: impl FnOnce() -> T,
        ) -> Arc<T> {
            if let Some(existing) = map.get(name).cloned() {
                if let Ok(typed) = existing.downcast::<T>() {
                    return typed;
                }
            }
            let created = Arc::new(init());
            let _ = map.insert(name, Arc::clone(&created) as Arc<dyn Any + Send + Sync>);
            created
        }

        match (key.kind, &self.overlay) {
            (KeyKind::Global, _) => {
                get_or_insert(&mut self.state.globals.lock(), key.name, init)
            }
            (KeyKind::Local, Some(overlay)) => {
                let mut locals = overlay.locals.lock();
                if !overlay.tombstones.contains(key.name) {
                    if let Some(existing) = locals.get(key.name).cloned() {
                        if let Ok(typed) = existing.downcast::<T>() {
                            return typed;
                        }
                    }
                    if let Some(inherited) = self.state.base_locals.lock().get(key.name).cloned()
                    {
                        if let Ok(typed) = inherited.downcast::<T>() {
                            return typed;
                        }
                    }
                }
                let _ = overlay.tombstones.remove(key.name);
                get_or_insert(&mut locals, key.name, init)
            }
            (KeyKind::Local, None) => {
                get_or_insert(&mut self.state.base_locals.lock(), key.name, init)
            }
        }
    }

    /// Emit a message. ERROR compiler messages additionally latch
    /// [`ERRORS_DETECTED`] in this context's local store.
    pub fn process_message(&self, message: BuildMessage) {
        if let BuildMessage::Compiler {
            kind: MessageKind::Error,
            ..
        } = &message
        {
            self.put_user_data(&ERRORS_DETECTED, Some(Arc::new(true)));
        }
        self.state.bus.dispatch(&message);
    }

    /// Emit a progress line carrying the current done fraction.
    pub fn progress_message(&self, text: impl Into<String>) {
        let done = self.done();
        self.process_message(BuildMessage::progress(text, done));
    }

    /// Whether an ERROR message went through this context.
    pub fn errors_detected(&self) -> bool {
        self.get_user_data(&ERRORS_DETECTED)
            .map(|flag| *flag)
            .unwrap_or(false)
    }

    /// Update the done fraction. Values are clamped to `[0, 1]` and the
    /// fraction never decreases within an invocation.
    pub fn set_done(&self, done: f32) {
        let mut current = self.state.done.lock();
        *current = current.max(done.clamp(0.0, 1.0));
    }

    /// Current done fraction.
    pub fn done(&self) -> f32 {
        *self.state.done.lock()
    }

    /// Millisecond stamp marking the start of the compilation the running
    /// chunk belongs to; sources modified later than this are left dirty.
    pub fn compilation_start_stamp(&self) -> u64 {
        *self.state.compilation_start.lock()
    }

    /// Move the compilation start stamp to now (chunk finalize).
    pub fn update_compilation_start_stamp(&self) {
        *self.state.compilation_start.lock() = now_millis();
    }

    /// Scope shorthand: is the file of this target affected?
    pub fn is_affected(&self, target: &BuildTarget, file: &Path) -> bool {
        self.state.scope.is_affected_file(target, file)
    }
}

impl std::fmt::Debug for CompileContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompileContext")
            .field("id", &self.id)
            .field("wrapped", &self.overlay.is_some())
            .finish()
    }
}

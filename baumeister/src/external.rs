//! Handle to an external compiler helper process attached to a build.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::context::{CompileContext, ContextKey};

/// Grace period granted to the helper between the shutdown request and the
/// hard terminate.
pub const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// External compiler helper process attached for the invocation.
pub trait CompilerServiceHandle: Send + Sync {
    /// Ask the process to shut down, waiting up to `grace` for it to exit.
    /// Returns whether it exited in time.
    fn send_shutdown(&self, grace: Duration) -> bool;

    /// Terminate the process unconditionally.
    fn terminate(&self);
}

static EXTERNAL_COMPILER: ContextKey<Mutex<Option<Arc<dyn CompilerServiceHandle>>>> =
    ContextKey::global("external.compiler.service");

/// Attach a helper process handle to the invocation.
pub fn attach(ctx: &CompileContext, handle: Arc<dyn CompilerServiceHandle>) {
    let slot = ctx.user_data_or_init(&EXTERNAL_COMPILER, || Mutex::new(None));
    *slot.lock() = Some(handle);
}

/// If a helper is attached: request shutdown with the bounded grace period,
/// then make sure the process is gone. Runs on every build exit path.
pub(crate) fn shutdown_attached(ctx: &CompileContext) {
    let Some(slot) = ctx.get_user_data(&EXTERNAL_COMPILER) else {
        return;
    };
    let Some(handle) = slot.lock().take() else {
        return;
    };
    let exited = handle.send_shutdown(SHUTDOWN_GRACE);
    debug!(exited, "external compiler shutdown requested");
    // ensure the process is not running regardless of the answer
    handle.terminate();
}

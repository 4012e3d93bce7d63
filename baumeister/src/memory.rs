//! Process-wide low-memory watcher registry.
//!
//! The platform wires the actual memory pressure signal; the driver only
//! registers a callback that flushes the persistent stores, and tests fire
//! the signal explicitly.

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

type Callback = Arc<dyn Fn() + Send + Sync>;

static REGISTRY: Lazy<Mutex<Vec<(u64, Callback)>>> = Lazy::new(|| Mutex::new(Vec::new()));
static NEXT_ID: Lazy<Mutex<u64>> = Lazy::new(|| Mutex::new(1));

/// Registration handle; dropping it (or calling `stop`) deregisters the
/// callback.
pub struct LowMemoryWatcher {
    id: u64,
}

impl LowMemoryWatcher {
    /// Register `callback` to run on low-memory events. The callback runs on
    /// the signalling thread and must be safe concurrently with a build.
    pub fn register(callback: impl Fn() + Send + Sync + 'static) -> Self {
        let id = {
            let mut next = NEXT_ID.lock();
            let id = *next;
            *next += 1;
            id
        };
        REGISTRY.lock().push((id, Arc::new(callback)));
        Self { id }
    }

    /// Deregister explicitly.
    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for LowMemoryWatcher {
    fn drop(&mut self) {
        REGISTRY.lock().retain(|(id, _)| *id != self.id);
    }
}

/// Fire every registered callback, as the platform would on memory pressure.
pub fn notify_low_memory() {
    let callbacks: Vec<Callback> = REGISTRY.lock().iter().map(|(_, c)| Arc::clone(c)).collect();
    for callback in callbacks {
        callback();
    }
}

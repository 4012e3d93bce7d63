//! Tracked background tasks: plain threads whose completion the driver
//! awaits on exit, honoring cancellation.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::cancel::CancelToken;

const WAIT_POLL: Duration = Duration::from_millis(500);

struct TaskState {
    done: Mutex<bool>,
    signal: Condvar,
}

struct TrackedTask {
    name: String,
    state: Arc<TaskState>,
    handle: std::thread::JoinHandle<()>,
}

/// List of background tasks spawned during a build (temp cleanup, async
/// deletion, output index emission). All of them are awaited in the build's
/// finalize path with 500 ms cancellation polling.
#[derive(Default)]
pub struct AsyncTaskList {
    tasks: Mutex<Vec<TrackedTask>>,
}

impl AsyncTaskList {
    /// Empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `work` on a background thread and track it.
    pub fn spawn(&self, name: &str, work: impl FnOnce() + Send + 'static) {
        let state = Arc::new(TaskState {
            done: Mutex::new(false),
            signal: Condvar::new(),
        });
        let thread_state = Arc::clone(&state);
        let handle = std::thread::spawn(move || {
            work();
            *thread_state.done.lock() = true;
            thread_state.signal.notify_all();
        });
        self.tasks.lock().push(TrackedTask {
            name: name.to_string(),
            state,
            handle,
        });
    }

    /// Wait for every tracked task. A set cancel token breaks out of the
    /// wait; tasks then finish detached.
    pub fn wait_all(&self, cancel: &CancelToken) {
        let tasks: Vec<TrackedTask> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if cancel.is_canceled() {
                debug!(task = %task.name, "canceled; leaving async task detached");
                break;
            }
            loop {
                let mut done = task.state.done.lock();
                if *done {
                    break;
                }
                let _ = task.state.signal.wait_for(&mut done, WAIT_POLL);
                if *done {
                    break;
                }
                if cancel.is_canceled() {
                    break;
                }
            }
            if *task.state.done.lock() {
                if task.handle.join().is_err() {
                    warn!(task = %task.name, "async task panicked");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn wait_all_joins_completed_tasks() {
        let list = AsyncTaskList::new();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        list.spawn("probe", move || flag.store(true, Ordering::SeqCst));

        list.wait_all(&CancelToken::new());
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn cancellation_breaks_the_wait() {
        let list = AsyncTaskList::new();
        let gate = Arc::new((Mutex::new(false), Condvar::new()));
        let thread_gate = Arc::clone(&gate);
        list.spawn("slow", move || {
            let mut open = thread_gate.0.lock();
            while !*open {
                thread_gate.1.wait(&mut open);
            }
        });

        let cancel = CancelToken::new();
        cancel.cancel();
        // returns immediately instead of blocking on the gated task
        list.wait_all(&cancel);

        *gate.0.lock() = true;
        gate.1.notify_all();
    }
}

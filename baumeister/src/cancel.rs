//! Shared cancellation token.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{BuildError, Result};

/// Process-wide cancellation flag, polled at builder boundaries and inside
/// deletion loops. Cloning shares the underlying flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// New token in the not-canceled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Whether cancellation has been requested.
    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Raise [`BuildError::Canceled`] if cancellation has been requested.
    pub fn checked(&self) -> Result<()> {
        if self.is_canceled() {
            return Err(BuildError::Canceled);
        }
        Ok(())
    }
}

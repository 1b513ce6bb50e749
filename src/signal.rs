//! Cooperative cancellation signal
//!
//! A [`StopSignal`] is cloned into every component that runs long loops
//! (fetch engine, health prober, orchestrator). `request_stop` is set-once:
//! the flag is never cleared, a fresh run takes a fresh signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared stop flag observed at well-defined checkpoints
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    stopped: Arc<AtomicBool>,
}

impl StopSignal {
    /// Create a fresh, unset signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a graceful stop. Idempotent and safe to call from a
    /// signal-handling task.
    pub fn request_stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// Check whether a stop has been requested. Never blocks.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

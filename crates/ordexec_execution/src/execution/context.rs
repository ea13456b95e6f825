use crate::runtime::tracker::MemoryTracker;
use ordexec_error::{OrdexecError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Per-query execution context handed to every `next` call.
///
/// Carries the cancellation signal and the roots of the session's resource
/// accounting trees. Cloning is cheap and shares the underlying state.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    cancelled: Arc<AtomicBool>,
    memory_root: Arc<MemoryTracker>,
    disk_root: Arc<MemoryTracker>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        ExecutionContext {
            cancelled: Arc::new(AtomicBool::new(false)),
            memory_root: Arc::new(MemoryTracker::new("session.memory")),
            disk_root: Arc::new(MemoryTracker::new("session.disk")),
        }
    }

    /// Context whose session memory root enforces a byte limit.
    ///
    /// Exceeding the limit invokes spill actions registered with the root.
    pub fn with_memory_limit(limit: i64) -> Self {
        ExecutionContext {
            memory_root: Arc::new(MemoryTracker::with_limit("session.memory", limit)),
            ..Self::new()
        }
    }

    pub fn memory_root(&self) -> &Arc<MemoryTracker> {
        &self.memory_root
    }

    pub fn disk_root(&self) -> &Arc<MemoryTracker> {
        &self.disk_root
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(OrdexecError::cancelled());
        }
        Ok(())
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

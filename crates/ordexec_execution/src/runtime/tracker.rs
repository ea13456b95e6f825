use ordexec_error::{OrdexecError, Result};
use parking_lot::Mutex;
use std::fmt::Debug;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Callback registered with a tracker to free memory when a limit is
/// exceeded.
///
/// Invoked synchronously on the stack of whatever `consume` call crossed the
/// limit.
pub trait SpillAction: Debug + Send + Sync {
    /// Attempt to free memory, returning the number of bytes released.
    fn spill(&self) -> Result<u64>;
}

/// A node in the session's resource accounting tree.
///
/// Consumption propagates to the parent, so the root observes the sum of the
/// whole tree. Disk usage uses the same type with no limit.
#[derive(Debug)]
pub struct MemoryTracker {
    label: Mutex<String>,
    bytes: AtomicI64,
    /// Byte limit, <= 0 means unlimited.
    limit: i64,
    parent: Mutex<Option<Arc<MemoryTracker>>>,
    actions: Mutex<Vec<Arc<dyn SpillAction>>>,
}

impl MemoryTracker {
    pub fn new(label: impl Into<String>) -> Self {
        Self::with_limit(label, 0)
    }

    pub fn with_limit(label: impl Into<String>, limit: i64) -> Self {
        MemoryTracker {
            label: Mutex::new(label.into()),
            bytes: AtomicI64::new(0),
            limit,
            parent: Mutex::new(None),
            actions: Mutex::new(Vec::new()),
        }
    }

    pub fn attach(&self, parent: &Arc<MemoryTracker>) {
        *self.parent.lock() = Some(parent.clone());
    }

    pub fn set_label(&self, label: impl Into<String>) {
        *self.label.lock() = label.into();
    }

    pub fn label(&self) -> String {
        self.label.lock().clone()
    }

    pub fn bytes(&self) -> i64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn limit(&self) -> Option<i64> {
        (self.limit > 0).then_some(self.limit)
    }

    pub fn register_spill_action(&self, action: Arc<dyn SpillAction>) {
        self.actions.lock().push(action);
    }

    /// Account for consumed (or released, when negative) bytes.
    ///
    /// Propagates to the parent. Crossing this node's limit invokes the
    /// registered spill actions; if usage still exceeds the limit afterwards
    /// the consumption fails.
    pub fn consume(&self, delta: i64) -> Result<()> {
        let new = self.bytes.fetch_add(delta, Ordering::Relaxed) + delta;

        if delta > 0 && self.limit > 0 && new > self.limit {
            self.release_pressure(new)?;
        }

        let parent = self.parent.lock().clone();
        match parent {
            Some(parent) => parent.consume(delta),
            None => Ok(()),
        }
    }

    fn release_pressure(&self, observed: i64) -> Result<()> {
        let actions = self.actions.lock().clone();

        if actions.is_empty() {
            return Err(OrdexecError::out_of_memory(format!(
                "Memory limit of {} bytes exceeded for '{}' ({observed} bytes in use)",
                self.limit,
                self.label(),
            )));
        }

        debug!(
            label = %self.label(),
            observed,
            limit = self.limit,
            "memory limit exceeded, invoking spill actions"
        );

        for action in actions {
            action.spill()?;
            if self.bytes() <= self.limit {
                return Ok(());
            }
        }

        let remaining = self.bytes();
        warn!(label = %self.label(), remaining, "spill actions did not release enough memory");
        Err(OrdexecError::out_of_memory(format!(
            "Memory limit of {} bytes exceeded for '{}' after spilling ({remaining} bytes in use)",
            self.limit,
            self.label(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn consumption_propagates_to_parent() {
        let root = Arc::new(MemoryTracker::new("root"));
        let child = MemoryTracker::new("child");
        child.attach(&root);

        child.consume(100).unwrap();
        child.consume(50).unwrap();
        assert_eq!(150, child.bytes());
        assert_eq!(150, root.bytes());

        child.consume(-150).unwrap();
        assert_eq!(0, child.bytes());
        assert_eq!(0, root.bytes());
    }

    #[derive(Debug)]
    struct TestAction {
        tracker: Arc<MemoryTracker>,
        fired: AtomicBool,
    }

    impl SpillAction for TestAction {
        fn spill(&self) -> Result<u64> {
            self.fired.store(true, Ordering::Relaxed);
            // Pretend we moved everything to disk.
            let bytes = self.tracker.bytes();
            self.tracker.consume(-bytes)?;
            Ok(bytes as u64)
        }
    }

    #[test]
    fn limit_fires_spill_action() {
        let root = Arc::new(MemoryTracker::with_limit("root", 100));
        let action = Arc::new(TestAction {
            tracker: root.clone(),
            fired: AtomicBool::new(false),
        });
        root.register_spill_action(action.clone());

        root.consume(80).unwrap();
        assert!(!action.fired.load(Ordering::Relaxed));

        root.consume(80).unwrap();
        assert!(action.fired.load(Ordering::Relaxed));
        assert_eq!(0, root.bytes());
    }

    #[test]
    fn relabel() {
        let tracker = MemoryTracker::new("initial");
        tracker.set_label("merge_join.inner_store");
        assert_eq!("merge_join.inner_store", tracker.label());
    }

    #[test]
    fn limit_without_action_errors() {
        let root = MemoryTracker::with_limit("root", 10);
        let err = root.consume(11).unwrap_err();
        assert_eq!(ordexec_error::ErrorKind::OutOfMemory, err.kind());
    }
}

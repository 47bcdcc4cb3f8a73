//! Per-target serialization of executions.
//!
//! Each target id maps to an owned async mutex. Tokio's mutex queues waiters
//! in FIFO order, so calls for one target run one at a time in arrival order
//! whether the one ahead succeeded or failed. An entry lives only while some
//! caller holds or waits for its lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

struct TargetLock {
    lock: Arc<AsyncMutex<()>>,
    users: usize,
}

type LockTable = Arc<Mutex<HashMap<String, TargetLock>>>;

/// Registration of one caller against a target's lock.
struct TargetHandle {
    target: String,
    lock: Arc<AsyncMutex<()>>,
    table: LockTable,
}

impl Drop for TargetHandle {
    fn drop(&mut self) {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = table.get_mut(&self.target) else {
            return;
        };
        // A released target may have been re-registered with a new lock.
        if !Arc::ptr_eq(&entry.lock, &self.lock) {
            return;
        }
        entry.users = entry.users.saturating_sub(1);
        if entry.users == 0 {
            table.remove(&self.target);
        }
    }
}

/// Exclusive hold on a render target. Dropping it lets the next caller in.
pub struct RenderGuard {
    _guard: OwnedMutexGuard<()>,
    _handle: TargetHandle,
}

#[derive(Default)]
pub struct RenderLockRegistry {
    table: LockTable,
}

impl RenderLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle_for(&self, target: &str) -> TargetHandle {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = table.entry(target.to_string()).or_insert_with(|| TargetLock {
            lock: Arc::new(AsyncMutex::new(())),
            users: 0,
        });
        entry.users += 1;
        TargetHandle {
            target: target.to_string(),
            lock: entry.lock.clone(),
            table: self.table.clone(),
        }
    }

    /// Wait for every earlier holder of `target`; hold the guard to keep it.
    pub async fn acquire(&self, target: &str) -> RenderGuard {
        let handle = self.handle_for(target);
        debug!("Waiting for render target '{}'", target);
        let guard = handle.lock.clone().lock_owned().await;
        RenderGuard {
            _guard: guard,
            _handle: handle,
        }
    }

    /// Forget `target`. Holders and waiters keep their lock; later callers get a new one.
    pub fn release(&self, target: &str) -> bool {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(target)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.table.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_target_is_serialized() {
        let registry = Arc::new(RenderLockRegistry::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let first_guard = registry.acquire("main").await;

        let second = {
            let registry = registry.clone();
            let order = order.clone();
            tokio::spawn(async move {
                let _guard = registry.acquire("main").await;
                order.lock().unwrap().push("second");
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        order.lock().unwrap().push("first");
        drop(first_guard);
        second.await.unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_distinct_targets_do_not_block() {
        let registry = RenderLockRegistry::new();
        let _a = registry.acquire("a").await;
        let _b = tokio::time::timeout(Duration::from_millis(50), registry.acquire("b"))
            .await
            .expect("other targets are independent");
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_entries_are_dropped_with_their_last_guard() {
        let registry = RenderLockRegistry::new();
        for i in 0..100 {
            drop(registry.acquire(&format!("target-{}", i)).await);
        }
        assert!(registry.is_empty());

        let held = registry.acquire("a").await;
        assert_eq!(registry.len(), 1);
        drop(held);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_abandoned_waiter_does_not_keep_entry() {
        let registry = RenderLockRegistry::new();
        let held = registry.acquire("a").await;

        let waited = tokio::time::timeout(Duration::from_millis(20), registry.acquire("a")).await;
        assert!(waited.is_err());
        assert_eq!(registry.len(), 1);

        drop(held);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_release() {
        let registry = RenderLockRegistry::new();
        let held = registry.acquire("a").await;
        assert!(registry.release("a"));
        assert!(!registry.release("a"));
        assert!(registry.is_empty());

        // A new caller gets a fresh lock; the old guard's drop leaves it alone.
        let fresh = tokio::time::timeout(Duration::from_millis(50), registry.acquire("a"))
            .await
            .expect("released target is free");
        drop(held);
        assert_eq!(registry.len(), 1);
        drop(fresh);
        assert!(registry.is_empty());
    }
}

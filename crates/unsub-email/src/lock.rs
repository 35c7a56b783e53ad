//! Per-account serialization for mailbox access.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

/// Keyed async mutex. Callers holding the same key run one at a time, in
/// arrival order; different keys never wait on each other.
#[derive(Debug, Clone, Default)]
pub struct AccountLock {
    slots: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl AccountLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock for `key`. The slot is pruned on every
    /// exit, including cancellation and panics.
    pub async fn with_lock<F, Fut, T>(&self, key: &str, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let held = SlotRef {
            owner: self,
            key,
            slot: self.slot(key),
        };
        let _guard = held.slot.lock().await;
        f().await
    }

    /// Number of keys currently held or waited on.
    pub fn active_keys(&self) -> usize {
        self.slots.lock().map(|m| m.len()).unwrap_or(0)
    }

    fn slot(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut slots = match self.slots.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        slots.entry(key.to_string()).or_default().clone()
    }

    fn release(&self, key: &str, slot: &Arc<tokio::sync::Mutex<()>>) {
        let mut slots = match self.slots.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        // map + our clone: nobody else is holding or waiting
        if Arc::strong_count(slot) == 2 {
            slots.remove(key);
        }
    }
}

/// A caller's claim on a slot; dropping it prunes the slot when idle.
struct SlotRef<'a> {
    owner: &'a AccountLock,
    key: &'a str,
    slot: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for SlotRef<'_> {
    fn drop(&mut self) {
        self.owner.release(self.key, &self.slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_runs_one_at_a_time() {
        let lock = AccountLock::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks = (0..4).map(|_| {
            let lock = lock.clone();
            let inside = inside.clone();
            let peak = peak.clone();
            tokio::spawn(async move {
                lock.with_lock("user@example.com", || async {
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
                .await
            })
        });
        for t in tasks.collect::<Vec<_>>() {
            t.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(lock.active_keys(), 0);
    }

    #[tokio::test]
    async fn different_keys_overlap() {
        let lock = AccountLock::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let a = {
            let lock = lock.clone();
            tokio::spawn(async move { lock.with_lock("a", || async { rx.await.is_ok() }).await })
        };
        // "b" must get in while "a" is still holding its lock
        lock.with_lock("b", || async {
            tx.send(()).unwrap();
        })
        .await;

        assert!(a.await.unwrap());
        assert_eq!(lock.active_keys(), 0);
    }

    #[tokio::test]
    async fn cancelled_waiter_and_holder_leave_no_slot() {
        let lock = AccountLock::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let holder = {
            let lock = lock.clone();
            tokio::spawn(async move { lock.with_lock("k", || async { rx.await.is_ok() }).await })
        };
        tokio::task::yield_now().await;

        // queued behind the holder, then given up on
        let waited = tokio::time::timeout(
            Duration::from_millis(20),
            lock.with_lock("k", || async {}),
        )
        .await;
        assert!(waited.is_err());
        assert_eq!(lock.active_keys(), 1);

        // holder cancelled mid-critical-section
        holder.abort();
        assert!(holder.await.unwrap_err().is_cancelled());
        drop(tx);
        assert_eq!(lock.active_keys(), 0);
    }

    #[tokio::test]
    async fn panic_inside_lock_prunes_slot() {
        let lock = AccountLock::new();
        let task = {
            let lock = lock.clone();
            tokio::spawn(async move {
                lock.with_lock("k", || async {
                    panic!("mailbox went away");
                })
                .await
            })
        };
        assert!(task.await.unwrap_err().is_panic());
        assert_eq!(lock.active_keys(), 0);

        // the key is usable again
        assert_eq!(lock.with_lock("k", || async { 7 }).await, 7);
    }

    #[tokio::test]
    async fn returns_closure_output() {
        let lock = AccountLock::new();
        let n = lock.with_lock("k", || async { 41 + 1 }).await;
        assert_eq!(n, 42);
    }
}

//! Keyed async mutex table.
//!
//! Serializes progress updates per `(user_id, achievement_id)` while the
//! database unique constraint backstops anything that slips through.
//! Idle entries are evicted once the table grows past its bound.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

const DEFAULT_CAPACITY: usize = 4096;

type Key = (u64, i64);

pub struct LockTable {
    entries: Mutex<HashMap<Key, Arc<Mutex<()>>>>,
    capacity: usize,
}

impl LockTable {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Acquire the mutex for one `(user_id, achievement_id)` pair. The
    /// guard is owned, so it can be held across awaits.
    pub async fn acquire(&self, user_id: u64, achievement_id: i64) -> OwnedMutexGuard<()> {
        let entry = {
            let mut entries = self.entries.lock().await;
            if entries.len() > self.capacity {
                // Entries with no outside holders are safe to drop: any
                // new locker re-creates them.
                entries.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            Arc::clone(
                entries
                    .entry((user_id, achievement_id))
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };
        entry.lock_owned().await
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

impl Default for LockTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[tokio::test]
    async fn test_same_key_serializes() {
        let table = Arc::new(LockTable::new());
        let counter = Arc::new(AtomicU64::new(0));
        let mut handles = Vec::new();

        for _ in 0..8 {
            let table = Arc::clone(&table);
            let counter = Arc::clone(&counter);
            handles.push(tokio::spawn(async move {
                let _guard = table.acquire(42, 7).await;
                // Read-modify-write without atomics; the lock makes it safe.
                let read = counter.load(Ordering::SeqCst);
                tokio::task::yield_now().await;
                counter.store(read + 1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_block() {
        let table = LockTable::new();
        let _a = table.acquire(1, 1).await;
        // Would deadlock if keys shared a mutex.
        let _b = table.acquire(1, 2).await;
        let _c = table.acquire(2, 1).await;
    }

    #[tokio::test]
    async fn test_idle_entries_evicted_past_capacity() {
        let table = LockTable::with_capacity(4);
        for id in 0..10 {
            let guard = table.acquire(id, 0).await;
            drop(guard);
        }
        // One more acquisition triggers the sweep of idle entries.
        let _guard = table.acquire(99, 0).await;
        assert!(table.len().await <= 5);
    }
}

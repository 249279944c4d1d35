//! Reader/writer locks addressed by key.
//!
//! A lock exists only while someone holds or waits on it. Every guard and
//! every pending `read`/`write` future owns a lease on its key's entry, and
//! the last lease to go removes the entry, whether it was released or
//! cancelled.

use std::{
    collections::HashMap,
    fmt::{Debug, Formatter},
    hash::Hash,
    sync::Arc,
};

use parking_lot::Mutex;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

struct Slot {
    lock: Arc<RwLock<()>>,
    leases: usize,
}

type Table<K> = Mutex<HashMap<K, Slot>>;

pub struct KeyedLocks<K> {
    table: Arc<Table<K>>,
}

impl<K> KeyedLocks<K>
where
    K: Clone + Eq + Hash,
{
    pub fn new() -> Self {
        Self {
            table: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Shared access to `key`. Readers of one key run together; a writer of
    /// the same key waits for all of them.
    pub async fn read(&self, key: &K) -> KeyedReadGuard<K> {
        let (lock, lease) = self.lease(key);
        let guard = lock.read_owned().await;
        KeyedReadGuard {
            _guard: guard,
            _lease: lease,
        }
    }

    /// Exclusive access to `key`. Not reentrant: acquiring the same key again
    /// on one execution path deadlocks.
    pub async fn write(&self, key: &K) -> KeyedWriteGuard<K> {
        let (lock, lease) = self.lease(key);
        let guard = lock.write_owned().await;
        KeyedWriteGuard {
            _guard: guard,
            _lease: lease,
        }
    }

    /// Number of keys currently locked or waited on.
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lease(&self, key: &K) -> (Arc<RwLock<()>>, Lease<K>) {
        let mut table = self.table.lock();
        let slot = table.entry(key.clone()).or_insert_with(|| Slot {
            lock: Arc::new(RwLock::new(())),
            leases: 0,
        });
        slot.leases += 1;
        let lease = Lease {
            table: Arc::clone(&self.table),
            key: key.clone(),
        };
        (Arc::clone(&slot.lock), lease)
    }
}

impl<K> Default for KeyedLocks<K>
where
    K: Clone + Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Debug for KeyedLocks<K> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedLocks")
            .field("entries", &self.table.lock().len())
            .finish()
    }
}

/// One claim on a table entry. Dropping the last claim removes the entry.
struct Lease<K: Eq + Hash> {
    table: Arc<Table<K>>,
    key: K,
}

impl<K: Eq + Hash> Drop for Lease<K> {
    fn drop(&mut self) {
        let mut table = self.table.lock();
        let unused = match table.get_mut(&self.key) {
            Some(slot) => {
                slot.leases -= 1;
                slot.leases == 0
            }
            None => false,
        };
        if unused {
            table.remove(&self.key);
        }
    }
}

// Fields drop in declaration order: the lock is released before the lease.
pub struct KeyedReadGuard<K: Eq + Hash> {
    _guard: OwnedRwLockReadGuard<()>,
    _lease: Lease<K>,
}

pub struct KeyedWriteGuard<K: Eq + Hash> {
    _guard: OwnedRwLockWriteGuard<()>,
    _lease: Lease<K>,
}

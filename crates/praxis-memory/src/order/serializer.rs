use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Slots = Arc<Mutex<HashMap<String, Slot>>>;

#[derive(Default)]
struct Slot {
    lock: Arc<AsyncMutex<()>>,
    /// Holders plus waiters, including ones still queued.
    users: usize,
}

/// Per-key FIFO queue for read-modify-write cycles.
///
/// At most one holder per key at a time; waiters are served in arrival order
/// (`tokio::sync::Mutex` is fair). Different keys never wait on each other.
/// A key's slot is dropped as soon as nobody holds or waits on it, including
/// when a queued waiter is cancelled.
#[derive(Clone, Default)]
pub struct UpdateSerializer {
    slots: Slots,
}

/// Exclusive turn on one key. Releasing it (drop) hands the key to the next
/// waiter, whether the holder succeeded, failed or was cancelled.
pub struct KeyPermit {
    // Field order matters: the lock is released before the lease.
    _guard: OwnedMutexGuard<()>,
    _lease: SlotLease,
}

/// Counts one user of a slot from before it starts waiting until it is
/// dropped, so cancelled waiters are accounted for.
struct SlotLease {
    slots: Slots,
    key: String,
}

impl UpdateSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: &str) -> KeyPermit {
        let (lock, lease) = {
            let mut slots = lock_slots(&self.slots);
            let slot = slots.entry(key.to_string()).or_default();
            slot.users += 1;
            let lease = SlotLease {
                slots: Arc::clone(&self.slots),
                key: key.to_string(),
            };
            (Arc::clone(&slot.lock), lease)
        };
        let guard = lock.lock_owned().await;
        KeyPermit {
            _guard: guard,
            _lease: lease,
        }
    }

    /// Runs `update` once every earlier request on `key` has finished.
    pub async fn run<T, E, F, Fut>(&self, key: &str, update: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let _permit = self.acquire(key).await;
        update().await
    }

    /// Keys currently held or waited on.
    pub fn active_keys(&self) -> usize {
        lock_slots(&self.slots).len()
    }
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        let mut slots = lock_slots(&self.slots);
        let drained = match slots.get_mut(&self.key) {
            Some(slot) => {
                slot.users = slot.users.saturating_sub(1);
                slot.users == 0
            }
            None => false,
        };
        if drained {
            slots.remove(&self.key);
        }
    }
}

fn lock_slots(slots: &Slots) -> MutexGuard<'_, HashMap<String, Slot>> {
    // The map is only touched in short non-panicking sections
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}

//! Lock manager implementation.
//!
//! One mutex guards every page queue and the waits-for graph. Each page
//! queue has its own condition variable, always waited on with that mutex,
//! so a release only wakes requests queued on the same page.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::{Result, StorageError};
use crate::lock::{Lock, LockMode, WaitsFor};
use crate::types::{PageId, TableId, TrxId};

struct Entry {
    lock: Arc<Lock>,
    granted: bool,
}

struct PageQueue {
    entries: Vec<Entry>,
    changed: Arc<Condvar>,
}

impl PageQueue {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
            changed: Arc::new(Condvar::new()),
        }
    }

    fn position(&self, id: u64) -> Option<usize> {
        self.entries.iter().position(|e| e.lock.id == id)
    }

    /// Owner of the nearest earlier request that conflicts with the entry
    /// at `pos`
    fn blocker(&self, pos: usize) -> Option<TrxId> {
        let me = &self.entries[pos].lock;
        self.entries[..pos]
            .iter()
            .rev()
            .map(|e| &e.lock)
            .find(|other| {
                other.key == me.key
                    && other.owner != me.owner
                    && other.mode.conflicts_with(me.mode)
            })
            .map(|other| other.owner)
    }
}

#[derive(Default)]
struct LockTable {
    queues: HashMap<(TableId, PageId), PageQueue>,
    waits_for: WaitsFor,
    next_id: u64,
}

/// Grants and releases record locks
#[derive(Default)]
pub struct LockManager {
    state: Mutex<LockTable>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire a lock on `(table, page, key)` for `trx`, blocking while an
    /// earlier conflicting request is queued on the same key.
    ///
    /// A lock the transaction already holds with enough strength is
    /// returned as is.
    pub fn acquire(
        &self,
        table: TableId,
        page: PageId,
        key: i64,
        trx: TrxId,
        mode: LockMode,
    ) -> Result<Arc<Lock>> {
        let mut state = self.state.lock();

        // Reuse a lock this transaction already has on the key.
        loop {
            let Some(queue) = state.queues.get(&(table, page)) else {
                break;
            };
            let Some(existing) = queue
                .entries
                .iter()
                .find(|e| e.lock.owner == trx && e.lock.key == key && e.lock.mode.covers(mode))
            else {
                break;
            };
            if existing.granted {
                return Ok(Arc::clone(&existing.lock));
            }
            // Another thread of this transaction is still waiting for it.
            let changed = Arc::clone(&queue.changed);
            changed.wait(&mut state);
        }

        state.next_id += 1;
        let lock = Arc::new(Lock {
            id: state.next_id,
            table,
            page,
            key,
            mode,
            owner: trx,
        });
        let queue = state
            .queues
            .entry((table, page))
            .or_insert_with(PageQueue::new);
        queue.entries.push(Entry {
            lock: Arc::clone(&lock),
            granted: false,
        });
        // The queue outlives this wait: it is only dropped once empty.
        let changed = Arc::clone(&queue.changed);

        loop {
            let table_state = &mut *state;
            let queue = table_state
                .queues
                .get_mut(&(table, page))
                .ok_or_else(|| StorageError::corruption("lock queue vanished"))?;
            let pos = queue
                .position(lock.id)
                .ok_or_else(|| StorageError::corruption("queued lock vanished"))?;

            match queue.blocker(pos) {
                None => {
                    queue.entries[pos].granted = true;
                    table_state.waits_for.clear(trx);
                    changed.notify_all();
                    tracing::trace!(table, page = %page, key, trx, ?mode, "lock granted");
                    return Ok(lock);
                }
                Some(holder) => {
                    table_state.waits_for.wait(trx, holder);
                    if table_state.waits_for.closes_cycle(trx) {
                        queue.entries.remove(pos);
                        if queue.entries.is_empty() {
                            table_state.queues.remove(&(table, page));
                        }
                        table_state.waits_for.clear(trx);
                        changed.notify_all();
                        tracing::warn!(table, page = %page, key, trx, holder, "deadlock detected");
                        return Err(StorageError::Deadlock { trx_id: trx });
                    }
                    tracing::trace!(table, page = %page, key, trx, holder, "waiting for lock");
                    changed.wait(&mut state);
                }
            }
        }
    }

    /// Drop a lock from its queue and wake the requests queued behind it
    pub fn release(&self, lock: &Lock) {
        let mut state = self.state.lock();
        let slot = (lock.table, lock.page);
        let Some(queue) = state.queues.get_mut(&slot) else {
            return;
        };
        if let Some(pos) = queue.position(lock.id) {
            queue.entries.remove(pos);
        }
        queue.changed.notify_all();
        if queue.entries.is_empty() {
            state.queues.remove(&slot);
        }
    }

    /// Release every lock in `locks` and forget any wait edge of `trx`
    pub fn release_all(&self, trx: TrxId, locks: &[Arc<Lock>]) {
        for lock in locks {
            self.release(lock);
        }
        self.state.lock().waits_for.clear(trx);
    }

    /// Number of queued requests, granted or not
    pub fn queued(&self) -> usize {
        self.state
            .lock()
            .queues
            .values()
            .map(|q| q.entries.len())
            .sum()
    }
}

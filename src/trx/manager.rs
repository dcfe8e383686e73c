//! Transaction manager implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Result, StorageError};
use crate::lock::{Lock, LockManager, LockMode};
use crate::trx::{UndoLog, UndoRecord};
use crate::types::{PageId, TableId, TrxId, NON_TRANSACTIONAL};

#[derive(Debug, Default)]
struct Transaction {
    locks: Vec<Arc<Lock>>,
    undo: UndoLog,
}

/// Hands out transaction ids and owns the lock manager.
///
/// The transaction table is never held while a lock request waits.
pub struct TransactionManager {
    next_id: AtomicU64,
    active: Mutex<HashMap<TrxId, Transaction>>,
    locks: LockManager,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(NON_TRANSACTIONAL + 1),
            active: Mutex::new(HashMap::new()),
            locks: LockManager::new(),
        }
    }

    /// Start a transaction
    pub fn begin(&self) -> TrxId {
        let trx = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.active.lock().insert(trx, Transaction::default());
        tracing::info!(trx, "began transaction");
        trx
    }

    pub fn is_active(&self, trx: TrxId) -> bool {
        self.active.lock().contains_key(&trx)
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.locks
    }

    /// Lock a record for `trx`, remembering the lock until commit or abort.
    ///
    /// On deadlock the request is withdrawn and the error returned; the
    /// caller is expected to abort the transaction.
    pub fn acquire_lock(
        &self,
        trx: TrxId,
        table: TableId,
        page: PageId,
        key: i64,
        mode: LockMode,
    ) -> Result<Arc<Lock>> {
        if !self.is_active(trx) {
            return Err(StorageError::UnknownTransaction(trx));
        }

        let lock = self.locks.acquire(table, page, key, trx, mode)?;

        let mut active = self.active.lock();
        match active.get_mut(&trx) {
            Some(t) => {
                if !t.locks.iter().any(|held| Arc::ptr_eq(held, &lock)) {
                    t.locks.push(Arc::clone(&lock));
                }
                Ok(lock)
            }
            None => {
                // Finished while this request was waiting.
                drop(active);
                self.locks.release(&lock);
                Err(StorageError::UnknownTransaction(trx))
            }
        }
    }

    /// Log the prior bytes of an in-place update
    pub fn record_undo(&self, trx: TrxId, record: UndoRecord) -> Result<()> {
        let mut active = self.active.lock();
        let t = active
            .get_mut(&trx)
            .ok_or(StorageError::UnknownTransaction(trx))?;
        t.undo.push(record);
        Ok(())
    }

    /// Forget the undo log and release every lock
    pub fn commit(&self, trx: TrxId) -> Result<TrxId> {
        let t = self
            .active
            .lock()
            .remove(&trx)
            .ok_or(StorageError::UnknownTransaction(trx))?;
        self.locks.release_all(trx, &t.locks);
        tracing::info!(trx, locks = t.locks.len(), "committed transaction");
        Ok(trx)
    }

    /// Replay the undo log newest first through `restore`, then release
    /// every lock.
    ///
    /// A failing restore does not stop the replay; the first error is
    /// returned once the locks are gone.
    pub fn abort<F>(&self, trx: TrxId, mut restore: F) -> Result<TrxId>
    where
        F: FnMut(&UndoRecord) -> Result<()>,
    {
        let t = self
            .active
            .lock()
            .remove(&trx)
            .ok_or(StorageError::UnknownTransaction(trx))?;

        let undone = t.undo.len();
        let mut first_error = None;
        for record in t.undo.into_rollback_order() {
            if let Err(e) = restore(&record) {
                tracing::error!(trx, page = %record.page, error = %e, "undo failed");
                first_error.get_or_insert(e);
            }
        }
        self.locks.release_all(trx, &t.locks);
        tracing::info!(trx, undone, "aborted transaction");

        match first_error {
            Some(e) => Err(e),
            None => Ok(trx),
        }
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

//! # B+ Tree Storage Engine
//!
//! An embedded, disk-based B+ tree key-value store with transactional record
//! access.
//!
//! ## Architecture
//!
//! - **Page Layer** (`page`): typed views over 4096-byte leaf and internal pages
//! - **Storage Layer** (`storage`): one file per table, header page and free list
//! - **Buffer Pool** (`buffer`): shared page cache with per-frame latches and NRU eviction
//! - **B+ Tree Layer** (`btree`): search, range scan, split and merge
//! - **Lock Manager** (`lock`): shared/exclusive record locks with deadlock detection
//! - **Transactions** (`trx`): strict two-phase locking with a physical undo log
//!
//! Keys are `i64`, values are byte strings of at most [`MAX_VALUE_SIZE`] bytes.
//! Inserts, deletes and scans are not transactional. Finds and updates run
//! under a transaction id: they take record locks held until commit or
//! abort, and updates can be rolled back.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bptree_storage::{Config, Db};
//!
//! let db = Db::open(Config::new().buffer_pool_size(256))?;
//! let table = db.open_table("people.db")?;
//!
//! db.insert(table, 1, b"alice")?;
//!
//! let trx = db.begin_transaction();
//! let value = db.find(table, 1, trx)?;
//! db.update(table, 1, b"ALICE", trx)?;
//! db.commit(trx)?;
//!
//! for record in db.scan(table, 0, 100)? {
//!     println!("{} -> {:?}", record.key, record.value);
//! }
//! ```

pub mod btree;
pub mod buffer;
pub mod error;
pub mod lock;
pub mod page;
pub mod storage;
pub mod trx;
pub mod types;

pub use error::{status, Result, StorageError};
pub use types::{PageId, TableId, TrxId, MAX_VALUE_SIZE, NON_TRANSACTIONAL, PAGE_SIZE};

// Re-export main public API
pub use btree::{BTree, TreeSummary};
pub use buffer::{BufferPool, BufferPoolImpl, StoreOptions};
pub use lock::LockMode;
pub use page::Record;
pub use storage::{DiskManager, DiskManagerImpl};
pub use trx::TransactionManager;

use btree::Node;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use trx::UndoRecord;
use types::DEFAULT_INITIAL_PAGES;

/// Database configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Buffer pool size in frames (default: 1000)
    pub buffer_pool_size: usize,
    /// fsync after every page write (default: true)
    pub sync_on_write: bool,
    /// Pages in a freshly created table file (default: 2560, i.e. 10 MiB)
    pub initial_pages: u64,
}

impl Config {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self {
            buffer_pool_size: 1000,
            sync_on_write: true,
            initial_pages: DEFAULT_INITIAL_PAGES,
        }
    }

    /// Set buffer pool size
    pub fn buffer_pool_size(mut self, size: usize) -> Self {
        self.buffer_pool_size = size;
        self
    }

    /// Enable or disable sync on write
    pub fn sync_on_write(mut self, enabled: bool) -> Self {
        self.sync_on_write = enabled;
        self
    }

    /// Set the size of newly created table files
    pub fn initial_pages(mut self, pages: u64) -> Self {
        self.initial_pages = pages;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

/// Node type for visualization
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    /// Page ID
    pub page_id: u64,
    /// Whether this is a leaf node
    pub is_leaf: bool,
    /// Keys in this node
    pub keys: Vec<i64>,
    /// Values (only for leaf nodes)
    pub values: Vec<String>,
    /// Child nodes (only for internal nodes)
    pub children: Vec<TreeNode>,
}

/// Database statistics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DbStats {
    /// Buffer pool capacity
    pub buffer_pool_size: usize,
    /// Frames holding a page
    pub resident_pages: usize,
    /// Frames pinned right now
    pub pinned_pages: usize,
    pub dirty_pages: usize,
    pub open_tables: usize,
    pub active_transactions: usize,
    /// Lock requests queued, granted or waiting
    pub queued_locks: usize,
}

/// Main database handle.
///
/// Owns the buffer pool shared by every open table and the transaction
/// manager. Each table has a tree latch: inserts and deletes hold it
/// exclusively, everything else shares it. A record lock is never waited
/// for while the tree latch is held.
pub struct Db {
    buffer_pool: BufferPoolImpl,
    transactions: TransactionManager,
    latches: Mutex<HashMap<TableId, Arc<RwLock<()>>>>,
    config: Config,
}

impl Db {
    /// Create a database with an empty buffer pool
    pub fn open(config: Config) -> Result<Self> {
        if config.buffer_pool_size == 0 {
            return Err(StorageError::invalid_operation(
                "buffer pool needs at least one frame",
            ));
        }
        let buffer_pool = BufferPoolImpl::new(
            config.buffer_pool_size,
            StoreOptions {
                sync_on_write: config.sync_on_write,
                initial_pages: config.initial_pages,
            },
        );
        tracing::info!(frames = config.buffer_pool_size, "opened database");

        Ok(Self {
            buffer_pool,
            transactions: TransactionManager::new(),
            latches: Mutex::new(HashMap::new()),
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Open or create a table file. Opening the same path twice yields the
    /// same table id.
    pub fn open_table<P: AsRef<Path>>(&self, path: P) -> Result<TableId> {
        let table = self.buffer_pool.open_table(path.as_ref())?;
        self.latches.lock().entry(table).or_default();
        Ok(table)
    }

    fn latch(&self, table: TableId) -> Result<Arc<RwLock<()>>> {
        self.latches
            .lock()
            .get(&table)
            .cloned()
            .ok_or(StorageError::UnknownTable(table))
    }

    fn tree(&self, table: TableId, trx: TrxId) -> BTree<'_> {
        BTree::new(&self.buffer_pool, table, trx)
    }

    /// Insert a new record. Fails with `DuplicateKey` when the key exists.
    pub fn insert(&self, table: TableId, key: i64, value: &[u8]) -> Result<()> {
        let latch = self.latch(table)?;
        let _tree = latch.write();
        self.tree(table, NON_TRANSACTIONAL).insert(key, value)
    }

    /// Remove a record. Fails with `KeyNotFound` when the key is absent.
    ///
    /// Deletes are not part of any transaction. Removing a record compacts
    /// its leaf, which moves the bytes of the records beside it; undo
    /// entries logged earlier for those records still name the old offsets.
    pub fn delete(&self, table: TableId, key: i64) -> Result<()> {
        let latch = self.latch(table)?;
        let _tree = latch.write();
        self.tree(table, NON_TRANSACTIONAL).delete(key)
    }

    /// Records with keys in `begin..=end`, in key order
    pub fn scan(&self, table: TableId, begin: i64, end: i64) -> Result<Vec<Record>> {
        let latch = self.latch(table)?;
        let _tree = latch.read();
        self.tree(table, NON_TRANSACTIONAL).scan(begin, end)
    }

    /// Check if a key exists
    pub fn contains(&self, table: TableId, key: i64) -> Result<bool> {
        Ok(self.find(table, key, NON_TRANSACTIONAL)?.is_some())
    }

    /// Look up a value.
    ///
    /// With a transaction id the record is share-locked for the rest of the
    /// transaction. `NON_TRANSACTIONAL` reads without locking.
    pub fn find(&self, table: TableId, key: i64, trx: TrxId) -> Result<Option<Vec<u8>>> {
        if trx == NON_TRANSACTIONAL {
            let latch = self.latch(table)?;
            let _tree = latch.read();
            return Ok(self.tree(table, trx).find_record(key)?.value);
        }
        self.guarded(trx, || self.find_locked(table, key, trx))
    }

    fn find_locked(&self, table: TableId, key: i64, trx: TrxId) -> Result<Option<Vec<u8>>> {
        let latch = self.latch(table)?;
        let tree = self.tree(table, trx);

        let mut leaf = {
            let _tree = latch.read();
            let lookup = tree.find_record(key)?;
            if lookup.value.is_none() {
                return Ok(None);
            }
            lookup.leaf
        };

        loop {
            self.transactions
                .acquire_lock(trx, table, leaf, key, LockMode::Shared)?;

            let _tree = latch.read();
            let lookup = tree.find_record(key)?;
            if lookup.leaf == leaf || lookup.value.is_none() {
                return Ok(lookup.value);
            }
            // A split or merge moved the key while this request waited.
            leaf = lookup.leaf;
        }
    }

    /// Overwrite a stored value in place and return the stored size.
    ///
    /// The new value may not be longer than the stored one; shorter values
    /// replace the leading bytes. Under a transaction the record is
    /// exclusively locked and the prior bytes are logged for abort.
    pub fn update(&self, table: TableId, key: i64, value: &[u8], trx: TrxId) -> Result<u16> {
        if value.len() > MAX_VALUE_SIZE {
            return Err(StorageError::ValueTooLarge {
                size: value.len(),
                max: MAX_VALUE_SIZE,
            });
        }

        if trx == NON_TRANSACTIONAL {
            let latch = self.latch(table)?;
            let _tree = latch.read();
            let done = self
                .tree(table, trx)
                .overwrite_value(key, value, None, |_| Ok(()))?
                .ok_or(StorageError::KeyNotFound(key))?;
            return Ok(done.stored_size);
        }
        self.guarded(trx, || self.update_locked(table, key, value, trx))
    }

    fn update_locked(&self, table: TableId, key: i64, value: &[u8], trx: TrxId) -> Result<u16> {
        let latch = self.latch(table)?;
        let tree = self.tree(table, trx);

        let mut leaf = {
            let _tree = latch.read();
            let lookup = tree.find_record(key)?;
            if lookup.value.is_none() {
                return Err(StorageError::KeyNotFound(key));
            }
            lookup.leaf
        };

        loop {
            self.transactions
                .acquire_lock(trx, table, leaf, key, LockMode::Exclusive)?;

            let _tree = latch.read();
            let logged = tree.overwrite_value(key, value, Some(leaf), |prior| {
                self.transactions.record_undo(
                    trx,
                    UndoRecord {
                        table,
                        page: prior.page,
                        offset: prior.offset,
                        before: prior.before.clone(),
                    },
                )
            })?;
            match logged {
                Some(done) => return Ok(done.stored_size),
                None => leaf = tree.find_record(key)?.leaf,
            }
        }
    }

    /// Abort `trx` when `op` fails with anything but a logical error
    fn guarded<T, F>(&self, trx: TrxId, op: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let outcome = op();
        if let Err(e) = &outcome {
            let finished = matches!(e, StorageError::UnknownTransaction(_));
            if !e.is_logical() && !finished {
                tracing::warn!(trx, error = %e, "aborting transaction after failure");
                if let Err(abort) = self.abort(trx) {
                    tracing::error!(trx, error = %abort, "automatic abort failed");
                }
            }
        }
        outcome
    }

    /// Start a transaction
    pub fn begin_transaction(&self) -> TrxId {
        self.transactions.begin()
    }

    /// Commit: release every lock, keep every update
    pub fn commit(&self, trx: TrxId) -> Result<TrxId> {
        self.transactions.commit(trx)
    }

    /// Abort: put back the prior bytes of every update, then release every lock.
    ///
    /// Undo entries are physical `(page, offset)` ranges. If a split, merge
    /// or delete has reorganised a leaf since the update was logged, the
    /// restore lands at the old offset and can overwrite another record.
    pub fn abort(&self, trx: TrxId) -> Result<TrxId> {
        self.transactions.abort(trx, |record| {
            let latch = self.latch(record.table)?;
            let _tree = latch.read();
            self.buffer_pool
                .get_page(record.table, record.page, trx)?
                .write_bytes(record.offset as usize, &record.before)
        })
    }

    /// Height of a table's tree (0 when empty)
    pub fn height(&self, table: TableId) -> Result<usize> {
        let latch = self.latch(table)?;
        let _tree = latch.read();
        self.tree(table, NON_TRANSACTIONAL).height()
    }

    /// Check a table's tree invariants and count its pages and records
    pub fn verify(&self, table: TableId) -> Result<TreeSummary> {
        let latch = self.latch(table)?;
        let _tree = latch.read();
        self.tree(table, NON_TRANSACTIONAL).verify()
    }

    /// Flush all dirty pages to disk
    pub fn flush(&self) -> Result<()> {
        self.buffer_pool.flush_all()
    }

    /// Get statistics about the database
    pub fn stats(&self) -> DbStats {
        let pool = self.buffer_pool.stats();
        DbStats {
            buffer_pool_size: pool.capacity,
            resident_pages: pool.resident,
            pinned_pages: pool.pinned,
            dirty_pages: pool.dirty,
            open_tables: pool.tables,
            active_transactions: self.transactions.active_count(),
            queued_locks: self.transactions.lock_manager().queued(),
        }
    }

    /// Export a table's tree for visualization
    pub fn export_tree(&self, table: TableId) -> Result<Option<TreeNode>> {
        let latch = self.latch(table)?;
        let _tree = latch.read();
        let tree = self.tree(table, NON_TRANSACTIONAL);
        let root = tree.root()?;
        if !root.is_some() {
            return Ok(None);
        }
        Self::export_node(&tree, root).map(Some)
    }

    fn export_node(tree: &BTree<'_>, page_id: PageId) -> Result<TreeNode> {
        match tree.node(page_id)? {
            Node::Leaf(leaf) => {
                let records = leaf.records();
                Ok(TreeNode {
                    page_id: page_id.value(),
                    is_leaf: true,
                    keys: records.iter().map(|r| r.key).collect(),
                    values: records
                        .iter()
                        .map(|r| String::from_utf8_lossy(&r.value).into_owned())
                        .collect(),
                    children: Vec::new(),
                })
            }
            Node::Internal(node) => {
                let children = node
                    .children()
                    .into_iter()
                    .map(|child| Self::export_node(tree, child))
                    .collect::<Result<Vec<_>>>()?;
                Ok(TreeNode {
                    page_id: page_id.value(),
                    is_leaf: false,
                    keys: node.keys(),
                    values: Vec::new(),
                    children,
                })
            }
        }
    }

    /// Flush everything and close every table
    pub fn close(self) -> Result<()> {
        let active = self.transactions.active_count();
        if active > 0 {
            tracing::warn!(active, "closing with transactions still active");
        }
        self.buffer_pool.close_all()
    }
}

impl Drop for Db {
    fn drop(&mut self) {
        if let Err(e) = self.buffer_pool.flush_all() {
            tracing::error!(error = %e, "failed to flush on drop");
        }
    }
}

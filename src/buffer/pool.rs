//! Buffer pool implementation.
//!
//! The buffer pool manages a bounded set of in-memory page frames shared by
//! every open table, reading pages from their table's disk manager on a miss
//! and writing dirty pages back on eviction or flush.
//!
//! Locking is two-level: one pool mutex guards the frame list, the page
//! table and the table registry; each frame has its own metadata mutex and
//! a condition variable for latch waiters. The pool mutex is always taken
//! before a frame's metadata mutex, never the other way round.

use crate::buffer::frame::Frame;
use crate::buffer::{pick_victim, NruClock};
use crate::error::{Result, StorageError};
use crate::page::{InternalPage, LeafPage, PageBuf};
use crate::storage::{DiskManager, DiskManagerImpl};
use crate::types::{PageId, PageType, TableId, TrxId, DEFAULT_INITIAL_PAGES, PAGE_SIZE};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Trait for buffer pool operations
pub trait BufferPool: Send + Sync {
    /// Open (or create) a table file and return its id
    fn open_table(&self, path: &Path) -> Result<TableId>;

    /// Fetch a page, pinning it and latching its frame for `trx`
    fn get_page(&self, table: TableId, page: PageId, trx: TrxId) -> Result<PageHandle<'_>>;

    /// Allocate a page from the table's store and return it pinned and
    /// initialized as `page_type`
    fn get_new_page(
        &self,
        table: TableId,
        trx: TrxId,
        page_type: PageType,
    ) -> Result<PageHandle<'_>>;

    /// Flush all dirty pages to disk
    fn flush_all(&self) -> Result<()>;

    /// Flush everything, sync and forget all tables
    fn close_all(&self) -> Result<()>;

    /// Root page recorded in the table's header
    fn root_page(&self, table: TableId) -> Result<PageId>;

    /// Record a new root page in the table's header
    fn set_root_page(&self, table: TableId, page: PageId) -> Result<()>;

    /// Get the buffer pool capacity
    fn capacity(&self) -> usize;

    /// Snapshot of frame usage
    fn stats(&self) -> PoolStats;
}

/// How newly opened table files are handled
#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    /// fsync after every page write
    pub sync_on_write: bool,
    /// Pages in a freshly created file
    pub initial_pages: u64,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            sync_on_write: true,
            initial_pages: DEFAULT_INITIAL_PAGES,
        }
    }
}

/// Frame usage counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: usize,
    pub resident: usize,
    pub pinned: usize,
    pub dirty: usize,
    pub tables: usize,
}

struct PoolState {
    frames: Vec<Arc<Frame>>,
    page_table: HashMap<(TableId, PageId), usize>,
    tables: HashMap<TableId, Arc<dyn DiskManager>>,
    paths: HashMap<PathBuf, TableId>,
    next_table_id: TableId,
    clock: NruClock,
}

impl PoolState {
    fn store(&self, table: TableId) -> Result<Arc<dyn DiskManager>> {
        self.tables
            .get(&table)
            .cloned()
            .ok_or(StorageError::UnknownTable(table))
    }
}

/// Buffer pool implementation
pub struct BufferPoolImpl {
    state: Mutex<PoolState>,
    /// Serialises table opens so one path maps to one store
    opening: Mutex<()>,
    /// Maximum number of frames
    capacity: usize,
    options: StoreOptions,
}

impl BufferPoolImpl {
    /// Create a new buffer pool
    pub fn new(capacity: usize, options: StoreOptions) -> Self {
        Self {
            state: Mutex::new(PoolState {
                frames: Vec::with_capacity(capacity),
                page_table: HashMap::with_capacity(capacity),
                tables: HashMap::new(),
                paths: HashMap::new(),
                next_table_id: 1,
                clock: NruClock::new(),
            }),
            opening: Mutex::new(()),
            capacity,
            options,
        }
    }

    /// Register an already opened store under a fresh table id.
    ///
    /// A store whose path is already registered is dropped and the existing
    /// id returned.
    pub fn attach_table(&self, store: Arc<dyn DiskManager>) -> TableId {
        let mut state = self.state.lock();
        if let Some(&table) = state.paths.get(store.path()) {
            return table;
        }
        let table = state.next_table_id;
        state.next_table_id += 1;
        state.paths.insert(store.path().to_path_buf(), table);
        state.tables.insert(table, store);
        table
    }

    /// Every frame is unpinned and unlatched
    pub fn all_unpinned(&self) -> bool {
        let state = self.state.lock();
        state.frames.iter().all(|frame| {
            let meta = frame.meta.lock();
            meta.pin_count == 0 && meta.owner.is_none()
        })
    }

    /// Take a frame for a page about to be loaded: a never-used frame while
    /// the pool is below capacity, otherwise the unpinned frame with the
    /// oldest stamp. The returned frame is detached from its old page and
    /// latched for `trx`.
    fn claim_frame(&self, state: &mut PoolState, trx: TrxId) -> Result<Arc<Frame>> {
        #[cfg(test)]
        if crate::buffer::failpoint::trip() {
            return Err(StorageError::NoSpace);
        }

        if state.frames.len() < self.capacity {
            let frame = Arc::new(Frame::new(state.frames.len()));
            frame.meta.lock().latch(trx);
            state.frames.push(Arc::clone(&frame));
            return Ok(frame);
        }

        // Frames whose metadata is busy right now are simply skipped.
        let candidates: Vec<(usize, u64)> = state
            .frames
            .iter()
            .filter_map(|frame| {
                let meta = frame.meta.try_lock()?;
                (meta.pin_count == 0).then_some((frame.index, meta.last_used))
            })
            .collect();

        let index = pick_victim(candidates).ok_or(StorageError::NoSpace)?;
        let frame = Arc::clone(&state.frames[index]);
        let mut meta = frame.meta.lock();

        if let Some((table, page)) = meta.tag {
            if meta.dirty {
                let store = state.store(table)?;
                store.write_page(page, &frame.data.lock())?;
                meta.dirty = false;
            }
            state.page_table.remove(&(table, page));
            tracing::debug!(table, page = %page, frame = index, "evicted page");
        }

        meta.abandon();
        meta.latch(trx);
        drop(meta);
        Ok(frame)
    }

    /// Install a claimed frame as the cache entry for `(table, page)`
    fn install(
        &self,
        state: &mut PoolState,
        frame: &Arc<Frame>,
        table: TableId,
        page: PageId,
        contents: PageBuf,
        dirty: bool,
    ) {
        *frame.data.lock() = contents;
        let mut meta = frame.meta.lock();
        meta.tag = Some((table, page));
        meta.dirty = dirty;
        meta.last_used = state.clock.now();
        state.page_table.insert((table, page), frame.index);
    }

    fn release_claim(frame: &Frame) {
        frame.meta.lock().abandon();
        frame.released.notify_all();
    }

    fn pin(&self, frame: &Frame) {
        let mut meta = frame.meta.lock();
        debug_assert!(meta.pin_count > 0, "pinning through a dead handle");
        meta.pin_count += 1;
    }

    fn unpin(&self, frame: &Frame) {
        let mut state = self.state.lock();
        let stamp = state.clock.tick();
        let mut meta = frame.meta.lock();

        debug_assert!(meta.pin_count > 0, "unbalanced unpin");
        meta.pin_count = meta.pin_count.saturating_sub(1);
        meta.last_used = stamp;
        if meta.pin_count > 0 {
            return;
        }

        meta.owner = None;
        if meta.delete_waited {
            if let Some((table, page)) = meta.tag {
                state.page_table.remove(&(table, page));
                meta.abandon();
                match state.store(table).and_then(|store| store.deallocate_page(page)) {
                    Ok(()) => tracing::debug!(table, page = %page, "released deleted page"),
                    Err(e) => {
                        tracing::error!(table, page = %page, error = %e, "failed to free page")
                    }
                }
            }
        }
        frame.released.notify_all();
    }
}

impl BufferPool for BufferPoolImpl {
    fn open_table(&self, path: &Path) -> Result<TableId> {
        // Held across the file open: two stores on one file would each hand
        // out the same free pages.
        let _opening = self.opening.lock();
        if let Some(&table) = self.state.lock().paths.get(path) {
            return Ok(table);
        }

        let store = Arc::new(DiskManagerImpl::open(
            path,
            self.options.sync_on_write,
            self.options.initial_pages,
        )?);
        let table = self.attach_table(store);
        tracing::info!(table, path = %path.display(), "opened table");
        Ok(table)
    }

    fn get_page(&self, table: TableId, page: PageId, trx: TrxId) -> Result<PageHandle<'_>> {
        loop {
            let mut state = self.state.lock();

            if let Some(&index) = state.page_table.get(&(table, page)) {
                let frame = Arc::clone(&state.frames[index]);
                let mut meta = frame.meta.lock();
                if meta.latch_available_to(trx) {
                    meta.latch(trx);
                    drop(meta);
                    tracing::trace!(table, page = %page, trx, "pinned cached page");
                    return Ok(PageHandle::new(self, frame, table, page));
                }

                // Another transaction holds the latch. Wait for it to let go,
                // then resolve again: the frame may hold another page by then.
                drop(state);
                while !meta.latch_available_to(trx) {
                    frame.released.wait(&mut meta);
                }
                continue;
            }

            let store = state.store(table)?;
            let frame = self.claim_frame(&mut state, trx)?;
            let contents = match store.read_page(page) {
                Ok(contents) => contents,
                Err(e) => {
                    Self::release_claim(&frame);
                    return Err(e);
                }
            };
            self.install(&mut state, &frame, table, page, contents, false);
            tracing::trace!(table, page = %page, trx, frame = frame.index, "loaded page");
            return Ok(PageHandle::new(self, frame, table, page));
        }
    }

    fn get_new_page(
        &self,
        table: TableId,
        trx: TrxId,
        page_type: PageType,
    ) -> Result<PageHandle<'_>> {
        let mut state = self.state.lock();
        let store = state.store(table)?;
        let frame = self.claim_frame(&mut state, trx)?;

        let page = match store.allocate_page() {
            Ok(page) => page,
            Err(e) => {
                Self::release_claim(&frame);
                return Err(e);
            }
        };

        let contents = match page_type {
            PageType::Leaf => LeafPage::new().into_buf(),
            PageType::Internal => InternalPage::new().into_buf(),
            PageType::Header | PageType::Free => PageBuf::new(),
        };
        self.install(&mut state, &frame, table, page, contents, true);
        tracing::debug!(table, page = %page, kind = ?page_type, "allocated page");
        Ok(PageHandle::new(self, frame, table, page))
    }

    fn flush_all(&self) -> Result<()> {
        let state = self.state.lock();
        for frame in &state.frames {
            let mut meta = frame.meta.lock();
            if let (Some((table, page)), true) = (meta.tag, meta.dirty) {
                state.store(table)?.write_page(page, &frame.data.lock())?;
                meta.dirty = false;
            }
        }
        for store in state.tables.values() {
            store.sync()?;
        }
        Ok(())
    }

    fn close_all(&self) -> Result<()> {
        if !self.all_unpinned() {
            return Err(StorageError::invalid_operation(
                "cannot close buffer pool while pages are pinned",
            ));
        }
        self.flush_all()?;

        let mut state = self.state.lock();
        state.frames.clear();
        state.page_table.clear();
        state.tables.clear();
        state.paths.clear();
        tracing::info!("closed buffer pool");
        Ok(())
    }

    fn root_page(&self, table: TableId) -> Result<PageId> {
        let store = self.state.lock().store(table)?;
        Ok(store.header().root_page)
    }

    fn set_root_page(&self, table: TableId, page: PageId) -> Result<()> {
        let store = self.state.lock().store(table)?;
        store.set_root_page(page)
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        let mut stats = PoolStats {
            capacity: self.capacity,
            tables: state.tables.len(),
            ..PoolStats::default()
        };
        for frame in &state.frames {
            let meta = frame.meta.lock();
            if meta.tag.is_some() {
                stats.resident += 1;
            }
            if meta.pin_count > 0 {
                stats.pinned += 1;
            }
            if meta.dirty {
                stats.dirty += 1;
            }
        }
        stats
    }
}

/// A pinned page.
///
/// Cloning pins the page again; dropping unpins exactly once. While any
/// handle is alive the frame stays latched by the transaction that fetched
/// it.
pub struct PageHandle<'a> {
    pool: &'a BufferPoolImpl,
    frame: Arc<Frame>,
    table: TableId,
    page: PageId,
}

impl<'a> PageHandle<'a> {
    fn new(pool: &'a BufferPoolImpl, frame: Arc<Frame>, table: TableId, page: PageId) -> Self {
        Self {
            pool,
            frame,
            table,
            page,
        }
    }

    /// Get the page ID
    pub fn page_id(&self) -> PageId {
        self.page
    }

    /// Copy of the page contents
    pub fn read(&self) -> PageBuf {
        self.frame.data.lock().clone()
    }

    /// Replace the page contents and mark the frame dirty
    pub fn write(&self, contents: &PageBuf) {
        *self.frame.data.lock() = contents.clone();
        self.frame.meta.lock().dirty = true;
    }

    /// Copy of `len` bytes starting at `offset`
    pub fn read_bytes(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        check_range(self.page, offset, len)?;
        Ok(self.frame.data.lock()[offset..offset + len].to_vec())
    }

    /// Overwrite bytes in place and mark the frame dirty
    pub fn write_bytes(&self, offset: usize, bytes: &[u8]) -> Result<()> {
        check_range(self.page, offset, bytes.len())?;
        self.frame.data.lock()[offset..offset + bytes.len()].copy_from_slice(bytes);
        self.frame.meta.lock().dirty = true;
        Ok(())
    }

    /// Free the page once its last pin is dropped
    pub fn mark_for_deletion(&self) {
        self.frame.meta.lock().delete_waited = true;
        tracing::trace!(table = self.table, page = %self.page, "page marked for deletion");
    }
}

fn check_range(page: PageId, offset: usize, len: usize) -> Result<()> {
    if offset + len > PAGE_SIZE {
        return Err(StorageError::invalid_page(
            page,
            format!("byte range {}..{} outside page", offset, offset + len),
        ));
    }
    Ok(())
}

impl Clone for PageHandle<'_> {
    fn clone(&self) -> Self {
        self.pool.pin(&self.frame);
        Self {
            pool: self.pool,
            frame: Arc::clone(&self.frame),
            table: self.table,
            page: self.page,
        }
    }
}

impl Drop for PageHandle<'_> {
    fn drop(&mut self) {
        self.pool.unpin(&self.frame);
    }
}

impl std::fmt::Debug for PageHandle<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageHandle")
            .field("table", &self.table)
            .field("page", &self.page)
            .finish()
    }
}

//! Undo journal for structural tree changes.
//!
//! A split or merge touches several pages. Each page's image is captured
//! right before the operation first writes it, and pages the operation
//! allocates are remembered. If any step fails, `rollback` writes every
//! captured image back and frees the allocated pages, so the page set is
//! byte-for-byte what it was before the attempt.

use std::collections::HashSet;

use crate::buffer::{BufferPool, BufferPoolImpl, PageHandle};
use crate::error::Result;
use crate::page::PageBuf;
use crate::types::{PageId, TableId, TrxId};

#[derive(Debug, Default)]
pub(crate) struct Journal {
    before: Vec<(PageId, PageBuf)>,
    touched: HashSet<PageId>,
    allocated: Vec<PageId>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture the page's current image unless it was already captured or
    /// was created by this operation
    pub fn capture(&mut self, handle: &PageHandle<'_>) {
        if self.touched.insert(handle.page_id()) {
            self.before.push((handle.page_id(), handle.read()));
        }
    }

    pub fn allocated(&mut self, page: PageId) {
        self.touched.insert(page);
        self.allocated.push(page);
    }

    pub fn is_empty(&self) -> bool {
        self.before.is_empty() && self.allocated.is_empty()
    }

    /// Restore captured images (newest first) and free allocated pages.
    ///
    /// Must be called after every handle taken by the failed operation has
    /// been dropped, so the restore has frames to work with.
    pub fn rollback(self, pool: &BufferPoolImpl, table: TableId, trx: TrxId) -> Result<()> {
        for (page, image) in self.before.into_iter().rev() {
            pool.get_page(table, page, trx)?.write(&image);
        }
        // Reverse order puts each page back on the free list where it was.
        for page in self.allocated.into_iter().rev() {
            pool.get_page(table, page, trx)?.mark_for_deletion();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::StoreOptions;
    use crate::types::PageType;
    use tempfile::tempdir;

    #[test]
    fn test_rollback_restores_first_image() -> Result<()> {
        let dir = tempdir().unwrap();
        let pool = BufferPoolImpl::new(
            8,
            StoreOptions {
                sync_on_write: false,
                initial_pages: 16,
            },
        );
        let table = pool.open_table(&dir.path().join("t.db"))?;

        let page = {
            let handle = pool.get_new_page(table, 1, PageType::Free)?;
            handle.write_bytes(0, b"original")?;
            handle.page_id()
        };

        let mut journal = Journal::new();
        let fresh = {
            let handle = pool.get_page(table, page, 1)?;
            journal.capture(&handle);
            handle.write_bytes(0, b"changed!")?;
            journal.capture(&handle);
            handle.write_bytes(0, b"again!!!")?;

            let fresh = pool.get_new_page(table, 1, PageType::Leaf)?;
            journal.allocated(fresh.page_id());
            fresh.page_id()
        };

        journal.rollback(&pool, table, 1)?;

        let handle = pool.get_page(table, page, 1)?;
        assert_eq!(handle.read_bytes(0, 8)?, b"original".to_vec());
        drop(handle);

        // The allocated page went back on the free list.
        let reused = pool.get_new_page(table, 1, PageType::Leaf)?;
        assert_eq!(reused.page_id(), fresh);
        Ok(())
    }
}

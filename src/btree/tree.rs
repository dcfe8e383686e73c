//! B+ tree core: page access, search and in-place value updates.
//!
//! Insertion lives in `insert.rs`, deletion in `delete.rs`. Every page the
//! tree touches goes through the buffer pool; the tree never talks to a
//! disk manager.

use crate::btree::cursor::RangeCursor;
use crate::btree::journal::Journal;
use crate::buffer::{BufferPool, BufferPoolImpl, PageHandle};
use crate::error::{Result, StorageError};
use crate::page::{InternalPage, LeafPage, NodeHeader, PageBuf, Record};
use crate::types::{PageId, PageType, TableId, TrxId, LEAF_CAPACITY, LEAF_SLOT_SIZE, NODE_HEADER_SIZE};
use serde::Serialize;

/// A tree page decoded by its leaf flag
#[derive(Debug, Clone)]
pub enum Node {
    Leaf(LeafPage),
    Internal(InternalPage),
}

impl Node {
    pub fn from_buf(buf: PageBuf) -> Self {
        match NodeHeader::read(&buf).page_type() {
            PageType::Leaf => Node::Leaf(LeafPage::from_buf(buf)),
            _ => Node::Internal(InternalPage::from_buf(buf)),
        }
    }

    pub fn parent(&self) -> PageId {
        match self {
            Node::Leaf(leaf) => leaf.parent(),
            Node::Internal(node) => node.parent(),
        }
    }

    pub fn num_keys(&self) -> usize {
        match self {
            Node::Leaf(leaf) => leaf.num_keys(),
            Node::Internal(node) => node.num_keys(),
        }
    }

    pub fn is_underfull(&self) -> bool {
        match self {
            Node::Leaf(leaf) => leaf.is_underfull(),
            Node::Internal(node) => node.is_underfull(),
        }
    }

    pub fn as_buf(&self) -> &PageBuf {
        match self {
            Node::Leaf(leaf) => leaf.as_buf(),
            Node::Internal(node) => node.as_buf(),
        }
    }
}

/// Result of a point lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup {
    /// Leaf that covers the key (`PageId::NONE` for an empty tree)
    pub leaf: PageId,
    pub value: Option<Vec<u8>>,
}

/// Where an overwritten value lives and what it held before
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overwrite {
    pub page: PageId,
    pub offset: u16,
    pub before: Vec<u8>,
    pub stored_size: u16,
}

/// Shape of a tree as reported by `verify`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TreeSummary {
    pub height: usize,
    pub leaves: usize,
    pub internals: usize,
    pub records: usize,
}

/// Operations on one table's B+ tree, performed on behalf of one owner
/// (a transaction id, or `NON_TRANSACTIONAL`).
pub struct BTree<'a> {
    pub(crate) pool: &'a BufferPoolImpl,
    pub(crate) table: TableId,
    pub(crate) trx: TrxId,
}

impl<'a> BTree<'a> {
    pub fn new(pool: &'a BufferPoolImpl, table: TableId, trx: TrxId) -> Self {
        Self { pool, table, trx }
    }

    /// Current root page (`PageId::NONE` for an empty tree)
    pub fn root(&self) -> Result<PageId> {
        self.pool.root_page(self.table)
    }

    pub(crate) fn fetch(&self, page: PageId) -> Result<PageHandle<'a>> {
        if !page.is_some() {
            return Err(StorageError::corruption(format!(
                "table {}: dangling page pointer",
                self.table
            )));
        }
        self.pool.get_page(self.table, page, self.trx)
    }

    /// Write a page image, capturing the previous image in the journal
    pub(crate) fn write(&self, journal: &mut Journal, handle: &PageHandle<'_>, buf: &PageBuf) {
        journal.capture(handle);
        handle.write(buf);
    }

    pub(crate) fn set_parent(
        &self,
        journal: &mut Journal,
        page: PageId,
        parent: PageId,
    ) -> Result<()> {
        let handle = self.fetch(page)?;
        let mut buf = handle.read();
        NodeHeader::set_parent(&mut buf, parent);
        self.write(journal, &handle, &buf);
        Ok(())
    }

    /// Persist a root change, or undo the structural change when the
    /// operation failed.
    pub(crate) fn finish(
        &self,
        journal: Journal,
        old_root: PageId,
        outcome: Result<PageId>,
    ) -> Result<()> {
        let outcome = outcome.and_then(|new_root| {
            if new_root != old_root {
                self.pool.set_root_page(self.table, new_root)?;
                tracing::debug!(table = self.table, root = %new_root, "root changed");
            }
            Ok(())
        });

        if let Err(e) = &outcome {
            if !journal.is_empty() {
                tracing::warn!(table = self.table, error = %e, "rolling back structural change");
                if let Err(undo) = journal.rollback(self.pool, self.table, self.trx) {
                    tracing::error!(
                        table = self.table,
                        error = %undo,
                        "structural rollback incomplete"
                    );
                }
            }
        }
        outcome
    }

    /// Descend from `root` to the leaf covering `key`.
    ///
    /// The child is pinned before the parent is released.
    pub fn find_leaf(&self, root: PageId, key: i64) -> Result<Option<PageHandle<'a>>> {
        if !root.is_some() {
            return Ok(None);
        }

        let mut handle = self.fetch(root)?;
        loop {
            let buf = handle.read();
            if NodeHeader::read(&buf).is_leaf {
                return Ok(Some(handle));
            }
            let child = InternalPage::from_buf(buf).find_child(key);
            handle = self.fetch(child)?;
        }
    }

    /// Point lookup; also reports which leaf covers the key
    pub fn find_record(&self, key: i64) -> Result<Lookup> {
        let root = self.root()?;
        match self.find_leaf(root, key)? {
            None => Ok(Lookup {
                leaf: PageId::NONE,
                value: None,
            }),
            Some(handle) => {
                let leaf = LeafPage::from_buf(handle.read());
                Ok(Lookup {
                    leaf: handle.page_id(),
                    value: leaf.get(key).map(<[u8]>::to_vec),
                })
            }
        }
    }

    /// Overwrite the leading bytes of a stored value in place.
    ///
    /// Returns `Ok(None)` when `expected_leaf` is given and the key is no
    /// longer covered by that leaf. `log` sees the prior bytes before the
    /// page is modified.
    pub fn overwrite_value<F>(
        &self,
        key: i64,
        value: &[u8],
        expected_leaf: Option<PageId>,
        log: F,
    ) -> Result<Option<Overwrite>>
    where
        F: FnOnce(&Overwrite) -> Result<()>,
    {
        let root = self.root()?;
        let handle = self
            .find_leaf(root, key)?
            .ok_or(StorageError::KeyNotFound(key))?;
        if expected_leaf.is_some_and(|leaf| leaf != handle.page_id()) {
            return Ok(None);
        }

        let leaf = LeafPage::from_buf(handle.read());
        let index = leaf.search(key).map_err(|_| StorageError::KeyNotFound(key))?;
        let slot = leaf.slot(index);
        if value.len() > slot.size as usize {
            return Err(StorageError::ValueTooLarge {
                size: value.len(),
                max: slot.size as usize,
            });
        }

        let overwrite = Overwrite {
            page: handle.page_id(),
            offset: slot.offset,
            before: leaf.value(index)[..value.len()].to_vec(),
            stored_size: slot.size,
        };
        log(&overwrite)?;
        handle.write_bytes(slot.offset as usize, value)?;
        Ok(Some(overwrite))
    }

    /// Records with keys in `begin..=end`, in key order
    pub fn scan(&self, begin: i64, end: i64) -> Result<Vec<Record>> {
        RangeCursor::new(self, begin, end)?.collect()
    }

    /// Decode one page of this tree
    pub fn node(&self, page: PageId) -> Result<Node> {
        Ok(Node::from_buf(self.fetch(page)?.read()))
    }

    /// Number of levels (0 for an empty tree)
    pub fn height(&self) -> Result<usize> {
        let mut page = self.root()?;
        let mut height = 0;
        while page.is_some() {
            height += 1;
            page = match self.node(page)? {
                Node::Leaf(_) => PageId::NONE,
                Node::Internal(node) => node.child(0),
            };
        }
        Ok(height)
    }

    /// Walk the whole tree checking ordering, separator ranges, parent
    /// pointers, free-space accounting and the leaf sibling chain.
    pub fn verify(&self) -> Result<TreeSummary> {
        let root = self.root()?;
        let mut summary = TreeSummary::default();
        if !root.is_some() {
            return Ok(summary);
        }

        let mut leaves = Vec::new();
        let height = self.verify_node(
            root,
            PageId::NONE,
            i64::MIN,
            None,
            &mut summary,
            &mut leaves,
        )?;
        summary.height = height;

        for pair in leaves.windows(2) {
            let leaf = LeafPage::from_buf(self.fetch(pair[0])?.read());
            if leaf.right_sibling() != pair[1] {
                return Err(self.broken(pair[0], "sibling chain skips a leaf"));
            }
        }
        if let Some(last) = leaves.last() {
            let leaf = LeafPage::from_buf(self.fetch(*last)?.read());
            if leaf.right_sibling().is_some() {
                return Err(self.broken(*last, "rightmost leaf has a sibling"));
            }
        }
        Ok(summary)
    }

    fn verify_node(
        &self,
        page: PageId,
        parent: PageId,
        low: i64,
        high: Option<i64>,
        summary: &mut TreeSummary,
        leaves: &mut Vec<PageId>,
    ) -> Result<usize> {
        let node = self.node(page)?;
        if node.parent() != parent {
            return Err(self.broken(page, "parent pointer mismatch"));
        }
        let in_range = |k: i64| k >= low && high.map_or(true, |h| k < h);

        match node {
            Node::Leaf(leaf) => {
                let keys: Vec<i64> = (0..leaf.num_keys()).map(|i| leaf.key(i)).collect();
                if keys.windows(2).any(|w| w[0] >= w[1]) || !keys.iter().all(|k| in_range(*k)) {
                    return Err(self.broken(page, "leaf keys out of order or range"));
                }

                let slots_end = NODE_HEADER_SIZE + keys.len() * LEAF_SLOT_SIZE;
                let values: usize = (0..keys.len()).map(|i| leaf.slot(i).size as usize).sum();
                let values_start = (0..keys.len())
                    .map(|i| leaf.slot(i).offset as usize)
                    .min()
                    .unwrap_or(crate::types::PAGE_SIZE);
                if leaf.free_space() != values_start - slots_end
                    || leaf.used_bytes() != keys.len() * LEAF_SLOT_SIZE + values
                    || leaf.used_bytes() > LEAF_CAPACITY
                {
                    return Err(self.broken(page, "free space accounting is off"));
                }

                summary.leaves += 1;
                summary.records += keys.len();
                leaves.push(page);
                Ok(1)
            }
            Node::Internal(node) => {
                let keys = node.keys();
                if keys.is_empty()
                    || keys.windows(2).any(|w| w[0] >= w[1])
                    || !keys.iter().all(|k| in_range(*k))
                {
                    return Err(self.broken(page, "internal keys out of order or range"));
                }
                summary.internals += 1;

                let mut depth = None;
                for (i, child) in node.children().into_iter().enumerate() {
                    let child_low = if i == 0 { low } else { keys[i - 1] };
                    let child_high = if i < keys.len() { Some(keys[i]) } else { high };
                    let d =
                        self.verify_node(child, page, child_low, child_high, summary, leaves)?;
                    if depth.is_some_and(|seen| seen != d) {
                        return Err(self.broken(page, "leaves at different depths"));
                    }
                    depth = Some(d);
                }
                Ok(depth.unwrap_or(0) + 1)
            }
        }
    }

    fn broken(&self, page: PageId, what: &str) -> StorageError {
        StorageError::corruption(format!("table {} page {}: {}", self.table, page, what))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::buffer::{failpoint, StoreOptions};
    use crate::types::NON_TRANSACTIONAL;
    use tempfile::TempDir;

    pub(crate) fn create_test_pool(frames: usize) -> Result<(BufferPoolImpl, TableId, TempDir)> {
        create_test_pool_with_pages(frames, 64)
    }

    pub(crate) fn create_test_pool_with_pages(
        frames: usize,
        initial_pages: u64,
    ) -> Result<(BufferPoolImpl, TableId, TempDir)> {
        let dir = tempfile::tempdir().unwrap();
        let pool = BufferPoolImpl::new(
            frames,
            StoreOptions {
                sync_on_write: false,
                initial_pages,
            },
        );
        let table = pool.open_table(&dir.path().join("test.db"))?;
        Ok((pool, table, dir))
    }

    /// Root plus the images of pages `1..pages`
    fn snapshot(
        pool: &BufferPoolImpl,
        table: TableId,
        pages: u64,
    ) -> Result<(PageId, Vec<Vec<u8>>)> {
        let images = (1..pages)
            .map(|page| {
                pool.get_page(table, PageId::new(page), NON_TRANSACTIONAL)
                    .map(|handle| handle.read().as_bytes().to_vec())
            })
            .collect::<Result<_>>()?;
        Ok((pool.root_page(table)?, images))
    }

    /// Run `op` with the first frame claim failing, then the second, and so
    /// on until it succeeds. Each failed run must leave the root and pages
    /// `1..pages` byte-for-byte as they were. Returns the number of failed
    /// runs.
    pub(crate) fn fail_at_every_claim<F>(
        pool: &BufferPoolImpl,
        table: TableId,
        pages: u64,
        mut op: F,
    ) -> Result<usize>
    where
        F: FnMut() -> Result<()>,
    {
        let before = snapshot(pool, table, pages)?;
        let mut claims = 0;
        loop {
            failpoint::fail_claim_after(claims);
            let outcome = op();
            failpoint::disarm();
            match outcome {
                Ok(()) => return Ok(claims),
                Err(e) => {
                    assert!(e.is_no_space(), "claim {}: {}", claims, e);
                    assert!(pool.all_unpinned(), "claim {}: pin leaked", claims);
                    assert!(
                        snapshot(pool, table, pages)? == before,
                        "claim {}: pages changed",
                        claims
                    );
                }
            }
            claims += 1;
        }
    }

    pub(crate) fn value_for(key: i64) -> Vec<u8> {
        format!("value-{:06}-{}", key, "x".repeat((key.unsigned_abs() % 40) as usize)).into_bytes()
    }

    #[test]
    fn test_empty_tree() -> Result<()> {
        let (pool, table, _dir) = create_test_pool(16)?;
        let tree = BTree::new(&pool, table, NON_TRANSACTIONAL);

        assert_eq!(tree.root()?, PageId::NONE);
        assert!(tree.find_leaf(PageId::NONE, 5)?.is_none());
        assert_eq!(tree.find_record(5)?.value, None);
        assert_eq!(tree.height()?, 0);
        assert!(tree.scan(i64::MIN, i64::MAX)?.is_empty());
        assert_eq!(tree.verify()?, TreeSummary::default());
        Ok(())
    }

    #[test]
    fn test_overwrite_value_in_place() -> Result<()> {
        let (pool, table, _dir) = create_test_pool(16)?;
        let tree = BTree::new(&pool, table, NON_TRANSACTIONAL);
        tree.insert(1, b"hello world")?;

        let mut logged = None;
        let done = tree
            .overwrite_value(1, b"HELLO", None, |o| {
                logged = Some(o.clone());
                Ok(())
            })?
            .unwrap();
        assert_eq!(done.before, b"hello".to_vec());
        assert_eq!(done.stored_size, 11);
        assert_eq!(logged, Some(done));
        assert_eq!(tree.find_record(1)?.value, Some(b"HELLO world".to_vec()));

        assert!(matches!(
            tree.overwrite_value(1, &[0u8; 12], None, |_| Ok(())),
            Err(StorageError::ValueTooLarge { .. })
        ));
        assert!(matches!(
            tree.overwrite_value(2, b"x", None, |_| Ok(())),
            Err(StorageError::KeyNotFound(2))
        ));
        assert_eq!(
            tree.overwrite_value(1, b"x", Some(PageId::new(999)), |_| Ok(()))?,
            None
        );
        Ok(())
    }

    #[test]
    fn test_height_grows_with_splits() -> Result<()> {
        let (pool, table, _dir) = create_test_pool(64)?;
        let tree = BTree::new(&pool, table, NON_TRANSACTIONAL);

        tree.insert(0, &value_for(0))?;
        assert_eq!(tree.height()?, 1);

        for key in 1..400 {
            tree.insert(key, &value_for(key))?;
        }
        assert_eq!(tree.height()?, 2);
        let summary = tree.verify()?;
        assert_eq!(summary.records, 400);
        assert!(summary.leaves > 1);
        Ok(())
    }
}

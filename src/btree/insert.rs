//! Insertion with leaf and internal splits.

use crate::btree::journal::Journal;
use crate::btree::tree::BTree;
use crate::buffer::{BufferPool, PageHandle};
use crate::error::{Result, StorageError};
use crate::page::{InternalPage, LeafPage, Record};
use crate::types::{PageId, PageType, LEAF_SLOT_SIZE, LEAF_SPLIT_THRESHOLD, MAX_VALUE_SIZE};

/// Split position for an internal page holding `n` keys after insertion
fn cut(n: usize) -> usize {
    if n % 2 == 0 {
        n / 2
    } else {
        n / 2 + 1
    }
}

/// Index of the first record moving to the new right leaf: records are
/// accumulated from the left while the running size stays under half a page.
fn leaf_split_point(records: &[Record]) -> usize {
    let mut used = 0;
    let mut split = 0;
    while split < records.len() && used < LEAF_SPLIT_THRESHOLD {
        used += LEAF_SLOT_SIZE + records[split].value.len();
        split += 1;
    }
    split.clamp(1, records.len() - 1)
}

impl<'a> BTree<'a> {
    /// Insert a new record. The key must not be present yet.
    pub fn insert(&self, key: i64, value: &[u8]) -> Result<()> {
        if value.len() > MAX_VALUE_SIZE {
            return Err(StorageError::ValueTooLarge {
                size: value.len(),
                max: MAX_VALUE_SIZE,
            });
        }

        let root = self.root()?;
        let mut journal = Journal::new();
        let outcome = self.insert_record(&mut journal, root, key, value);
        self.finish(journal, root, outcome)
    }

    fn insert_record(
        &self,
        journal: &mut Journal,
        root: PageId,
        key: i64,
        value: &[u8],
    ) -> Result<PageId> {
        let Some(handle) = self.find_leaf(root, key)? else {
            return self.start_new_tree(journal, key, value);
        };

        let mut leaf = LeafPage::from_buf(handle.read());
        if leaf.search(key).is_ok() {
            return Err(StorageError::DuplicateKey(key));
        }
        if leaf.insert(key, value) {
            self.write(journal, &handle, leaf.as_buf());
            return Ok(root);
        }
        self.split_leaf(journal, root, handle, key, value)
    }

    fn start_new_tree(&self, journal: &mut Journal, key: i64, value: &[u8]) -> Result<PageId> {
        let handle = self.pool.get_new_page(self.table, self.trx, PageType::Leaf)?;
        journal.allocated(handle.page_id());

        let mut leaf = LeafPage::new();
        leaf.insert(key, value);
        handle.write(leaf.as_buf());
        tracing::debug!(table = self.table, root = %handle.page_id(), "started new tree");
        Ok(handle.page_id())
    }

    fn split_leaf(
        &self,
        journal: &mut Journal,
        root: PageId,
        left: PageHandle<'a>,
        key: i64,
        value: &[u8],
    ) -> Result<PageId> {
        let right = self.pool.get_new_page(self.table, self.trx, PageType::Leaf)?;
        journal.allocated(right.page_id());

        let mut left_page = LeafPage::from_buf(left.read());
        let mut records = left_page.records();
        let pos = records.partition_point(|r| r.key < key);
        records.insert(pos, Record::new(key, value));
        let split = leaf_split_point(&records);

        let parent = left_page.parent();
        let mut right_page = LeafPage::new();
        right_page.set_parent(parent);
        right_page.set_right_sibling(left_page.right_sibling());
        left_page.set_right_sibling(right.page_id());

        if !left_page.rebuild(&records[..split]) || !right_page.rebuild(&records[split..]) {
            return Err(StorageError::invalid_page(
                left.page_id(),
                "split halves do not fit in a leaf",
            ));
        }

        self.write(journal, &left, left_page.as_buf());
        right.write(right_page.as_buf());
        tracing::trace!(
            table = self.table,
            left = %left.page_id(),
            right = %right.page_id(),
            "split leaf"
        );

        let separator = records[split].key;
        let (left_id, right_id) = (left.page_id(), right.page_id());
        drop(left);
        drop(right);
        self.insert_into_parent(journal, root, left_id, parent, separator, right_id)
    }

    fn insert_into_parent(
        &self,
        journal: &mut Journal,
        root: PageId,
        left: PageId,
        parent: PageId,
        key: i64,
        right: PageId,
    ) -> Result<PageId> {
        if !parent.is_some() {
            return self.insert_into_new_root(journal, left, key, right);
        }

        let handle = self.fetch(parent)?;
        let mut node = InternalPage::from_buf(handle.read());
        if node.insert(key, right) {
            self.write(journal, &handle, node.as_buf());
            return Ok(root);
        }
        self.split_internal(journal, root, handle, key, right)
    }

    fn insert_into_new_root(
        &self,
        journal: &mut Journal,
        left: PageId,
        key: i64,
        right: PageId,
    ) -> Result<PageId> {
        let handle = self.pool.get_new_page(self.table, self.trx, PageType::Internal)?;
        let root = handle.page_id();
        journal.allocated(root);

        let mut node = InternalPage::new();
        node.set_entries(&[key], &[left, right]);
        handle.write(node.as_buf());
        drop(handle);

        self.set_parent(journal, left, root)?;
        self.set_parent(journal, right, root)?;
        tracing::debug!(table = self.table, root = %root, "grew new root");
        Ok(root)
    }

    fn split_internal(
        &self,
        journal: &mut Journal,
        root: PageId,
        left: PageHandle<'a>,
        key: i64,
        right_child: PageId,
    ) -> Result<PageId> {
        let right = self.pool.get_new_page(self.table, self.trx, PageType::Internal)?;
        journal.allocated(right.page_id());

        let mut left_page = InternalPage::from_buf(left.read());
        let mut keys = left_page.keys();
        let mut children = left_page.children();
        let pos = left_page.child_index_for(key);
        keys.insert(pos, key);
        children.insert(pos + 1, right_child);

        let split = cut(keys.len()) - 1;
        let promoted = keys[split];
        let parent = left_page.parent();

        let mut right_page = InternalPage::new();
        right_page.set_parent(parent);
        right_page.set_entries(&keys[split + 1..], &children[split + 1..]);
        left_page.set_entries(&keys[..split], &children[..=split]);

        self.write(journal, &left, left_page.as_buf());
        right.write(right_page.as_buf());

        let (left_id, right_id) = (left.page_id(), right.page_id());
        drop(left);
        drop(right);
        tracing::trace!(table = self.table, left = %left_id, right = %right_id, "split internal");

        // Children handed to the new page must point back at it.
        for child in &children[split + 1..] {
            self.set_parent(journal, *child, right_id)?;
        }
        self.insert_into_parent(journal, root, left_id, parent, promoted, right_id)
    }
}

//! Deletion with coalescing and redistribution.
//!
//! An underfull page is merged with a neighbor when the pair fits in one
//! page, otherwise it borrows entries from that neighbor. The neighbor is
//! the left sibling under the same parent, or the right one when the page
//! is its parent's leftmost child. Pages dropped from the tree are freed
//! only after the whole operation has succeeded.

use crate::btree::journal::Journal;
use crate::btree::tree::{BTree, Node};
use crate::error::{Result, StorageError};
use crate::page::{InternalPage, LeafPage};
use crate::types::{PageId, INTERNAL_MAX_KEYS};

/// Where an underfull page sits relative to the neighbor it works with
struct Neighborhood {
    parent: PageId,
    neighbor: PageId,
    /// Index of the parent key separating the page and its neighbor
    key_index: usize,
    k_prime: i64,
    /// The page is its parent's leftmost child, so the neighbor is on its right
    leftmost: bool,
}

impl<'a> BTree<'a> {
    /// Remove a record
    pub fn delete(&self, key: i64) -> Result<()> {
        let root = self.root()?;
        let leaf = match self.find_leaf(root, key)? {
            Some(handle) => handle,
            None => return Err(StorageError::KeyNotFound(key)),
        };
        if LeafPage::from_buf(leaf.read()).search(key).is_err() {
            return Err(StorageError::KeyNotFound(key));
        }
        let leaf_id = leaf.page_id();
        drop(leaf);

        let mut journal = Journal::new();
        let mut released = Vec::new();
        let outcome = self.delete_entry(
            &mut journal,
            &mut released,
            root,
            leaf_id,
            key,
            PageId::NONE,
        );
        self.finish(journal, root, outcome)?;

        for page in released {
            if let Err(e) = self.fetch(page).map(|handle| handle.mark_for_deletion()) {
                tracing::warn!(table = self.table, page = %page, error = %e, "leaking page");
            }
        }
        Ok(())
    }

    /// Remove `key` from `page` (and, for internal pages, the pointer to
    /// `child`), then rebalance upwards. Returns the resulting root.
    fn delete_entry(
        &self,
        journal: &mut Journal,
        released: &mut Vec<PageId>,
        root: PageId,
        page: PageId,
        key: i64,
        child: PageId,
    ) -> Result<PageId> {
        let handle = self.fetch(page)?;
        let node = match Node::from_buf(handle.read()) {
            Node::Leaf(mut leaf) => {
                leaf.remove(key).ok_or(StorageError::KeyNotFound(key))?;
                Node::Leaf(leaf)
            }
            Node::Internal(mut node) => {
                if !node.remove(key, child) {
                    return Err(self.lost_entry(page, "separator or child pointer"));
                }
                Node::Internal(node)
            }
        };
        self.write(journal, &handle, node.as_buf());
        drop(handle);

        if page == root {
            return self.adjust_root(journal, released, root, node);
        }
        if !node.is_underfull() {
            return Ok(root);
        }

        let around = self.neighborhood(page, node.parent())?;
        let neighbor = self.node(around.neighbor)?;
        match (node, neighbor) {
            (Node::Leaf(n), Node::Leaf(nb)) => {
                if n.used_bytes() <= nb.free_space() {
                    self.coalesce_leaves(journal, released, root, page, &around)
                } else {
                    self.redistribute_leaves(journal, page, &around)?;
                    Ok(root)
                }
            }
            (Node::Internal(n), Node::Internal(nb)) => {
                if n.num_keys() + nb.num_keys() < INTERNAL_MAX_KEYS {
                    self.coalesce_internals(journal, released, root, page, &around)
                } else {
                    self.redistribute_internals(journal, page, &around)?;
                    Ok(root)
                }
            }
            _ => Err(StorageError::corruption(format!(
                "table {}: pages {} and {} on one level differ in kind",
                self.table, page, around.neighbor
            ))),
        }
    }

    fn adjust_root(
        &self,
        journal: &mut Journal,
        released: &mut Vec<PageId>,
        root: PageId,
        node: Node,
    ) -> Result<PageId> {
        if node.num_keys() > 0 {
            return Ok(root);
        }
        released.push(root);
        match node {
            Node::Internal(node) => {
                let new_root = node.child(0);
                self.set_parent(journal, new_root, PageId::NONE)?;
                tracing::debug!(table = self.table, root = %new_root, "collapsed root");
                Ok(new_root)
            }
            Node::Leaf(_) => {
                tracing::debug!(table = self.table, "tree is now empty");
                Ok(PageId::NONE)
            }
        }
    }

    fn neighborhood(&self, page: PageId, parent: PageId) -> Result<Neighborhood> {
        let node = InternalPage::from_buf(self.fetch(parent)?.read());
        let index = node
            .index_of_child(page)
            .ok_or_else(|| self.lost_entry(parent, "child pointer"))?;
        let (neighbor, key_index, leftmost) = if index == 0 {
            (node.child(1), 0, true)
        } else {
            (node.child(index - 1), index - 1, false)
        };
        Ok(Neighborhood {
            parent,
            neighbor,
            key_index,
            k_prime: node.key(key_index),
            leftmost,
        })
    }

    /// (left, right) in key order
    fn pair(page: PageId, around: &Neighborhood) -> (PageId, PageId) {
        if around.leftmost {
            (page, around.neighbor)
        } else {
            (around.neighbor, page)
        }
    }

    fn coalesce_leaves(
        &self,
        journal: &mut Journal,
        released: &mut Vec<PageId>,
        root: PageId,
        page: PageId,
        around: &Neighborhood,
    ) -> Result<PageId> {
        let (left_id, right_id) = Self::pair(page, around);
        {
            let left = self.fetch(left_id)?;
            let right = self.fetch(right_id)?;
            let mut merged = LeafPage::from_buf(left.read());
            let absorbed = LeafPage::from_buf(right.read());
            for record in absorbed.records() {
                if !merged.insert(record.key, &record.value) {
                    return Err(StorageError::invalid_page(left_id, "merged leaf overflows"));
                }
            }
            merged.set_right_sibling(absorbed.right_sibling());
            self.write(journal, &left, merged.as_buf());
        }
        tracing::trace!(table = self.table, left = %left_id, right = %right_id, "merged leaves");

        let root = self.delete_entry(
            journal,
            released,
            root,
            around.parent,
            around.k_prime,
            right_id,
        )?;
        released.push(right_id);
        Ok(root)
    }

    fn coalesce_internals(
        &self,
        journal: &mut Journal,
        released: &mut Vec<PageId>,
        root: PageId,
        page: PageId,
        around: &Neighborhood,
    ) -> Result<PageId> {
        let (left_id, right_id) = Self::pair(page, around);
        let adopted = {
            let left = self.fetch(left_id)?;
            let right = self.fetch(right_id)?;
            let mut merged = InternalPage::from_buf(left.read());
            let absorbed = InternalPage::from_buf(right.read());

            let mut keys = merged.keys();
            keys.push(around.k_prime);
            keys.extend(absorbed.keys());
            let mut children = merged.children();
            let adopted = absorbed.children();
            children.extend(adopted.iter().copied());

            merged.set_entries(&keys, &children);
            self.write(journal, &left, merged.as_buf());
            adopted
        };
        for child in adopted {
            self.set_parent(journal, child, left_id)?;
        }
        tracing::trace!(table = self.table, left = %left_id, right = %right_id, "merged internals");

        let root = self.delete_entry(
            journal,
            released,
            root,
            around.parent,
            around.k_prime,
            right_id,
        )?;
        released.push(right_id);
        Ok(root)
    }

    /// Move records from the neighbor until the page is no longer underfull
    /// or the neighbor is down to one record
    fn redistribute_leaves(
        &self,
        journal: &mut Journal,
        page: PageId,
        around: &Neighborhood,
    ) -> Result<()> {
        let separator = {
            let handle = self.fetch(page)?;
            let other = self.fetch(around.neighbor)?;
            let mut n = LeafPage::from_buf(handle.read());
            let mut nb = LeafPage::from_buf(other.read());

            while n.is_underfull() && nb.num_keys() > 1 {
                let from = if around.leftmost { 0 } else { nb.num_keys() - 1 };
                let key = nb.key(from);
                let Some(record) = nb.remove(key) else {
                    break;
                };
                if !n.insert(record.key, &record.value) {
                    return Err(StorageError::invalid_page(page, "borrowed record overflows"));
                }
            }

            self.write(journal, &handle, n.as_buf());
            self.write(journal, &other, nb.as_buf());
            if around.leftmost {
                nb.key(0)
            } else {
                n.key(0)
            }
        };

        self.set_separator(journal, around, separator)
    }

    /// Pull one child across from the neighbor, rotating keys through the parent
    fn redistribute_internals(
        &self,
        journal: &mut Journal,
        page: PageId,
        around: &Neighborhood,
    ) -> Result<()> {
        let (moved, separator) = {
            let handle = self.fetch(page)?;
            let other = self.fetch(around.neighbor)?;
            let mut n = InternalPage::from_buf(handle.read());
            let mut nb = InternalPage::from_buf(other.read());

            let mut keys = n.keys();
            let mut children = n.children();
            let mut nb_keys = nb.keys();
            let mut nb_children = nb.children();

            let (moved, separator) = if around.leftmost {
                let separator = nb_keys.remove(0);
                let moved = nb_children.remove(0);
                keys.push(around.k_prime);
                children.push(moved);
                (moved, separator)
            } else {
                let (Some(separator), Some(moved)) = (nb_keys.pop(), nb_children.pop()) else {
                    return Err(self.lost_entry(around.neighbor, "last entry"));
                };
                keys.insert(0, around.k_prime);
                children.insert(0, moved);
                (moved, separator)
            };

            n.set_entries(&keys, &children);
            nb.set_entries(&nb_keys, &nb_children);
            self.write(journal, &handle, n.as_buf());
            self.write(journal, &other, nb.as_buf());
            (moved, separator)
        };

        self.set_parent(journal, moved, page)?;
        self.set_separator(journal, around, separator)
    }

    fn set_separator(&self, journal: &mut Journal, around: &Neighborhood, key: i64) -> Result<()> {
        let handle = self.fetch(around.parent)?;
        let mut parent = InternalPage::from_buf(handle.read());
        parent.set_key(around.key_index, key);
        self.write(journal, &handle, parent.as_buf());
        Ok(())
    }

    fn lost_entry(&self, page: PageId, what: &str) -> StorageError {
        StorageError::corruption(format!(
            "table {} page {}: {} not found",
            self.table, page, what
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::tree::tests::{create_test_pool, fail_at_every_claim, value_for};
    use crate::types::NON_TRANSACTIONAL;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    #[test]
    fn test_delete_missing() -> Result<()> {
        let (pool, table, _dir) = create_test_pool(16)?;
        let tree = BTree::new(&pool, table, NON_TRANSACTIONAL);

        assert!(matches!(tree.delete(1), Err(StorageError::KeyNotFound(1))));
        tree.insert(1, b"one")?;
        assert!(matches!(tree.delete(2), Err(StorageError::KeyNotFound(2))));
        tree.delete(1)?;
        assert!(matches!(tree.delete(1), Err(StorageError::KeyNotFound(1))));
        Ok(())
    }

    #[test]
    fn test_delete_everything_in_reverse() -> Result<()> {
        let (pool, table, _dir) = create_test_pool(64)?;
        let tree = BTree::new(&pool, table, NON_TRANSACTIONAL);
        for key in 0..5000 {
            tree.insert(key, &value_for(key))?;
        }
        assert!(tree.height()? >= 2);

        for key in (0..5000).rev() {
            tree.delete(key)?;
            if key % 500 == 0 {
                assert_eq!(tree.verify()?.records, key as usize);
            }
        }
        assert_eq!(tree.root()?, PageId::NONE);
        assert_eq!(tree.height()?, 0);
        assert!(pool.all_unpinned());

        // Freed pages are handed out again.
        tree.insert(7, b"again")?;
        assert_eq!(tree.find_record(7)?.value, Some(b"again".to_vec()));
        Ok(())
    }

    #[test]
    fn test_delete_half() -> Result<()> {
        let (pool, table, _dir) = create_test_pool(64)?;
        let tree = BTree::new(&pool, table, NON_TRANSACTIONAL);
        for key in -3000..3000 {
            tree.insert(key, &value_for(key))?;
        }
        for key in (-3000..3000).filter(|k| k % 2 == 0) {
            tree.delete(key)?;
        }

        assert_eq!(tree.verify()?.records, 3000);
        for key in -3000..3000 {
            let expected = (key % 2 != 0).then(|| value_for(key));
            assert_eq!(tree.find_record(key)?.value, expected);
        }
        Ok(())
    }

    #[test]
    fn test_delete_random_order() -> Result<()> {
        let (pool, table, _dir) = create_test_pool(64)?;
        let tree = BTree::new(&pool, table, NON_TRANSACTIONAL);

        let mut rng = StdRng::seed_from_u64(42);
        let mut keys: Vec<i64> = (0..8000).collect();
        keys.shuffle(&mut rng);
        for key in &keys {
            tree.insert(*key, &value_for(*key))?;
        }
        keys.shuffle(&mut rng);
        for (i, key) in keys.iter().enumerate() {
            tree.delete(*key)?;
            if i % 1000 == 999 {
                tree.verify()?;
            }
        }
        assert_eq!(tree.root()?, PageId::NONE);
        Ok(())
    }

    #[test]
    fn test_failed_rebalance_leaves_pages_untouched() -> Result<()> {
        let (pool, table, _dir) = create_test_pool(4)?;
        let tree = BTree::new(&pool, table, NON_TRANSACTIONAL);
        for key in 0..120 {
            tree.insert(key, &vec![(key % 251) as u8; 500])?;
        }
        assert_eq!(tree.height()?, 2);

        // Random order mixes merges, borrows and the final root collapses.
        let mut keys: Vec<i64> = (0..120).collect();
        keys.shuffle(&mut StdRng::seed_from_u64(7));
        let mut failed = 0;
        for (i, key) in keys.iter().enumerate() {
            failed += fail_at_every_claim(&pool, table, 64, || tree.delete(*key))?;
            assert_eq!(tree.find_record(*key)?.value, None);
            assert_eq!(tree.verify()?.records, 119 - i);
        }
        assert!(failed > 0);
        assert_eq!(tree.root()?, PageId::NONE);
        Ok(())
    }

    #[test]
    fn test_wide_values_rebalance() -> Result<()> {
        let (pool, table, _dir) = create_test_pool(32)?;
        let tree = BTree::new(&pool, table, NON_TRANSACTIONAL);
        // Few records per leaf, so leaves split and merge often.
        for key in 0..400 {
            tree.insert(key, &vec![(key % 251) as u8; 300 + (key as usize % 7) * 100])?;
        }
        for key in (0..400).step_by(3) {
            tree.delete(key)?;
        }
        for key in (1..400).step_by(3) {
            tree.delete(key)?;
        }

        let summary = tree.verify()?;
        assert_eq!(summary.records, 133);
        let left: Vec<i64> = tree.scan(i64::MIN, i64::MAX)?.iter().map(|r| r.key).collect();
        let expected: Vec<i64> = (2..400).step_by(3).collect();
        assert_eq!(left, expected);
        Ok(())
    }
}

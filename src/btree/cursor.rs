//! Range cursor over the leaf level.
//!
//! The cursor descends once to the leaf covering the lower bound, then
//! follows right-sibling pointers. The next leaf is pinned before the
//! current one is released, so a concurrent walker never sees a gap.

use crate::btree::tree::BTree;
use crate::buffer::PageHandle;
use crate::error::Result;
use crate::page::{LeafPage, Record};

/// Iterator over records with keys in `begin..=end`
pub struct RangeCursor<'t, 'a> {
    tree: &'t BTree<'a>,
    current: Option<(PageHandle<'a>, LeafPage)>,
    index: usize,
    end: i64,
}

impl<'t, 'a> RangeCursor<'t, 'a> {
    pub fn new(tree: &'t BTree<'a>, begin: i64, end: i64) -> Result<Self> {
        let mut cursor = Self {
            tree,
            current: None,
            index: 0,
            end,
        };
        if begin > end {
            return Ok(cursor);
        }

        let root = tree.root()?;
        if let Some(handle) = tree.find_leaf(root, begin)? {
            let leaf = LeafPage::from_buf(handle.read());
            cursor.index = leaf.lower_bound(begin);
            cursor.current = Some((handle, leaf));
        }
        Ok(cursor)
    }

    fn advance(&mut self) -> Result<Option<Record>> {
        loop {
            let Some((_, leaf)) = &self.current else {
                return Ok(None);
            };

            if self.index < leaf.num_keys() {
                if leaf.key(self.index) > self.end {
                    self.current = None;
                    return Ok(None);
                }
                let record = leaf.record(self.index);
                self.index += 1;
                return Ok(Some(record));
            }

            let sibling = leaf.right_sibling();
            if !sibling.is_some() {
                self.current = None;
                return Ok(None);
            }
            let next = self.tree.fetch(sibling)?;
            let leaf = LeafPage::from_buf(next.read());
            // Assigning drops the previous handle only after `next` is pinned.
            self.current = Some((next, leaf));
            self.index = 0;
        }
    }
}

impl Iterator for RangeCursor<'_, '_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.advance() {
            Ok(record) => record.map(Ok),
            Err(e) => {
                self.current = None;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::tree::tests::{create_test_pool, value_for};
    use crate::types::NON_TRANSACTIONAL;

    #[test]
    fn test_cursor_crosses_leaves() -> Result<()> {
        let (pool, table, _dir) = create_test_pool(32)?;
        let tree = BTree::new(&pool, table, NON_TRANSACTIONAL);
        for key in (0..600).map(|k| k * 2) {
            tree.insert(key, &value_for(key))?;
        }
        assert!(tree.height()? >= 2);

        let keys: Vec<i64> = RangeCursor::new(&tree, 101, 899)?
            .map(|r| r.map(|record| record.key))
            .collect::<Result<_>>()?;
        let expected: Vec<i64> = (51..450).map(|k| k * 2).collect();
        assert_eq!(keys, expected);

        let first = RangeCursor::new(&tree, 0, 0)?.next().transpose()?;
        assert_eq!(first, Some(Record::new(0, value_for(0))));
        Ok(())
    }

    #[test]
    fn test_cursor_empty_ranges() -> Result<()> {
        let (pool, table, _dir) = create_test_pool(16)?;
        let tree = BTree::new(&pool, table, NON_TRANSACTIONAL);
        for key in 0..10 {
            tree.insert(key, b"v")?;
        }

        assert_eq!(RangeCursor::new(&tree, 5, 4)?.count(), 0);
        assert_eq!(RangeCursor::new(&tree, 100, 200)?.count(), 0);
        assert_eq!(RangeCursor::new(&tree, -20, -1)?.count(), 0);
        assert_eq!(RangeCursor::new(&tree, i64::MIN, i64::MAX)?.count(), 10);
        drop(tree);
        assert!(pool.all_unpinned());
        Ok(())
    }
}

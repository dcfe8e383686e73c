//! Internal page view.
//!
//! Layout after the common header:
//! ```text
//! Offset      Size  Description
//! 120         8     child 0
//! 128 + 16i   8     key i
//! 136 + 16i   8     child i+1
//! ```
//!
//! Child 0 covers keys below key 0; child i+1 covers keys from key i up to
//! (but excluding) key i+1.

use crate::page::{NodeHeader, PageBuf};
use crate::types::{PageId, PageType, INTERNAL_ENTRY_SIZE, INTERNAL_MAX_KEYS, INTERNAL_MIN_KEYS};

const CHILD0_OFFSET: usize = 120;
const KEYS_OFFSET: usize = 128;

/// Typed view over an internal page image
#[derive(Debug, Clone)]
pub struct InternalPage {
    data: PageBuf,
}

impl InternalPage {
    pub fn new() -> Self {
        let mut data = PageBuf::new();
        NodeHeader::new(PageType::Internal).write(&mut data);
        Self { data }
    }

    /// Wrap an existing page image; the caller has checked the leaf flag
    pub fn from_buf(data: PageBuf) -> Self {
        Self { data }
    }

    pub fn into_buf(self) -> PageBuf {
        self.data
    }

    pub fn as_buf(&self) -> &PageBuf {
        &self.data
    }

    fn header(&self) -> NodeHeader {
        NodeHeader::read(&self.data)
    }

    pub fn parent(&self) -> PageId {
        self.header().parent
    }

    pub fn set_parent(&mut self, parent: PageId) {
        NodeHeader::set_parent(&mut self.data, parent);
    }

    pub fn num_keys(&self) -> usize {
        self.header().num_keys as usize
    }

    fn set_num_keys(&mut self, n: usize) {
        let mut header = self.header();
        header.num_keys = n as u32;
        header.write(&mut self.data);
    }

    pub fn is_full(&self) -> bool {
        self.num_keys() >= INTERNAL_MAX_KEYS
    }

    pub fn is_underfull(&self) -> bool {
        self.num_keys() < INTERNAL_MIN_KEYS
    }

    pub fn key(&self, index: usize) -> i64 {
        self.data.get_i64(KEYS_OFFSET + index * INTERNAL_ENTRY_SIZE)
    }

    pub fn set_key(&mut self, index: usize, key: i64) {
        self.data
            .put_i64(KEYS_OFFSET + index * INTERNAL_ENTRY_SIZE, key);
    }

    pub fn child(&self, index: usize) -> PageId {
        PageId::new(self.data.get_u64(CHILD0_OFFSET + index * INTERNAL_ENTRY_SIZE))
    }

    pub fn set_child(&mut self, index: usize, child: PageId) {
        self.data
            .put_u64(CHILD0_OFFSET + index * INTERNAL_ENTRY_SIZE, child.value());
    }

    pub fn keys(&self) -> Vec<i64> {
        (0..self.num_keys()).map(|i| self.key(i)).collect()
    }

    pub fn children(&self) -> Vec<PageId> {
        (0..=self.num_keys()).map(|i| self.child(i)).collect()
    }

    /// Child index covering `key`
    pub fn child_index_for(&self, key: i64) -> usize {
        let (mut lo, mut hi) = (0, self.num_keys());
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.key(mid) <= key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// Child page covering `key`
    pub fn find_child(&self, key: i64) -> PageId {
        self.child(self.child_index_for(key))
    }

    /// Position of `child` among this page's child pointers
    pub fn index_of_child(&self, child: PageId) -> Option<usize> {
        (0..=self.num_keys()).find(|&i| self.child(i) == child)
    }

    /// Replace all entries: `children` must hold one more pointer than `keys`
    pub fn set_entries(&mut self, keys: &[i64], children: &[PageId]) {
        debug_assert_eq!(keys.len() + 1, children.len());
        debug_assert!(keys.len() <= INTERNAL_MAX_KEYS);
        for (i, child) in children.iter().enumerate() {
            self.set_child(i, *child);
        }
        for (i, key) in keys.iter().enumerate() {
            self.set_key(i, *key);
        }
        self.set_num_keys(keys.len());
    }

    /// Insert a separator and the child to its right. Returns false when the
    /// page is already full.
    pub fn insert(&mut self, key: i64, right: PageId) -> bool {
        if self.is_full() {
            return false;
        }
        let mut keys = self.keys();
        let mut children = self.children();
        let pos = self.child_index_for(key);
        keys.insert(pos, key);
        children.insert(pos + 1, right);
        self.set_entries(&keys, &children);
        true
    }

    /// Remove a separator key and a child pointer. Each is located by value.
    pub fn remove(&mut self, key: i64, child: PageId) -> bool {
        let mut keys = self.keys();
        let mut children = self.children();
        let key_pos = keys.iter().position(|k| *k == key);
        let child_pos = children.iter().position(|c| *c == child);
        match (key_pos, child_pos) {
            (Some(k), Some(c)) => {
                keys.remove(k);
                children.remove(c);
                self.set_entries(&keys, &children);
                true
            }
            _ => false,
        }
    }
}

impl Default for InternalPage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> InternalPage {
        let mut page = InternalPage::new();
        page.set_entries(
            &[10, 20, 30],
            &[PageId::new(1), PageId::new(2), PageId::new(3), PageId::new(4)],
        );
        page
    }

    #[test]
    fn test_layout_offsets() {
        let page = sample();
        let buf = page.as_buf();
        assert_eq!(buf.get_u64(120), 1);
        assert_eq!(buf.get_i64(128), 10);
        assert_eq!(buf.get_u64(136), 2);
        assert_eq!(buf.get_i64(160), 30);
        assert_eq!(buf.get_u64(168), 4);
        assert!(!NodeHeader::read(buf).is_leaf);
    }

    #[test]
    fn test_find_child_routing() {
        let page = sample();
        assert_eq!(page.find_child(-100), PageId::new(1));
        assert_eq!(page.find_child(9), PageId::new(1));
        assert_eq!(page.find_child(10), PageId::new(2));
        assert_eq!(page.find_child(19), PageId::new(2));
        assert_eq!(page.find_child(20), PageId::new(3));
        assert_eq!(page.find_child(30), PageId::new(4));
        assert_eq!(page.find_child(i64::MAX), PageId::new(4));
    }

    #[test]
    fn test_insert_places_right_child_after_key() {
        let mut page = sample();
        assert!(page.insert(25, PageId::new(9)));
        assert_eq!(page.keys(), vec![10, 20, 25, 30]);
        assert_eq!(
            page.children(),
            vec![PageId::new(1), PageId::new(2), PageId::new(3), PageId::new(9), PageId::new(4)]
        );
        assert_eq!(page.index_of_child(PageId::new(9)), Some(3));
    }

    #[test]
    fn test_insert_rejects_when_full() {
        let mut page = InternalPage::new();
        page.set_child(0, PageId::new(1));
        for i in 0..INTERNAL_MAX_KEYS {
            assert!(page.insert(i as i64, PageId::new(i as u64 + 2)));
        }
        assert!(page.is_full());
        assert!(!page.insert(-1, PageId::new(999)));
    }

    #[test]
    fn test_remove_key_and_child() {
        let mut page = sample();
        assert!(page.remove(20, PageId::new(3)));
        assert_eq!(page.keys(), vec![10, 30]);
        assert_eq!(page.children(), vec![PageId::new(1), PageId::new(2), PageId::new(4)]);
        assert!(!page.remove(20, PageId::new(3)));
    }
}

//! Leaf page view.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ parent | leaf=1 | num_keys | ... | free space | sibling  │ 0..128
//! ├──────────────────────────────────────────────────────────┤
//! │ [slot0][slot1][slot2]...  →                              │ 128..
//! ├──────────────────────────────────────────────────────────┤
//! │                     free space                           │
//! ├──────────────────────────────────────────────────────────┤
//! │                  ←  [value2][value0][value1]             │ ..4096
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Slots are sorted by key. Values are appended at the low end of the value
//! region, so their order has nothing to do with slot order.

use crate::page::{NodeHeader, PageBuf, Record, Slot};
use crate::types::{
    PageId, PageType, LEAF_CAPACITY, LEAF_SLOT_SIZE, LEAF_UNDERFLOW_FREE, NODE_HEADER_SIZE,
};

const FREE_SPACE_OFFSET: usize = 112;
const SIBLING_OFFSET: usize = 120;

/// Typed view over a leaf page image
#[derive(Debug, Clone)]
pub struct LeafPage {
    data: PageBuf,
}

impl LeafPage {
    /// Create a new empty leaf page
    pub fn new() -> Self {
        let mut data = PageBuf::new();
        NodeHeader::new(PageType::Leaf).write(&mut data);
        data.put_u64(FREE_SPACE_OFFSET, LEAF_CAPACITY as u64);
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

    /// Bytes between the end of the slot array and the start of the values
    pub fn free_space(&self) -> usize {
        self.data.get_u64(FREE_SPACE_OFFSET) as usize
    }

    fn set_free_space(&mut self, free: usize) {
        self.data.put_u64(FREE_SPACE_OFFSET, free as u64);
    }

    /// Bytes taken by slots and values
    pub fn used_bytes(&self) -> usize {
        LEAF_CAPACITY - self.free_space()
    }

    pub fn is_underfull(&self) -> bool {
        self.free_space() >= LEAF_UNDERFLOW_FREE
    }

    pub fn right_sibling(&self) -> PageId {
        PageId::new(self.data.get_u64(SIBLING_OFFSET))
    }

    pub fn set_right_sibling(&mut self, sibling: PageId) {
        self.data.put_u64(SIBLING_OFFSET, sibling.value());
    }

    fn slot_offset(index: usize) -> usize {
        NODE_HEADER_SIZE + index * LEAF_SLOT_SIZE
    }

    pub fn slot(&self, index: usize) -> Slot {
        Slot::read(&self.data, Self::slot_offset(index))
    }

    pub fn key(&self, index: usize) -> i64 {
        self.data.get_i64(Self::slot_offset(index))
    }

    pub fn value(&self, index: usize) -> &[u8] {
        &self.data[self.slot(index).value_range()]
    }

    pub fn record(&self, index: usize) -> Record {
        Record::new(self.key(index), self.value(index))
    }

    /// All records in key order
    pub fn records(&self) -> Vec<Record> {
        (0..self.num_keys()).map(|i| self.record(i)).collect()
    }

    /// Binary search the slot array: `Ok(index)` on a hit, `Err(insert_position)` otherwise
    pub fn search(&self, key: i64) -> Result<usize, usize> {
        let (mut lo, mut hi) = (0, self.num_keys());
        while lo < hi {
            let mid = (lo + hi) / 2;
            match self.key(mid).cmp(&key) {
                std::cmp::Ordering::Equal => return Ok(mid),
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
            }
        }
        Err(lo)
    }

    pub fn get(&self, key: i64) -> Option<&[u8]> {
        self.search(key).ok().map(|i| self.value(i))
    }

    /// Index of the first slot with a key not less than `key`
    pub fn lower_bound(&self, key: i64) -> usize {
        match self.search(key) {
            Ok(i) | Err(i) => i,
        }
    }

    pub fn can_fit(&self, value_len: usize) -> bool {
        self.free_space() >= LEAF_SLOT_SIZE + value_len
    }

    /// Insert a record keeping slots sorted. Returns false when the page lacks
    /// room for the slot plus the value, leaving the page untouched.
    ///
    /// The key must not already be present.
    pub fn insert(&mut self, key: i64, value: &[u8]) -> bool {
        if !self.can_fit(value.len()) {
            return false;
        }

        let n = self.num_keys();
        let free = self.free_space();
        let pos = self.lower_bound(key);
        debug_assert!(pos == n || self.key(pos) != key);

        let values_start = Self::slot_offset(n) + free;
        let offset = values_start - value.len();
        self.data[offset..values_start].copy_from_slice(value);

        let from = Self::slot_offset(pos);
        let to = Self::slot_offset(n);
        self.data.copy_within(from..to, from + LEAF_SLOT_SIZE);

        Slot {
            key,
            size: value.len() as u16,
            offset: offset as u16,
        }
        .write(&mut self.data, from);

        self.set_num_keys(n + 1);
        self.set_free_space(free - LEAF_SLOT_SIZE - value.len());
        true
    }

    /// Remove a record, compacting the value region. Returns the removed
    /// record, or `None` when the key is absent.
    pub fn remove(&mut self, key: i64) -> Option<Record> {
        let index = self.search(key).ok()?;
        let removed = self.record(index);
        let slot = self.slot(index);
        let n = self.num_keys();
        let free = self.free_space();
        let size = slot.size as usize;

        // Slide every value stored below the removed one up by its size.
        let values_start = Self::slot_offset(n) + free;
        let hole = slot.offset as usize;
        self.data
            .copy_within(values_start..hole, values_start + size);

        let from = Self::slot_offset(index + 1);
        let to = Self::slot_offset(n);
        self.data.copy_within(from..to, from - LEAF_SLOT_SIZE);

        for i in 0..n - 1 {
            let mut other = self.slot(i);
            if (other.offset as usize) < hole {
                other.offset += slot.size;
                other.write(&mut self.data, Self::slot_offset(i));
            }
        }

        self.set_num_keys(n - 1);
        self.set_free_space(free + LEAF_SLOT_SIZE + size);
        Some(removed)
    }

    /// Drop every record, keeping parent and sibling pointers
    pub fn clear(&mut self) {
        let parent = self.parent();
        let sibling = self.right_sibling();
        *self = Self::new();
        self.set_parent(parent);
        self.set_right_sibling(sibling);
    }

    /// Replace the contents with `records`, which must be sorted and fit
    pub fn rebuild(&mut self, records: &[Record]) -> bool {
        self.clear();
        records.iter().all(|r| self.insert(r.key, &r.value))
    }
}

impl Default for LeafPage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value_for(key: i64, len: usize) -> Vec<u8> {
        vec![(key.rem_euclid(251)) as u8; len]
    }

    #[test]
    fn test_new_leaf_page() {
        let page = LeafPage::new();
        assert_eq!(page.num_keys(), 0);
        assert_eq!(page.free_space(), LEAF_CAPACITY);
        assert_eq!(page.right_sibling(), PageId::NONE);
        assert!(NodeHeader::read(page.as_buf()).is_leaf);
    }

    #[test]
    fn test_insert_keeps_slots_sorted() {
        let mut page = LeafPage::new();
        for key in [30, 10, 20, -5] {
            assert!(page.insert(key, &value_for(key, 8)));
        }

        let keys: Vec<i64> = (0..page.num_keys()).map(|i| page.key(i)).collect();
        assert_eq!(keys, vec![-5, 10, 20, 30]);
        assert_eq!(page.get(20), Some(&value_for(20, 8)[..]));
        assert_eq!(page.get(21), None);
        assert_eq!(page.free_space(), LEAF_CAPACITY - 4 * (LEAF_SLOT_SIZE + 8));
    }

    #[test]
    fn test_first_value_lands_at_page_end() {
        let mut page = LeafPage::new();
        page.insert(1, b"abc");
        let slot = page.slot(0);
        assert_eq!(slot.offset as usize, crate::types::PAGE_SIZE - 3);
        assert_eq!(slot.size, 3);
    }

    #[test]
    fn test_insert_rejects_when_full() {
        let mut page = LeafPage::new();
        let mut key = 0;
        while page.insert(key, &[7u8; 100]) {
            key += 1;
        }
        assert_eq!(key as usize, LEAF_CAPACITY / (LEAF_SLOT_SIZE + 100));

        let before = page.as_buf().clone();
        assert!(!page.insert(10_000, &[1u8; 100]));
        assert_eq!(page.as_buf(), &before);
    }

    #[test]
    fn test_remove_compacts_values() {
        let mut page = LeafPage::new();
        for key in 0..10 {
            page.insert(key, &value_for(key, 5 + key as usize));
        }

        let removed = page.remove(4).unwrap();
        assert_eq!(removed.value, value_for(4, 9));
        assert!(page.remove(4).is_none());

        assert_eq!(page.num_keys(), 9);
        for key in (0..10).filter(|k| *k != 4) {
            assert_eq!(page.get(key), Some(&value_for(key, 5 + key as usize)[..]));
        }

        // Free space must equal the physical gap between slots and values.
        let lowest_value = (0..page.num_keys())
            .map(|i| page.slot(i).offset as usize)
            .min()
            .unwrap();
        let slots_end = NODE_HEADER_SIZE + page.num_keys() * LEAF_SLOT_SIZE;
        assert_eq!(page.free_space(), lowest_value - slots_end);
    }

    #[test]
    fn test_remove_all_restores_capacity() {
        let mut page = LeafPage::new();
        for key in 0..20 {
            page.insert(key, &value_for(key, 30));
        }
        for key in (0..20).rev() {
            page.remove(key);
        }
        assert_eq!(page.num_keys(), 0);
        assert_eq!(page.free_space(), LEAF_CAPACITY);
        assert!(page.is_underfull());
    }

    #[test]
    fn test_rebuild_keeps_links() {
        let mut page = LeafPage::new();
        page.set_parent(PageId::new(3));
        page.set_right_sibling(PageId::new(8));
        page.insert(1, b"one");

        let records = vec![Record::new(5, b"five".to_vec()), Record::new(6, b"six".to_vec())];
        assert!(page.rebuild(&records));

        assert_eq!(page.records(), records);
        assert_eq!(page.parent(), PageId::new(3));
        assert_eq!(page.right_sibling(), PageId::new(8));
    }
}

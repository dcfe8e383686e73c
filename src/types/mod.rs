//! Common types and layout constants used throughout the storage engine.

mod page_id;

pub use page_id::PageId;

/// Page size in bytes (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Bytes reserved at the front of every tree page for its header fields
pub const NODE_HEADER_SIZE: usize = 128;

/// Size of one leaf slot: key (i64) + value size (u16) + value offset (u16)
pub const LEAF_SLOT_SIZE: usize = 12;

/// Bytes available to slots and values in an empty leaf
pub const LEAF_CAPACITY: usize = PAGE_SIZE - NODE_HEADER_SIZE;

/// A splitting leaf keeps records on the left until this many bytes are used
pub const LEAF_SPLIT_THRESHOLD: usize = LEAF_CAPACITY / 2;

/// A non-root leaf with at least this much free space is underfull
pub const LEAF_UNDERFLOW_FREE: usize = 2500;

/// Size of one internal entry: key (i64) + right child (u64)
pub const INTERNAL_ENTRY_SIZE: usize = 16;

/// Maximum keys in an internal page
pub const INTERNAL_MAX_KEYS: usize = LEAF_CAPACITY / INTERNAL_ENTRY_SIZE;

/// A non-root internal page with fewer keys than this is underfull
pub const INTERNAL_MIN_KEYS: usize = INTERNAL_MAX_KEYS / 2;

/// Largest value that still guarantees both halves of a leaf split fit
pub const MAX_VALUE_SIZE: usize = LEAF_SPLIT_THRESHOLD - LEAF_SLOT_SIZE;

/// Pages in a freshly created table file (10 MiB)
pub const DEFAULT_INITIAL_PAGES: u64 = 2560;

/// Handle returned by `open_table`
pub type TableId = u32;

/// Transaction identifier; ids handed out by `begin` start at 1
pub type TrxId = u64;

/// Owner id used for page accesses that do not belong to a transaction
pub const NON_TRANSACTIONAL: TrxId = 0;

/// Page kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    /// Page 0 of a table file
    Header,
    /// Unallocated page on the free list
    Free,
    /// Tree node holding records
    Leaf,
    /// Tree node holding separator keys and child pointers
    Internal,
}

impl PageType {
    /// Check if this is a leaf page type
    pub fn is_leaf(self) -> bool {
        matches!(self, Self::Leaf)
    }

    /// Tree node kind from the on-page leaf flag
    pub fn from_leaf_flag(flag: u32) -> Self {
        if flag != 0 {
            Self::Leaf
        } else {
            Self::Internal
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_constants() {
        assert_eq!(LEAF_CAPACITY, 3968);
        assert_eq!(LEAF_SPLIT_THRESHOLD, 1984);
        assert_eq!(INTERNAL_MAX_KEYS, 248);
        assert_eq!(INTERNAL_MIN_KEYS, 124);
        assert!(2 * (MAX_VALUE_SIZE + LEAF_SLOT_SIZE) <= LEAF_CAPACITY);
    }

    #[test]
    fn test_page_type_from_flag() {
        assert_eq!(PageType::from_leaf_flag(1), PageType::Leaf);
        assert_eq!(PageType::from_leaf_flag(0), PageType::Internal);
        assert!(PageType::Leaf.is_leaf());
        assert!(!PageType::Internal.is_leaf());
    }
}

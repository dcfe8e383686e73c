//! Header fields shared by leaf and internal pages.

use crate::page::PageBuf;
use crate::types::{PageId, PageType};

const PARENT_OFFSET: usize = 0;
const IS_LEAF_OFFSET: usize = 8;
const NUM_KEYS_OFFSET: usize = 12;

/// Common tree page header
///
/// Layout:
/// ```text
/// Offset  Size  Description
/// 0       8     Parent page number (0 for the root)
/// 8       4     Leaf flag (1 = leaf, 0 = internal)
/// 12      4     Number of keys
/// ```
///
/// Bytes 16..128 hold kind-specific fields; see `LeafPage` and `InternalPage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHeader {
    pub parent: PageId,
    pub is_leaf: bool,
    pub num_keys: u32,
}

impl NodeHeader {
    pub fn new(page_type: PageType) -> Self {
        Self {
            parent: PageId::NONE,
            is_leaf: page_type.is_leaf(),
            num_keys: 0,
        }
    }

    pub fn read(buf: &PageBuf) -> Self {
        Self {
            parent: PageId::new(buf.get_u64(PARENT_OFFSET)),
            is_leaf: buf.get_u32(IS_LEAF_OFFSET) != 0,
            num_keys: buf.get_u32(NUM_KEYS_OFFSET),
        }
    }

    pub fn write(&self, buf: &mut PageBuf) {
        buf.put_u64(PARENT_OFFSET, self.parent.value());
        buf.put_u32(IS_LEAF_OFFSET, u32::from(self.is_leaf));
        buf.put_u32(NUM_KEYS_OFFSET, self.num_keys);
    }

    pub fn page_type(&self) -> PageType {
        PageType::from_leaf_flag(u32::from(self.is_leaf))
    }

    /// Rewrite only the parent pointer of a page image
    pub fn set_parent(buf: &mut PageBuf, parent: PageId) {
        buf.put_u64(PARENT_OFFSET, parent.value());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let header = NodeHeader {
            parent: PageId::new(77),
            is_leaf: true,
            num_keys: 5,
        };

        let mut buf = PageBuf::new();
        header.write(&mut buf);

        assert_eq!(buf.get_u64(0), 77);
        assert_eq!(buf.get_u32(8), 1);
        assert_eq!(buf.get_u32(12), 5);
        assert_eq!(NodeHeader::read(&buf), header);
    }

    #[test]
    fn test_set_parent_keeps_other_fields() {
        let mut buf = PageBuf::new();
        NodeHeader::new(PageType::Internal).write(&mut buf);
        NodeHeader::set_parent(&mut buf, PageId::new(9));

        let header = NodeHeader::read(&buf);
        assert_eq!(header.parent, PageId::new(9));
        assert_eq!(header.page_type(), PageType::Internal);
    }
}

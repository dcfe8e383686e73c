//! Page number type.

use std::fmt;

/// Page number within one table file.
///
/// Page 0 holds the file header, so the value 0 doubles as the null pointer
/// in parent, sibling, root and free-list fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PageId(pub u64);

impl PageId {
    /// Null page pointer
    pub const NONE: PageId = PageId(0);

    /// Page number of the file header
    pub const HEADER: PageId = PageId(0);

    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn value(self) -> u64 {
        self.0
    }

    /// False for the null pointer
    pub const fn is_some(self) -> bool {
        self.0 != 0
    }

    /// Calculate the byte offset of this page in the file
    pub const fn file_offset(self, page_size: usize) -> u64 {
        self.0 * page_size as u64
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for PageId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<PageId> for u64 {
    fn from(id: PageId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PAGE_SIZE;

    #[test]
    fn test_null_pointer() {
        assert!(!PageId::NONE.is_some());
        assert!(PageId::new(7).is_some());
        assert_eq!(PageId::NONE, PageId::HEADER);
    }

    #[test]
    fn test_page_id_file_offset() {
        let id = PageId::new(3);
        assert_eq!(id.file_offset(PAGE_SIZE), 3 * PAGE_SIZE as u64);
    }
}

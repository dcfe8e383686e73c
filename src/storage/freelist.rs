//! On-disk free list.
//!
//! A free page stores only the number of the next free page in its first
//! eight bytes; 0 terminates the list. The head lives in the file header.

use crate::page::PageBuf;
use crate::types::{PageId, PAGE_SIZE};

/// A page sitting on the free list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreePage {
    pub next: PageId,
}

impl FreePage {
    pub fn read(buf: &PageBuf) -> Self {
        Self {
            next: PageId::new(buf.get_u64(0)),
        }
    }

    pub fn write(&self, buf: &mut PageBuf) {
        buf.put_u64(0, self.next.value());
    }
}

/// Image of pages `first..end` chained in order, the last one ending the list
pub fn free_run(first: u64, end: u64) -> Vec<u8> {
    let count = end.saturating_sub(first) as usize;
    let mut bytes = vec![0u8; count * PAGE_SIZE];
    for (i, page) in bytes.chunks_exact_mut(PAGE_SIZE).enumerate() {
        let number = first + i as u64;
        let next = if number + 1 < end { number + 1 } else { 0 };
        page[..8].copy_from_slice(&next.to_le_bytes());
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_run_chains_pages() {
        let bytes = free_run(4, 8);
        assert_eq!(bytes.len(), 4 * PAGE_SIZE);

        let nexts: Vec<u64> = bytes
            .chunks_exact(PAGE_SIZE)
            .map(|p| FreePage::read(&PageBuf::from_bytes(p)).next.value())
            .collect();
        assert_eq!(nexts, vec![5, 6, 7, 0]);
    }

    #[test]
    fn test_free_page_field() {
        let mut buf = PageBuf::new();
        FreePage { next: PageId::new(42) }.write(&mut buf);
        assert_eq!(buf.get_u64(0), 42);
        assert_eq!(FreePage::read(&buf).next, PageId::new(42));
    }
}

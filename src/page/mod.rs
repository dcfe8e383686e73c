//! Page layer: typed views over the on-disk tree page formats.
//!
//! Every tree page starts with a 128-byte header region. Leaf pages keep a
//! sorted slot array growing forward from the header and a value region
//! growing backward from the end of the page; the gap between them is the
//! page's free space. Internal pages interleave child pointers and keys.

mod header;
mod internal;
mod leaf;
mod slot;

pub use header::NodeHeader;
pub use internal::InternalPage;
pub use leaf::LeafPage;
pub use slot::{Record, Slot};

use crate::types::PAGE_SIZE;

/// A raw page buffer
#[derive(Clone, PartialEq, Eq)]
pub struct PageBuf {
    data: [u8; PAGE_SIZE],
}

impl PageBuf {
    /// Create a new zeroed page buffer
    pub fn new() -> Self {
        Self {
            data: [0u8; PAGE_SIZE],
        }
    }

    /// Create a page buffer from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut data = [0u8; PAGE_SIZE];
        let len = bytes.len().min(PAGE_SIZE);
        data[..len].copy_from_slice(&bytes[..len]);
        Self { data }
    }

    /// Get a reference to the raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Get a mutable reference to the raw bytes
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn get_u16(&self, offset: usize) -> u16 {
        u16::from_le_bytes([self.data[offset], self.data[offset + 1]])
    }

    pub fn put_u16(&mut self, offset: usize, value: u16) {
        self.data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    pub fn get_u32(&self, offset: usize) -> u32 {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.data[offset..offset + 4]);
        u32::from_le_bytes(raw)
    }

    pub fn put_u32(&mut self, offset: usize, value: u32) {
        self.data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn get_u64(&self, offset: usize) -> u64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.data[offset..offset + 8]);
        u64::from_le_bytes(raw)
    }

    pub fn put_u64(&mut self, offset: usize, value: u64) {
        self.data[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }

    pub fn get_i64(&self, offset: usize) -> i64 {
        self.get_u64(offset) as i64
    }

    pub fn put_i64(&mut self, offset: usize, value: i64) {
        self.put_u64(offset, value as u64);
    }
}

impl Default for PageBuf {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PageBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageBuf")
            .field("head", &&self.data[..16])
            .finish_non_exhaustive()
    }
}

impl std::ops::Deref for PageBuf {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl std::ops::DerefMut for PageBuf {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data
    }
}

impl AsRef<[u8]> for PageBuf {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

//! Table file header.
//!
//! The first page (page 0) of every table file describes the file.

use crate::error::{Result, StorageError};
use crate::types::{PageId, PAGE_SIZE};

/// Magic number identifying a table file
pub const MAGIC: u64 = 2022;

const MAGIC_OFFSET: usize = 0;
const FREE_HEAD_OFFSET: usize = 8;
const PAGE_COUNT_OFFSET: usize = 16;
const ROOT_OFFSET: usize = 24;
const CHECKSUM_OFFSET: usize = 32;

/// Table file header
///
/// Layout (little-endian):
/// ```text
/// Offset  Size  Description
/// 0       8     Magic number (2022)
/// 8       8     First page of the free list (0 if empty)
/// 16      8     Total page count, header included
/// 24      8     Root page of the tree (0 if empty)
/// 32      4     CRC32 of bytes 0..32 (0 if never recorded)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub free_head: PageId,
    pub page_count: u64,
    pub root_page: PageId,
}

impl FileHeader {
    /// Header for a fresh file whose pages `1..page_count` are all free
    pub fn new(page_count: u64) -> Self {
        Self {
            free_head: if page_count > 1 {
                PageId::new(1)
            } else {
                PageId::NONE
            },
            page_count,
            root_page: PageId::NONE,
        }
    }

    /// Read a file header from bytes
    pub fn read(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < CHECKSUM_OFFSET + 4 {
            return Err(StorageError::invalid_db("header too short"));
        }

        let field = |at: usize| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[at..at + 8]);
            u64::from_le_bytes(raw)
        };

        let magic = field(MAGIC_OFFSET);
        if magic != MAGIC {
            return Err(StorageError::invalid_db(format!(
                "bad magic number {} (expected {})",
                magic, MAGIC
            )));
        }

        let mut raw = [0u8; 4];
        raw.copy_from_slice(&bytes[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4]);
        let stored_checksum = u32::from_le_bytes(raw);
        if stored_checksum != 0 && stored_checksum != crc32fast::hash(&bytes[..CHECKSUM_OFFSET]) {
            return Err(StorageError::corruption("header checksum mismatch"));
        }

        let header = Self {
            free_head: PageId::new(field(FREE_HEAD_OFFSET)),
            page_count: field(PAGE_COUNT_OFFSET),
            root_page: PageId::new(field(ROOT_OFFSET)),
        };

        if header.page_count == 0
            || header.free_head.value() >= header.page_count
            || header.root_page.value() >= header.page_count
        {
            return Err(StorageError::corruption(format!(
                "header fields out of range: {:?}",
                header
            )));
        }

        Ok(header)
    }

    /// Write this header into a full page image
    pub fn write(&self, bytes: &mut [u8]) {
        bytes[..PAGE_SIZE].fill(0);
        bytes[MAGIC_OFFSET..MAGIC_OFFSET + 8].copy_from_slice(&MAGIC.to_le_bytes());
        bytes[FREE_HEAD_OFFSET..FREE_HEAD_OFFSET + 8]
            .copy_from_slice(&self.free_head.value().to_le_bytes());
        bytes[PAGE_COUNT_OFFSET..PAGE_COUNT_OFFSET + 8]
            .copy_from_slice(&self.page_count.to_le_bytes());
        bytes[ROOT_OFFSET..ROOT_OFFSET + 8].copy_from_slice(&self.root_page.value().to_le_bytes());

        let checksum = crc32fast::hash(&bytes[..CHECKSUM_OFFSET]);
        bytes[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&checksum.to_le_bytes());
    }
}

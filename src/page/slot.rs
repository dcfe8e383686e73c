//! Leaf slot encoding and the logical record type.

use serde::{Deserialize, Serialize};

use crate::page::PageBuf;

/// One entry of a leaf's slot array
///
/// Layout (12 bytes):
/// ```text
/// Offset  Size  Description
/// 0       8     Key (i64)
/// 8       2     Value size
/// 10      2     Value offset within the page
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub key: i64,
    pub size: u16,
    pub offset: u16,
}

impl Slot {
    pub fn read(buf: &PageBuf, at: usize) -> Self {
        Self {
            key: buf.get_i64(at),
            size: buf.get_u16(at + 8),
            offset: buf.get_u16(at + 10),
        }
    }

    pub fn write(&self, buf: &mut PageBuf, at: usize) {
        buf.put_i64(at, self.key);
        buf.put_u16(at + 8, self.size);
        buf.put_u16(at + 10, self.offset);
    }

    /// Byte range of the value within the page
    pub fn value_range(&self) -> std::ops::Range<usize> {
        let start = self.offset as usize;
        start..start + self.size as usize
    }
}

/// A key with its value bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub key: i64,
    pub value: Vec<u8>,
}

impl Record {
    pub fn new(key: i64, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key,
            value: value.into(),
        }
    }

    /// Value length as stored in the slot
    pub fn size(&self) -> u16 {
        self.value.len() as u16
    }
}

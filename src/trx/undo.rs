//! Physical undo records.

use crate::types::{PageId, TableId};

/// Bytes of a page as they were before an in-place update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoRecord {
    pub table: TableId,
    pub page: PageId,
    pub offset: u16,
    pub before: Vec<u8>,
}

/// Undo records in the order they were logged
#[derive(Debug, Default)]
pub struct UndoLog {
    records: Vec<UndoRecord>,
}

impl UndoLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: UndoRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Consume the log newest first, the order it must be replayed in
    pub fn into_rollback_order(self) -> impl Iterator<Item = UndoRecord> {
        self.records.into_iter().rev()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rollback_order() {
        let mut log = UndoLog::new();
        for offset in [10u16, 20, 30] {
            log.push(UndoRecord {
                table: 1,
                page: PageId::new(3),
                offset,
                before: vec![offset as u8],
            });
        }
        assert_eq!(log.len(), 3);

        let offsets: Vec<u16> = log.into_rollback_order().map(|r| r.offset).collect();
        assert_eq!(offsets, vec![30, 20, 10]);
    }
}

//! Error types for the storage engine.

use thiserror::Error;
use crate::types::{PageId, TableId, TrxId};

/// Result type alias for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur in the storage engine
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O error from the underlying file system
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Every buffer frame is pinned and no victim could be chosen
    #[error("No space: all buffer frames are pinned")]
    NoSpace,

    /// Granting the lock would close a cycle in the waits-for graph
    #[error("Deadlock detected: transaction {trx_id} aborted")]
    Deadlock { trx_id: TrxId },

    /// Insert of a key that is already present
    #[error("Duplicate key: {0}")]
    DuplicateKey(i64),

    /// Key is not present in the table
    #[error("Key not found: {0}")]
    KeyNotFound(i64),

    /// Value exceeds maximum allowed size
    #[error("Value too large: {size} bytes (max: {max})")]
    ValueTooLarge { size: usize, max: usize },

    /// Table id was never opened or was already closed
    #[error("Unknown table: {0}")]
    UnknownTable(TableId),

    /// Transaction id is not active
    #[error("Unknown transaction: {0}")]
    UnknownTransaction(TrxId),

    /// Data corruption detected (e.g., checksum mismatch)
    #[error("Corruption detected: {0}")]
    Corruption(String),

    /// Invalid page format or type
    #[error("Invalid page {page}: {reason}")]
    InvalidPage { page: PageId, reason: String },

    /// Invalid operation for the current state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Database file is corrupted or has invalid format
    #[error("Invalid database file: {0}")]
    InvalidDatabaseFile(String),
}

impl StorageError {
    /// Create a corruption error with a message
    pub fn corruption(msg: impl Into<String>) -> Self {
        Self::Corruption(msg.into())
    }

    /// Create an invalid page error
    pub fn invalid_page(page: PageId, reason: impl Into<String>) -> Self {
        Self::InvalidPage {
            page,
            reason: reason.into(),
        }
    }

    /// Create an invalid operation error
    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }

    /// Create an invalid database file error
    pub fn invalid_db(msg: impl Into<String>) -> Self {
        Self::InvalidDatabaseFile(msg.into())
    }

    /// Expected outcomes of a well-formed request (duplicate, missing key,
    /// oversized value). These never abort a transaction on their own.
    pub fn is_logical(&self) -> bool {
        matches!(
            self,
            Self::DuplicateKey(_) | Self::KeyNotFound(_) | Self::ValueTooLarge { .. }
        )
    }

    pub fn is_no_space(&self) -> bool {
        matches!(self, Self::NoSpace)
    }

    pub fn is_deadlock(&self) -> bool {
        matches!(self, Self::Deadlock { .. })
    }
}

/// Collapse a result into the `0` / `-1` status convention used by front ends.
pub fn status<T>(result: &Result<T>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(_) => -1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logical_classification() {
        assert!(StorageError::DuplicateKey(3).is_logical());
        assert!(StorageError::KeyNotFound(3).is_logical());
        assert!(!StorageError::NoSpace.is_logical());
        assert!(!StorageError::Deadlock { trx_id: 4 }.is_logical());
        assert!(StorageError::Deadlock { trx_id: 4 }.is_deadlock());
    }

    #[test]
    fn test_status_codes() {
        let ok: Result<u16> = Ok(7);
        let err: Result<u16> = Err(StorageError::KeyNotFound(1));
        assert_eq!(status(&ok), 0);
        assert_eq!(status(&err), -1);
    }
}

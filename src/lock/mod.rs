//! Record locks.
//!
//! Locks are taken per (table, page, key) in shared or exclusive mode and
//! queue per (table, page). A request waits for the nearest conflicting
//! request ahead of it on the same key; before every wait the waits-for
//! graph is checked and a request that would close a cycle fails with
//! `StorageError::Deadlock`.

mod deadlock;
mod manager;

pub use deadlock::WaitsFor;
pub use manager::LockManager;

use crate::types::{PageId, TableId, TrxId};

/// Lock strength
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    Shared,
    Exclusive,
}

impl LockMode {
    /// Two requests on the same key by different owners conflict unless
    /// both are shared
    pub fn conflicts_with(self, other: LockMode) -> bool {
        self == LockMode::Exclusive || other == LockMode::Exclusive
    }

    /// A held lock of this mode satisfies a request for `wanted`
    pub fn covers(self, wanted: LockMode) -> bool {
        self == LockMode::Exclusive || wanted == LockMode::Shared
    }
}

/// One lock request, granted or still queued.
///
/// The lock manager and the owning transaction share it through an `Arc`;
/// it is freed when both have let go.
#[derive(Debug, PartialEq, Eq)]
pub struct Lock {
    pub(crate) id: u64,
    pub table: TableId,
    pub page: PageId,
    pub key: i64,
    pub mode: LockMode,
    pub owner: TrxId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_compatibility() {
        use LockMode::*;
        assert!(!Shared.conflicts_with(Shared));
        assert!(Shared.conflicts_with(Exclusive));
        assert!(Exclusive.conflicts_with(Shared));
        assert!(Exclusive.conflicts_with(Exclusive));

        assert!(Exclusive.covers(Shared));
        assert!(Exclusive.covers(Exclusive));
        assert!(Shared.covers(Shared));
        assert!(!Shared.covers(Exclusive));
    }
}

//! Transactions: ids, held locks and the undo log of in-place updates.
//!
//! Locking is strict two-phase: every lock a transaction takes is held
//! until it commits or aborts.

mod manager;
mod undo;

pub use manager::TransactionManager;
pub use undo::{UndoLog, UndoRecord};

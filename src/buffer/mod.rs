//! Buffer pool: bounded page cache with per-frame latches.
//!
//! Frames cache pages of any open table, keyed by (table, page). A pinned
//! frame is latched by the transaction that pinned it; other transactions
//! wait for the pin count to drop to zero. Victims are chosen among unpinned
//! frames by the smallest last-used stamp.

#[cfg(test)]
pub(crate) mod failpoint;
mod frame;
mod nru;
mod pool;

pub use nru::{pick_victim, NruClock};
pub use pool::{BufferPool, BufferPoolImpl, PageHandle, PoolStats, StoreOptions};

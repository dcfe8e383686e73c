//! Disk-based B+ tree.
//!
//! Records live in leaf pages chained left to right; internal pages hold
//! separator keys only. A tree supports:
//! - Point lookups and in-place value overwrites
//! - Insertions, splitting leaves and internal pages on overflow
//! - Deletions, merging or rebalancing underfull pages
//! - Inclusive range scans
//!
//! Structural changes are all-or-nothing: a failure part way through a split
//! or merge puts every touched page back the way it was.

mod cursor;
mod delete;
mod insert;
mod journal;
mod tree;

pub use cursor::RangeCursor;
pub use tree::{BTree, Lookup, Node, Overwrite, TreeSummary};

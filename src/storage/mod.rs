//! Storage layer: the page store behind the buffer pool.
//!
//! Each table lives in its own file of 4096-byte pages. Page 0 holds the
//! file header; unused pages form a singly linked free list threaded through
//! their first eight bytes.

mod disk_manager;
mod file_header;
mod freelist;

pub use disk_manager::{DiskManager, DiskManagerImpl};
pub use file_header::{FileHeader, MAGIC};
pub use freelist::{free_run, FreePage};

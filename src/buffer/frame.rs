//! Buffer frame state.

use crate::page::PageBuf;
use crate::types::{PageId, TableId, TrxId};
use parking_lot::{Condvar, Mutex};

/// Bookkeeping for one frame, guarded by the frame's metadata mutex
#[derive(Debug, Default)]
pub(crate) struct FrameMeta {
    /// Page currently cached, if any
    pub tag: Option<(TableId, PageId)>,
    pub dirty: bool,
    pub pin_count: u32,
    /// Transaction holding the latch while `pin_count > 0`
    pub owner: Option<TrxId>,
    /// Free the page once the last pin is dropped
    pub delete_waited: bool,
    pub last_used: u64,
}

impl FrameMeta {
    /// The latch is free, or already held by `trx`
    pub fn latch_available_to(&self, trx: TrxId) -> bool {
        self.pin_count == 0 || self.owner == Some(trx)
    }

    pub fn latch(&mut self, trx: TrxId) {
        self.pin_count += 1;
        self.owner = Some(trx);
    }

    /// Give back a frame that was claimed but never filled
    pub fn abandon(&mut self) {
        self.tag = None;
        self.dirty = false;
        self.pin_count = 0;
        self.owner = None;
        self.delete_waited = false;
        self.last_used = 0;
    }
}

/// One in-memory page slot
pub(crate) struct Frame {
    pub index: usize,
    pub meta: Mutex<FrameMeta>,
    /// Signalled whenever the pin count drops to zero
    pub released: Condvar,
    pub data: Mutex<PageBuf>,
}

impl Frame {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            meta: Mutex::new(FrameMeta::default()),
            released: Condvar::new(),
            data: Mutex::new(PageBuf::new()),
        }
    }
}

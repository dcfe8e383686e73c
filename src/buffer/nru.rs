//! Not-recently-used replacement.
//!
//! Every unpin stamps the frame with the next value of a monotonic clock.
//! The victim is the candidate with the smallest stamp; never-used frames
//! carry stamp 0 and are taken first.

/// Monotonic clock used to stamp frames on unpin
#[derive(Debug, Default)]
pub struct NruClock {
    now: u64,
}

impl NruClock {
    pub fn new() -> Self {
        Self { now: 0 }
    }

    /// Advance the clock and return the new stamp
    pub fn tick(&mut self) -> u64 {
        self.now += 1;
        self.now
    }

    pub fn now(&self) -> u64 {
        self.now
    }
}

/// Pick the candidate `(frame index, last used)` with the oldest stamp
pub fn pick_victim<I>(candidates: I) -> Option<usize>
where
    I: IntoIterator<Item = (usize, u64)>,
{
    candidates
        .into_iter()
        .min_by_key(|&(index, stamp)| (stamp, index))
        .map(|(index, _)| index)
}

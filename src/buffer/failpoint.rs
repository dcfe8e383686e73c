//! Test-only fault injection for frame claims.
//!
//! Arming the failpoint makes the `n`th frame claim on the current thread
//! fail with `NoSpace`, once. Claims on other threads are unaffected.

use std::cell::Cell;

thread_local! {
    static CLAIMS_LEFT: Cell<Option<usize>> = const { Cell::new(None) };
}

/// Let `n` claims through, then fail the next one
pub(crate) fn fail_claim_after(n: usize) {
    CLAIMS_LEFT.with(|left| left.set(Some(n)));
}

pub(crate) fn disarm() {
    CLAIMS_LEFT.with(|left| left.set(None));
}

/// Whether this claim is the one to fail. Tripping disarms the failpoint.
pub(crate) fn trip() -> bool {
    CLAIMS_LEFT.with(|left| match left.get() {
        Some(0) => {
            left.set(None);
            true
        }
        Some(n) => {
            left.set(Some(n - 1));
            false
        }
        None => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trips_once_after_n_claims() {
        fail_claim_after(2);
        assert!(!trip());
        assert!(!trip());
        assert!(trip());
        assert!(!trip());

        fail_claim_after(0);
        disarm();
        assert!(!trip());
    }
}

//! Waits-for graph.
//!
//! A blocked transaction waits on exactly one other transaction, so the
//! graph is a map from waiter to holder. Cycle checks walk it from the
//! requesting transaction with a visited set owned by that single check.

use std::collections::{HashMap, HashSet};

use crate::types::TrxId;

#[derive(Debug, Default)]
pub struct WaitsFor {
    edges: HashMap<TrxId, TrxId>,
}

impl WaitsFor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `waiter` is blocked on `holder`, replacing any older edge
    pub fn wait(&mut self, waiter: TrxId, holder: TrxId) {
        self.edges.insert(waiter, holder);
    }

    pub fn clear(&mut self, waiter: TrxId) {
        self.edges.remove(&waiter);
    }

    #[cfg(test)]
    pub fn waiting_on(&self, waiter: TrxId) -> Option<TrxId> {
        self.edges.get(&waiter).copied()
    }

    /// Following edges from `start` leads back to `start`
    pub fn closes_cycle(&self, start: TrxId) -> bool {
        let mut visited = HashSet::new();
        let mut current = start;
        while let Some(&next) = self.edges.get(&current) {
            if next == start {
                return true;
            }
            // A cycle not through `start` is someone else's to report.
            if !visited.insert(next) {
                return false;
            }
            current = next;
        }
        false
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_without_cycle() {
        let mut graph = WaitsFor::new();
        graph.wait(1, 2);
        graph.wait(2, 3);
        assert!(!graph.closes_cycle(1));
        assert!(!graph.closes_cycle(3));
        assert_eq!(graph.waiting_on(2), Some(3));
    }

    #[test]
    fn test_two_party_cycle() {
        let mut graph = WaitsFor::new();
        graph.wait(1, 2);
        graph.wait(2, 1);
        assert!(graph.closes_cycle(1));
        assert!(graph.closes_cycle(2));

        graph.clear(2);
        assert!(!graph.closes_cycle(1));
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_long_cycle() {
        let mut graph = WaitsFor::new();
        for trx in 1..10 {
            graph.wait(trx, trx + 1);
        }
        assert!(!graph.closes_cycle(1));
        graph.wait(10, 1);
        assert!((1..=10).all(|trx| graph.closes_cycle(trx)));
    }

    #[test]
    fn test_cycle_elsewhere_is_not_reported() {
        let mut graph = WaitsFor::new();
        graph.wait(2, 3);
        graph.wait(3, 2);
        graph.wait(1, 2);
        assert!(!graph.closes_cycle(1));
        assert!(graph.closes_cycle(2));
    }
}

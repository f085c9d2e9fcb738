//! Per-remote-node sequence tracking.
//!
//! Every block-affecting request to a remote node carries a receiver
//! sequence one greater than the last sequence that node reported. The
//! registry remembers that last value for each node ever contacted.
//!
//! Entries are never removed. The node count is small in practice (one
//! entry per storage node), so lookups scan a growable vector.

use crate::packet::{NodeId, SeqNum};
use tracing::debug;

/// Last known sequence number for one remote node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceEntry {
    pub node: NodeId,
    pub last_seq: SeqNum,
}

/// Registry of remote node sequence numbers.
#[derive(Debug, Default)]
pub struct SequenceRegistry {
    entries: Vec<SequenceEntry>,
}

impl SequenceRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Last sequence recorded for `node`, or 0 if it was never contacted.
    pub fn lookup(&self, node: NodeId) -> SeqNum {
        self.position(node)
            .map(|idx| self.entries[idx].last_seq)
            .unwrap_or(0)
    }

    /// Start tracking `node`.
    ///
    /// A node that is already tracked is overwritten rather than duplicated.
    pub fn insert(&mut self, node: NodeId, seq: SeqNum) {
        if let Some(idx) = self.position(node) {
            self.entries[idx].last_seq = seq;
            return;
        }

        self.entries.push(SequenceEntry {
            node,
            last_seq: seq,
        });
        debug!(node, seq, tracked = self.entries.len(), "tracking new remote node");
    }

    /// Overwrite the sequence of a tracked node. Unknown nodes are ignored.
    pub fn update(&mut self, node: NodeId, seq: SeqNum) {
        if let Some(idx) = self.position(node) {
            self.entries[idx].last_seq = seq;
        }
    }

    /// Insert on first contact, update afterwards.
    pub fn record(&mut self, node: NodeId, seq: SeqNum) {
        if self.lookup(node) == 0 {
            self.insert(node, seq);
        } else {
            self.update(node, seq);
        }
    }

    /// Receiver sequence to put in the next request to `node`.
    pub fn next_for(&self, node: NodeId) -> SeqNum {
        self.lookup(node).wrapping_add(1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SequenceEntry> {
        self.entries.iter()
    }

    fn position(&self, node: NodeId) -> Option<usize> {
        self.entries.iter().position(|entry| entry.node == node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_unknown_is_zero() {
        let registry = SequenceRegistry::new();
        assert_eq!(registry.lookup(5), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_insert_then_lookup() {
        let mut registry = SequenceRegistry::new();
        registry.insert(5, 100);
        registry.insert(9, 7);

        assert_eq!(registry.lookup(5), 100);
        assert_eq!(registry.lookup(9), 7);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_insert_existing_overwrites() {
        let mut registry = SequenceRegistry::new();
        registry.insert(5, 100);
        registry.insert(5, 101);

        assert_eq!(registry.lookup(5), 101);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_update_unknown_is_noop() {
        let mut registry = SequenceRegistry::new();
        registry.update(5, 100);

        assert_eq!(registry.lookup(5), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_update_known() {
        let mut registry = SequenceRegistry::new();
        registry.insert(5, 100);
        registry.update(5, 250);
        assert_eq!(registry.lookup(5), 250);
    }

    #[test]
    fn test_record() {
        let mut registry = SequenceRegistry::new();
        registry.record(3, 10);
        registry.record(3, 11);
        registry.record(4, 1);

        assert_eq!(registry.lookup(3), 11);
        assert_eq!(registry.lookup(4), 1);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_next_for() {
        let mut registry = SequenceRegistry::new();
        assert_eq!(registry.next_for(8), 1);

        registry.insert(8, 41);
        assert_eq!(registry.next_for(8), 42);
    }

    #[test]
    fn test_many_nodes() {
        let mut registry = SequenceRegistry::new();
        for node in 1..=1000u64 {
            registry.insert(node, (node % 500 + 1) as SeqNum);
        }

        assert_eq!(registry.len(), 1000);
        assert_eq!(registry.lookup(1000), 1);
        assert_eq!(registry.lookup(499), 500);
        assert_eq!(registry.iter().count(), 1000);
    }
}

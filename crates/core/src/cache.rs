//! Fixed-capacity LRU cache of remote blocks.
//!
//! Entries are keyed by (node, block). Recency is a logical clock that ticks
//! on every cache access, not wall-clock time, so stamps only mean something
//! relative to each other.
//!
//! # Eviction
//!
//! When the cache is full, a new entry replaces the entry with the smallest
//! stamp. Ties go to the lowest slot index.
//!
//! # Coherence
//!
//! There is no invalidation channel. A block changed on the service by
//! someone else stays stale here until it is evicted or rewritten locally.

use crate::packet::{Block, BlockId, NodeId};
use tracing::{debug, info};

/// A cached block.
#[derive(Debug, Clone)]
struct CacheEntry {
    node: NodeId,
    block_id: BlockId,
    data: Box<Block>,
    stamp: u64,
}

/// Aggregate cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Maximum number of entries
    pub capacity: usize,

    /// Entries currently held
    pub entries: usize,

    /// Number of `get` calls
    pub queries: u64,

    /// Number of `get` calls that found the block
    pub hits: u64,
}

impl CacheStats {
    /// Hit ratio in [0, 1] (0 when nothing was queried).
    pub fn hit_rate(&self) -> f64 {
        if self.queries == 0 {
            0.0
        } else {
            self.hits as f64 / self.queries as f64
        }
    }
}

/// LRU block cache with a fixed number of slots.
#[derive(Debug)]
pub struct BlockCache {
    capacity: usize,
    entries: Vec<CacheEntry>,
    clock: u64,
    queries: u64,
    hits: u64,
}

impl BlockCache {
    /// Create a cache holding at most `capacity` blocks.
    ///
    /// A capacity of 0 disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Vec::with_capacity(capacity),
            clock: 0,
            queries: 0,
            hits: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a block, refreshing its recency on a hit.
    pub fn get(&mut self, node: NodeId, block_id: BlockId) -> Option<&Block> {
        self.queries += 1;
        let stamp = self.tick();

        let entry = self
            .entries
            .iter_mut()
            .find(|entry| entry.node == node && entry.block_id == block_id)?;

        self.hits += 1;
        entry.stamp = stamp;
        Some(&*entry.data)
    }

    /// Insert or overwrite a block.
    pub fn put(&mut self, node: NodeId, block_id: BlockId, data: &Block) {
        if self.capacity == 0 {
            return;
        }

        let stamp = self.tick();

        // Existing entry: overwrite in place
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|entry| entry.node == node && entry.block_id == block_id)
        {
            entry.data.copy_from_slice(data);
            entry.stamp = stamp;
            return;
        }

        // Free slot
        if self.entries.len() < self.capacity {
            self.entries.push(CacheEntry {
                node,
                block_id,
                data: Box::new(*data),
                stamp,
            });
            return;
        }

        // Full: replace the least recently used slot
        let victim = self.lru_slot();
        let entry = &mut self.entries[victim];
        debug!(
            slot = victim,
            evicted_node = entry.node,
            evicted_block = entry.block_id,
            node,
            block_id,
            "evicting cache entry"
        );
        entry.node = node;
        entry.block_id = block_id;
        entry.data.copy_from_slice(data);
        entry.stamp = stamp;
    }

    /// Whether (node, block) is cached. Does not count as a query.
    pub fn contains(&self, node: NodeId, block_id: BlockId) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.node == node && entry.block_id == block_id)
    }

    /// Current counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            capacity: self.capacity,
            entries: self.entries.len(),
            queries: self.queries,
            hits: self.hits,
        }
    }

    /// Drop all entries and report the final counters.
    pub fn close(mut self) -> CacheStats {
        let stats = self.stats();
        info!(
            queries = stats.queries,
            hits = stats.hits,
            "closing block cache: {:.2}% hit rate, deleting {} items",
            stats.hit_rate() * 100.0,
            stats.entries
        );
        self.entries.clear();
        stats
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Slot with the smallest stamp; the first one found wins ties.
    fn lru_slot(&self) -> usize {
        let mut victim = 0;
        let mut oldest = u64::MAX;
        for (idx, entry) in self.entries.iter().enumerate() {
            if entry.stamp < oldest {
                oldest = entry.stamp;
                victim = idx;
            }
        }
        victim
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::BLOCK_SIZE;

    fn block(byte: u8) -> Block {
        [byte; BLOCK_SIZE]
    }

    #[test]
    fn test_miss_then_hit() {
        let mut cache = BlockCache::new(4);
        assert!(cache.get(1, 1).is_none());

        cache.put(1, 1, &block(0xAA));
        let data = cache.get(1, 1).unwrap();
        assert_eq!(data[0], 0xAA);

        let stats = cache.stats();
        assert_eq!(stats.queries, 2);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn test_key_includes_node() {
        let mut cache = BlockCache::new(4);
        cache.put(1, 7, &block(1));
        cache.put(2, 7, &block(2));

        assert_eq!(cache.get(1, 7).unwrap()[0], 1);
        assert_eq!(cache.get(2, 7).unwrap()[0], 2);
        assert!(cache.get(3, 7).is_none());
    }

    #[test]
    fn test_put_overwrites_existing() {
        let mut cache = BlockCache::new(2);
        cache.put(1, 1, &block(1));
        cache.put(1, 1, &block(9));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(1, 1).unwrap()[BLOCK_SIZE - 1], 9);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let mut cache = BlockCache::new(3);
        cache.put(1, 1, &block(1));
        cache.put(1, 2, &block(2));
        cache.put(1, 3, &block(3));

        // Touch 1 so that 2 becomes the oldest
        assert!(cache.get(1, 1).is_some());

        cache.put(1, 4, &block(4));

        assert_eq!(cache.len(), 3);
        assert!(cache.contains(1, 1));
        assert!(!cache.contains(1, 2));
        assert!(cache.contains(1, 3));
        assert!(cache.contains(1, 4));
    }

    #[test]
    fn test_overwrite_refreshes_recency() {
        let mut cache = BlockCache::new(2);
        cache.put(1, 1, &block(1));
        cache.put(1, 2, &block(2));

        // Rewriting block 1 makes block 2 the eviction candidate
        cache.put(1, 1, &block(11));
        cache.put(1, 3, &block(3));

        assert!(cache.contains(1, 1));
        assert!(!cache.contains(1, 2));
        assert!(cache.contains(1, 3));
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let mut cache = BlockCache::new(8);
        for id in 1..=100u64 {
            cache.put(id % 3 + 1, id, &block(id as u8));
            if id % 5 == 0 {
                cache.get(1, id - 3);
            }
            assert!(cache.len() <= 8);
        }
        assert_eq!(cache.len(), 8);
    }

    #[test]
    fn test_eviction_matches_reference_model() {
        // Replay an access pattern against a naive model of stamps
        let capacity = 4;
        let mut cache = BlockCache::new(capacity);
        let mut model: Vec<(u64, u64)> = Vec::new(); // (block, stamp)
        let mut clock = 0u64;

        let pattern = [1u64, 2, 3, 1, 4, 5, 2, 6, 1, 3, 7, 8, 1, 9];
        for &id in &pattern {
            clock += 1;
            if cache.get(1, id).is_some() {
                let slot = model.iter_mut().find(|(b, _)| *b == id).unwrap();
                slot.1 = clock;
                continue;
            }

            clock += 1;
            cache.put(1, id, &block(id as u8));
            if model.len() < capacity {
                model.push((id, clock));
            } else {
                let (victim, _) = model
                    .iter()
                    .enumerate()
                    .min_by_key(|(idx, (_, stamp))| (*stamp, *idx))
                    .unwrap();
                model[victim] = (id, clock);
            }

            for (b, _) in &model {
                assert!(cache.contains(1, *b), "block {b} should be cached");
            }
            assert_eq!(cache.len(), model.len());
        }
    }

    #[test]
    fn test_zero_capacity_disables_cache() {
        let mut cache = BlockCache::new(0);
        cache.put(1, 1, &block(1));

        assert!(cache.is_empty());
        assert!(cache.get(1, 1).is_none());
        assert_eq!(cache.stats().queries, 1);
    }

    #[test]
    fn test_close_reports_counters() {
        let mut cache = BlockCache::new(2);
        cache.put(1, 1, &block(1));
        cache.get(1, 1);
        cache.get(1, 2);

        let stats = cache.close();
        assert_eq!(stats.capacity, 2);
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.queries, 2);
        assert_eq!(stats.hits, 1);
        assert!(stats.hits <= stats.queries);
        assert_eq!(stats.hit_rate(), 0.5);
    }
}

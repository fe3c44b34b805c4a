use crate::traits::{CachePolicy, CacheStats, Expiring};
use parking_lot::RwLock;
use std::marker::PhantomData;
use std::sync::Arc;

/// Number of shards. Power of two so the shard is picked with a mask.
const NUM_SHARDS: usize = 64;
const SHARD_MASK: u64 = (NUM_SHARDS as u64) - 1;

/// Thread-safe cache split into 64 independently locked shards.
///
/// Keys are routed by a fixed-seed `ahash`, so a key always lands on the same
/// shard across restarts. Capacity is divided evenly; each shard evicts on its
/// own, which keeps the total at or below `capacity()`.
pub struct ShardedCache<V, P: CachePolicy<V>> {
    shards: Box<[RwLock<P>]>,
    name: &'static str,
    _value: PhantomData<fn() -> V>,
}

impl<V, P: CachePolicy<V>> ShardedCache<V, P> {
    /// `make_shard` is called once per shard with `total_capacity / 64`
    /// (at least 1).
    pub fn new<F>(total_capacity: usize, make_shard: F) -> Self
    where
        F: Fn(usize) -> P,
    {
        let per_shard = (total_capacity / NUM_SHARDS).max(1);
        let shards: Box<[RwLock<P>]> = (0..NUM_SHARDS)
            .map(|_| RwLock::new(make_shard(per_shard)))
            .collect();
        let name = shards[0].read().name();

        Self {
            shards,
            name,
            _value: PhantomData,
        }
    }

    #[inline]
    fn shard(&self, key: &str) -> &RwLock<P> {
        let hash = ahash::RandomState::with_seeds(1, 2, 3, 4).hash_one(key);
        &self.shards[(hash & SHARD_MASK) as usize]
    }

    /// Policies may reorder on reads (LRU) or drop expired entries, so a
    /// lookup takes the shard's write lock.
    pub fn get(&self, key: &str) -> Option<Arc<Expiring<V>>> {
        self.shard(key).write().get(key)
    }

    pub fn insert(&self, key: String, value: Expiring<V>) {
        self.shard(&key).write().insert(key, value);
    }

    pub fn remove(&self, key: &str) -> bool {
        self.shard(key).write().remove(key)
    }

    pub fn clear(&self) {
        for shard in self.shards.iter() {
            shard.write().clear();
        }
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.read().is_empty())
    }

    pub fn capacity(&self) -> usize {
        self.shards.iter().map(|s| s.read().capacity()).sum()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Statistics summed over all shards.
    pub fn stats(&self) -> CacheStats {
        self.shards
            .iter()
            .map(|shard| shard.read().stats())
            .fold(CacheStats::default(), |mut total, s| {
                total.hits += s.hits;
                total.misses += s.misses;
                total.evictions += s.evictions;
                total.current_size += s.current_size;
                total.capacity += s.capacity;
                total
            })
    }
}

use std::sync::Arc;
use std::time::{Duration, Instant};

/// A cached value stamped with its insertion time and time-to-live.
#[derive(Clone, Debug)]
pub struct Expiring<V> {
    pub value: V,
    pub inserted_at: Instant,
    pub ttl: Duration,
}

impl<V> Expiring<V> {
    pub fn new(value: V, ttl: Duration) -> Self {
        Self {
            value,
            inserted_at: Instant::now(),
            ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() > self.ttl
    }

    /// Time left before expiry, zero once expired.
    pub fn remaining(&self) -> Duration {
        self.ttl.saturating_sub(self.inserted_at.elapsed())
    }
}

/// Snapshot of cache statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub current_size: usize,
    pub capacity: usize,
}

impl CacheStats {
    /// Hit ratio in `[0, 1]`, zero before any lookup.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Common interface for the bounded eviction caches backing the in-process tier.
///
/// All methods take `&mut self`; thread safety is provided by `ShardedCache`.
pub trait CachePolicy<V>: Send + Sync {
    /// Look up a key. Expired entries are dropped and reported as a miss.
    fn get(&mut self, key: &str) -> Option<Arc<Expiring<V>>>;

    /// Insert a key-value pair, evicting if at capacity.
    fn insert(&mut self, key: String, value: Expiring<V>);

    fn remove(&mut self, key: &str) -> bool;

    /// Drop every entry. Counters are kept.
    fn clear(&mut self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn capacity(&self) -> usize;

    /// Human-readable name of the eviction policy.
    fn name(&self) -> &'static str;

    fn stats(&self) -> CacheStats;
}

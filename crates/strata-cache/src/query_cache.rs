use crate::eviction::{EvictionPolicy, ExpiryOrder};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// One cached result.
///
/// `expires_at` is fixed when the entry is written; reads never extend it.
#[derive(Debug)]
pub struct QueryCacheEntry<V> {
    pub key: String,
    pub data: V,
    pub expires_at: Instant,
    hit_count: AtomicU64,
    /// Nanoseconds since the owning cache was created.
    last_access: AtomicU64,
}

impl<V> QueryCacheEntry<V> {
    pub fn hit_count(&self) -> u64 {
        self.hit_count.load(Ordering::Relaxed)
    }

    pub fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Point-in-time view of a `QueryResultCache`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryCacheStats {
    pub entries: usize,
    pub max_size: usize,
    /// Hits summed over the entries currently held.
    pub total_hits: u64,
    pub ttl: Duration,
}

/// Bounded TTL cache for query results, keyed by caller-chosen strings.
///
/// Expiry is passive: an expired entry reads as a miss but stays in the map
/// until a `set` at capacity evicts it or the cache is cleared. Which entry a
/// full cache gives up is decided by the `EvictionPolicy`, `ExpiryOrder` by
/// default.
///
/// Lookups only take the read lock; hit counters and access stamps are
/// atomics.
pub struct QueryResultCache<V, P = ExpiryOrder> {
    entries: RwLock<HashMap<String, QueryCacheEntry<V>>>,
    max_size: usize,
    ttl: Duration,
    policy: P,
    epoch: Instant,
}

impl<V: Clone> QueryResultCache<V, ExpiryOrder> {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self::with_policy(max_size, ttl, ExpiryOrder)
    }
}

impl<V: Clone, P: EvictionPolicy> QueryResultCache<V, P> {
    /// A `max_size` of zero disables caching: `set` does nothing.
    pub fn with_policy(max_size: usize, ttl: Duration, policy: P) -> Self {
        Self {
            entries: RwLock::new(HashMap::with_capacity(max_size.min(4096))),
            max_size,
            ttl,
            policy,
            epoch: Instant::now(),
        }
    }

    fn stamp(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    /// Return the value for `key` if present and not yet expired.
    pub fn get(&self, key: &str) -> Option<V> {
        let entries = self.entries.read();
        let entry = entries.get(key)?;
        if entry.is_expired_at(Instant::now()) {
            return None;
        }
        entry.hit_count.fetch_add(1, Ordering::Relaxed);
        entry.last_access.store(self.stamp(), Ordering::Relaxed);
        Some(entry.data.clone())
    }

    /// Store `value` under `key` with the cache TTL.
    ///
    /// A new key arriving at capacity first evicts the policy's victim. An
    /// existing key is replaced in place.
    pub fn set(&self, key: impl Into<String>, value: V) {
        if self.max_size == 0 {
            return;
        }
        let key = key.into();
        let now = Instant::now();
        let entry = QueryCacheEntry {
            key: key.clone(),
            data: value,
            expires_at: now + self.ttl,
            hit_count: AtomicU64::new(0),
            last_access: AtomicU64::new(self.stamp()),
        };

        let mut entries = self.entries.write();
        if !entries.contains_key(&key) && entries.len() >= self.max_size {
            let victim = self
                .policy
                .select_victim(entries.values())
                .map(str::to_owned);
            if let Some(victim) = victim {
                entries.remove(&victim);
            }
        }
        entries.insert(key, entry);
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    pub fn stats(&self) -> QueryCacheStats {
        let entries = self.entries.read();
        QueryCacheStats {
            entries: entries.len(),
            max_size: self.max_size,
            total_hits: entries.values().map(QueryCacheEntry::hit_count).sum(),
            ttl: self.ttl,
        }
    }
}

use super::{LayeredStore, RespStore, StoreError, Tier};
use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use std::time::Duration;
use strata_cache::lru::LruCache;
use strata_cache::sieve::SieveCache;
use strata_cache::{CacheStats, Expiring, ShardedCache};

/// Eviction policy of the in-process tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum L1Policy {
    #[default]
    Sieve,
    Lru,
}

/// Type-erased sharded cache over either policy.
enum L1 {
    Sieve(ShardedCache<Bytes, SieveCache<Bytes>>),
    Lru(ShardedCache<Bytes, LruCache<Bytes>>),
}

impl L1 {
    fn build(policy: L1Policy, capacity: usize) -> Self {
        match policy {
            L1Policy::Sieve => L1::Sieve(ShardedCache::new(capacity, SieveCache::new)),
            L1Policy::Lru => L1::Lru(ShardedCache::new(capacity, LruCache::new)),
        }
    }

    fn get(&self, key: &str) -> Option<Bytes> {
        let entry = match self {
            L1::Sieve(c) => c.get(key),
            L1::Lru(c) => c.get(key),
        };
        entry.map(|e| e.value.clone())
    }

    fn insert(&self, key: &str, value: Bytes, ttl: Duration) {
        let entry = Expiring::new(value, ttl);
        match self {
            L1::Sieve(c) => c.insert(key.to_string(), entry),
            L1::Lru(c) => c.insert(key.to_string(), entry),
        }
    }

    fn remove(&self, key: &str) -> bool {
        match self {
            L1::Sieve(c) => c.remove(key),
            L1::Lru(c) => c.remove(key),
        }
    }

    fn stats(&self) -> CacheStats {
        match self {
            L1::Sieve(c) => c.stats(),
            L1::Lru(c) => c.stats(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            L1::Sieve(c) => c.name(),
            L1::Lru(c) => c.name(),
        }
    }
}

/// In-process L1 in front of an optional remote L2.
///
/// Reads try L1, then L2, copying L2 hits back into L1 with the hot TTL.
/// `Tier::Hot` writes stay in L1. `Tier::Warm` writes land in both tiers, or
/// in L1 with the warm TTL when there is no remote tier.
pub struct TieredStore {
    l1: L1,
    remote: Option<RespStore>,
    hot_ttl: Duration,
    warm_ttl: Duration,
}

impl TieredStore {
    pub fn new(
        policy: L1Policy,
        capacity: usize,
        hot_ttl: Duration,
        warm_ttl: Duration,
        remote: Option<RespStore>,
    ) -> Self {
        let l1 = L1::build(policy, capacity);

        tracing::info!(
            policy = l1.name(),
            capacity,
            hot_ttl_secs = hot_ttl.as_secs(),
            warm_ttl_secs = warm_ttl.as_secs(),
            remote = remote.as_ref().map_or("none", |r| r.addr()),
            "layered store initialized"
        );

        Self {
            l1,
            remote,
            hot_ttl,
            warm_ttl,
        }
    }

    pub fn l1_stats(&self) -> CacheStats {
        self.l1.stats()
    }

    pub fn l1_name(&self) -> &'static str {
        self.l1.name()
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }
}

#[async_trait]
impl LayeredStore for TieredStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        if let Some(value) = self.l1.get(key) {
            return Ok(Some(value));
        }
        let Some(remote) = &self.remote else {
            return Ok(None);
        };

        let value = remote.get(key).await?;
        if let Some(value) = &value {
            self.l1.insert(key, value.clone(), self.hot_ttl);
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: Bytes, tier: Tier) -> Result<(), StoreError> {
        match (tier, &self.remote) {
            (Tier::Hot, _) => {
                self.l1.insert(key, value, self.hot_ttl);
                Ok(())
            }
            (Tier::Warm, Some(remote)) => {
                self.l1.insert(key, value.clone(), self.hot_ttl);
                remote.set(key, &value, self.warm_ttl).await
            }
            (Tier::Warm, None) => {
                self.l1.insert(key, value, self.warm_ttl);
                Ok(())
            }
        }
    }

    async fn delete(&self, keys: &[String]) -> Result<(), StoreError> {
        for key in keys {
            self.l1.remove(key);
        }
        match &self.remote {
            Some(remote) => remote.delete(keys).await.map(|_| ()),
            None => Ok(()),
        }
    }
}

use crate::query_cache::QueryCacheEntry;

/// Victim selection for a full `QueryResultCache`.
///
/// The cache calls `select_victim` under its write lock when a new key
/// arrives at capacity and removes whichever key is returned.
pub trait EvictionPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    fn select_victim<'a, V: 'a>(
        &self,
        entries: impl Iterator<Item = &'a QueryCacheEntry<V>>,
    ) -> Option<&'a str>;
}

/// Evict the entry closest to expiry.
///
/// With one TTL for every entry this is oldest-insertion-first. Hit counts
/// and recency play no part.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpiryOrder;

impl EvictionPolicy for ExpiryOrder {
    fn name(&self) -> &'static str {
        "expiry-order"
    }

    fn select_victim<'a, V: 'a>(
        &self,
        entries: impl Iterator<Item = &'a QueryCacheEntry<V>>,
    ) -> Option<&'a str> {
        entries
            .min_by_key(|entry| entry.expires_at)
            .map(|entry| entry.key.as_str())
    }
}

/// Evict the entry that was served (or written) longest ago.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeastRecentlyUsed;

impl EvictionPolicy for LeastRecentlyUsed {
    fn name(&self) -> &'static str {
        "lru"
    }

    fn select_victim<'a, V: 'a>(
        &self,
        entries: impl Iterator<Item = &'a QueryCacheEntry<V>>,
    ) -> Option<&'a str> {
        entries
            .min_by_key(|entry| entry.last_access())
            .map(|entry| entry.key.as_str())
    }
}


//! Bounded in-process caches with TTL expiry.
//!
//! Two families live here:
//!
//! - [`sharded::ShardedCache`] over a [`traits::CachePolicy`] ([`sieve::SieveCache`]
//!   or [`lru::LruCache`]): the arena-backed tier used for whole-response
//!   snapshots.
//! - [`query_cache::QueryResultCache`]: a single-map cache for query results
//!   whose victim choice is delegated to an [`eviction::EvictionPolicy`].

pub mod arena;
pub mod eviction;
pub mod lru;
pub mod query_cache;
pub mod sharded;
pub mod sieve;
pub mod traits;

pub use eviction::{EvictionPolicy, ExpiryOrder, LeastRecentlyUsed};
pub use query_cache::{QueryCacheEntry, QueryCacheStats, QueryResultCache};
pub use sharded::ShardedCache;
pub use traits::{CachePolicy, CacheStats, Expiring};

use crate::backend::PoolStats;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use strata_cache::QueryCacheStats;

/// Smoothing factor of the running latency average.
const LATENCY_ALPHA: f64 = 0.1;

/// Connection pool gauges, refreshed by the health monitor.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PoolMetrics {
    pub max_open: usize,
    pub open_connections: usize,
    pub in_use: usize,
    pub idle: usize,
    pub wait_count: u64,
    pub wait_duration_ms: u64,
}

/// Counters and gauges for one connection manager.
///
/// Counters only grow; `avg_query_ms` is an exponential moving average seeded
/// by the first observation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DatabaseMetrics {
    pub query_count: u64,
    pub slow_query_count: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub avg_query_ms: f64,
    pub pool: PoolMetrics,
}

/// Metrics handle shared between the manager and its health monitor.
pub type SharedMetrics = Arc<RwLock<DatabaseMetrics>>;

impl DatabaseMetrics {
    pub fn shared() -> SharedMetrics {
        Arc::new(RwLock::new(Self::default()))
    }

    /// Fold one statement duration into the counters. Returns `true` when it
    /// crossed `slow_threshold`.
    pub fn record_query(&mut self, elapsed: Duration, slow_threshold: Duration) -> bool {
        let ms = elapsed.as_secs_f64() * 1000.0;
        self.avg_query_ms = if self.query_count == 0 {
            ms
        } else {
            self.avg_query_ms * (1.0 - LATENCY_ALPHA) + ms * LATENCY_ALPHA
        };
        self.query_count += 1;

        metrics::counter!("strata_db_queries_total").increment(1);
        metrics::histogram!("strata_db_query_seconds").record(elapsed.as_secs_f64());

        let slow = elapsed > slow_threshold;
        if slow {
            self.slow_query_count += 1;
            metrics::counter!("strata_db_slow_queries_total").increment(1);
        }
        slow
    }

    pub fn record_cache_hit(&mut self) {
        self.cache_hits += 1;
        metrics::counter!("strata_db_query_cache_hits_total").increment(1);
    }

    pub fn record_cache_miss(&mut self) {
        self.cache_misses += 1;
        metrics::counter!("strata_db_query_cache_misses_total").increment(1);
    }

    pub fn update_pool(&mut self, stats: &PoolStats) {
        self.pool = PoolMetrics {
            max_open: stats.max_open,
            open_connections: stats.open,
            in_use: stats.in_use,
            idle: stats.idle,
            wait_count: stats.wait_count,
            wait_duration_ms: u64::try_from(stats.wait_duration.as_millis()).unwrap_or(u64::MAX),
        };
        metrics::gauge!("strata_db_pool_open").set(stats.open as f64);
        metrics::gauge!("strata_db_pool_idle").set(stats.idle as f64);
        metrics::gauge!("strata_db_pool_in_use").set(stats.in_use as f64);
    }
}

/// Query result cache figures as reported by `ConnectionManager::metrics`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryCacheSnapshot {
    pub policy: &'static str,
    pub entries: usize,
    pub max_size: usize,
    pub total_hits: u64,
    pub ttl_secs: u64,
}

impl QueryCacheSnapshot {
    pub fn new(policy: &'static str, stats: QueryCacheStats) -> Self {
        Self {
            policy,
            entries: stats.entries,
            max_size: stats.max_size,
            total_hits: stats.total_hits,
            ttl_secs: stats.ttl.as_secs(),
        }
    }
}

/// Everything `ConnectionManager::metrics` returns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub database: DatabaseMetrics,
    pub query_cache: QueryCacheSnapshot,
    pub read_write_ratio: f64,
    pub has_replica: bool,
}

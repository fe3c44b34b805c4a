use crate::backend::{QueryResult, SqlBackend, SqlParams};
use crate::config::{DatabaseConfig, PoolConfig};
use crate::error::{DbError, DbResult};
use crate::metrics::{DatabaseMetrics, MetricsSnapshot, QueryCacheSnapshot, SharedMetrics};
use crate::postgres::PgBackend;
use crate::statement::StatementKind;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use strata_cache::QueryResultCache;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Liveness probe budget when the manager is built.
const OPEN_PING_TIMEOUT: Duration = Duration::from_secs(10);
/// Probe budget for each health-monitor tick.
const MONITOR_PING_TIMEOUT: Duration = Duration::from_secs(5);
/// Probe budget for `health()`.
const HEALTH_TIMEOUT: Duration = Duration::from_secs(1);

/// Owns the primary and optional replica backends, the query result cache and
/// the background health monitor.
///
/// Reads go to the replica when one is configured, writes always go to the
/// primary. Replica failures are not retried against the primary.
pub struct ConnectionManager {
    primary: Arc<dyn SqlBackend>,
    replica: Option<Arc<dyn SqlBackend>>,
    cache: QueryResultCache<Arc<QueryResult>>,
    metrics: SharedMetrics,
    config: PoolConfig,
    shutdown: CancellationToken,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Connect to PostgreSQL using `config`.
    pub async fn open(config: &DatabaseConfig) -> DbResult<Self> {
        config.pool.validate()?;
        let primary: Arc<dyn SqlBackend> =
            Arc::new(PgBackend::connect("primary", &config.url, &config.pool)?);
        let replica = match &config.replica_url {
            Some(url) => {
                let backend: Arc<dyn SqlBackend> =
                    Arc::new(PgBackend::connect("replica", url, &config.pool)?);
                Some(backend)
            }
            None => None,
        };
        Self::with_backends(primary, replica, config.pool.clone()).await
    }

    /// Build a manager over existing backends.
    ///
    /// Fails, after closing the backends, if the primary does not answer a
    /// ping within 10 seconds. On success the health monitor is running.
    pub async fn with_backends(
        primary: Arc<dyn SqlBackend>,
        replica: Option<Arc<dyn SqlBackend>>,
        config: PoolConfig,
    ) -> DbResult<Self> {
        config.validate()?;

        if let Err(err) = ping_within(primary.as_ref(), OPEN_PING_TIMEOUT).await {
            tracing::error!(error = %err, "initial database ping failed");
            if let Some(replica) = &replica {
                let _ = replica.close().await;
            }
            let _ = primary.close().await;
            return Err(err);
        }

        let metrics = DatabaseMetrics::shared();
        metrics.write().update_pool(&primary.stats());

        let shutdown = CancellationToken::new();
        let monitor = spawn_health_monitor(
            Arc::clone(&primary),
            Arc::clone(&metrics),
            config.health_check_interval(),
            shutdown.clone(),
        );

        tracing::info!(
            primary = primary.label(),
            replica = replica.as_ref().map_or("none", |r| r.label()),
            read_write_ratio = config.read_write_ratio,
            query_cache_size = config.query_cache_size,
            query_cache_ttl_secs = config.query_cache_ttl_secs,
            "connection manager ready"
        );

        Ok(Self {
            primary,
            replica,
            cache: QueryResultCache::new(config.query_cache_size, config.query_cache_ttl()),
            metrics,
            config,
            shutdown,
            monitor: Mutex::new(Some(monitor)),
        })
    }

    /// Run `sql`, serving read statements from the query cache when possible.
    ///
    /// Writes bypass the cache and run on the primary. Reads that miss run on
    /// the read connection and are cached under `cache_key`. Errors are
    /// returned as-is and leave the cache untouched.
    pub async fn query_with_cache(
        &self,
        cache_key: &str,
        sql: &str,
        params: SqlParams<'_>,
    ) -> DbResult<Arc<QueryResult>> {
        if !StatementKind::classify(sql).is_read() {
            let result = self.timed_query(self.primary.as_ref(), sql, params).await?;
            return Ok(Arc::new(result));
        }

        if let Some(hit) = self.cache.get(cache_key) {
            self.metrics.write().record_cache_hit();
            tracing::debug!(key = %cache_key, "query cache HIT");
            return Ok(hit);
        }

        let backend = self.read_connection();
        let result = Arc::new(self.timed_query(backend.as_ref(), sql, params).await?);
        self.metrics.write().record_cache_miss();
        self.cache.set(cache_key, Arc::clone(&result));
        tracing::debug!(key = %cache_key, rows = result.len(), "query cache MISS");
        Ok(result)
    }

    /// Execute a write or DDL statement on the primary and record its latency.
    pub async fn exec_with_metrics(&self, sql: &str, params: SqlParams<'_>) -> DbResult<u64> {
        let started = Instant::now();
        let result = self.primary.execute(sql, params).await;
        self.observe(sql, started.elapsed());
        result
    }

    /// Replica if configured, else the primary.
    pub fn read_connection(&self) -> Arc<dyn SqlBackend> {
        match &self.replica {
            Some(replica) => Arc::clone(replica),
            None => Arc::clone(&self.primary),
        }
    }

    pub fn write_connection(&self) -> Arc<dyn SqlBackend> {
        Arc::clone(&self.primary)
    }

    /// Ping the primary with a one second budget.
    pub async fn health(&self) -> DbResult<()> {
        ping_within(self.primary.as_ref(), HEALTH_TIMEOUT)
            .await
            .map_err(|err| DbError::HealthCheck(err.to_string()))
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            database: self.metrics.read().clone(),
            query_cache: QueryCacheSnapshot::new(self.cache.policy_name(), self.cache.stats()),
            read_write_ratio: self.config.read_write_ratio,
            has_replica: self.replica.is_some(),
        }
    }

    pub fn clear_query_cache(&self) {
        self.cache.clear();
    }

    /// Stop the health monitor, drop cached results and close both backends.
    ///
    /// A failing replica close is logged; a failing primary close is returned.
    pub async fn close(&self) -> DbResult<()> {
        self.shutdown.cancel();
        let monitor = self.monitor.lock().take();
        if let Some(handle) = monitor {
            let _ = handle.await;
        }

        self.cache.clear();

        if let Some(replica) = &self.replica {
            if let Err(err) = replica.close().await {
                tracing::warn!(error = %err, backend = replica.label(), "failed to close replica");
            }
        }
        self.primary.close().await?;
        tracing::info!("connection manager closed");
        Ok(())
    }

    async fn timed_query(
        &self,
        backend: &dyn SqlBackend,
        sql: &str,
        params: SqlParams<'_>,
    ) -> DbResult<QueryResult> {
        let started = Instant::now();
        let result = backend.query(sql, params).await;
        self.observe(sql, started.elapsed());
        result
    }

    fn observe(&self, sql: &str, elapsed: Duration) {
        let threshold = self.config.slow_query_threshold();
        let slow = self.metrics.write().record_query(elapsed, threshold);
        if slow {
            tracing::warn!(
                elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                threshold_ms = self.config.slow_query_ms,
                query = %abbreviate(sql),
                "slow query"
            );
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn ping_within(backend: &dyn SqlBackend, limit: Duration) -> DbResult<()> {
    match tokio::time::timeout(limit, backend.ping()).await {
        Ok(result) => result,
        Err(_) => Err(DbError::Timeout(limit)),
    }
}

/// Periodic liveness probe and pool-gauge refresh, stopped by `shutdown`.
fn spawn_health_monitor(
    primary: Arc<dyn SqlBackend>,
    metrics: SharedMetrics,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = health_tick(primary.as_ref(), &metrics) => {}
            }
        }
        tracing::debug!("health monitor stopped");
    })
}

async fn health_tick(primary: &dyn SqlBackend, metrics: &SharedMetrics) {
    if let Err(err) = ping_within(primary, MONITOR_PING_TIMEOUT).await {
        tracing::warn!(error = %err, backend = primary.label(), "database health check failed");
        metrics::counter!("strata_db_health_failures_total").increment(1);
    }
    primary.prune_idle();
    let stats = primary.stats();
    metrics.write().update_pool(&stats);
}

/// First line of a statement, capped for log output.
fn abbreviate(sql: &str) -> String {
    const MAX: usize = 120;
    let line = sql.trim().lines().next().unwrap_or_default();
    if line.chars().count() > MAX {
        let cut: String = line.chars().take(MAX).collect();
        format!("{cut}...")
    } else {
        line.to_string()
    }
}

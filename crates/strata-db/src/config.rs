use crate::error::{DbError, DbResult};
use serde::Deserialize;
use std::time::Duration;

/// Connection targets plus pool policy.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Primary (read-write) connection string, e.g. `postgres://user:pw@host/db`.
    pub url: String,
    /// Optional read replica. Reads go here when set.
    #[serde(default)]
    pub replica_url: Option<String>,
    #[serde(default)]
    pub pool: PoolConfig,
}

/// Pool limits, health monitoring and query-cache sizing.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_max_open")]
    pub max_open: usize,
    #[serde(default = "default_max_idle")]
    pub max_idle: usize,
    #[serde(default = "default_conn_max_lifetime_secs")]
    pub conn_max_lifetime_secs: u64,
    #[serde(default = "default_conn_max_idle_secs")]
    pub conn_max_idle_secs: u64,
    /// Share of traffic expected to be reads. Reported only.
    #[serde(default = "default_read_write_ratio")]
    pub read_write_ratio: f64,
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,
    #[serde(default = "default_slow_query_ms")]
    pub slow_query_ms: u64,
    #[serde(default = "default_query_cache_size")]
    pub query_cache_size: usize,
    #[serde(default = "default_query_cache_ttl_secs")]
    pub query_cache_ttl_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_open: default_max_open(),
            max_idle: default_max_idle(),
            conn_max_lifetime_secs: default_conn_max_lifetime_secs(),
            conn_max_idle_secs: default_conn_max_idle_secs(),
            read_write_ratio: default_read_write_ratio(),
            health_check_interval_secs: default_health_check_interval_secs(),
            slow_query_ms: default_slow_query_ms(),
            query_cache_size: default_query_cache_size(),
            query_cache_ttl_secs: default_query_cache_ttl_secs(),
        }
    }
}

impl PoolConfig {
    /// Reject settings the pool cannot honour.
    pub fn validate(&self) -> DbResult<()> {
        if self.max_open == 0 {
            return Err(DbError::Config("max_open must be at least 1".into()));
        }
        if self.max_idle > self.max_open {
            return Err(DbError::Config(format!(
                "max_idle ({}) exceeds max_open ({})",
                self.max_idle, self.max_open
            )));
        }
        if !(0.0..=1.0).contains(&self.read_write_ratio) {
            return Err(DbError::Config(format!(
                "read_write_ratio must be within [0, 1], got {}",
                self.read_write_ratio
            )));
        }
        if self.health_check_interval_secs == 0 {
            return Err(DbError::Config(
                "health_check_interval_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn conn_max_lifetime(&self) -> Duration {
        Duration::from_secs(self.conn_max_lifetime_secs)
    }

    pub fn conn_max_idle_time(&self) -> Duration {
        Duration::from_secs(self.conn_max_idle_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn slow_query_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_query_ms)
    }

    pub fn query_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.query_cache_ttl_secs)
    }
}

fn default_max_open() -> usize {
    25
}
fn default_max_idle() -> usize {
    10
}
fn default_conn_max_lifetime_secs() -> u64 {
    30 * 60
}
fn default_conn_max_idle_secs() -> u64 {
    5 * 60
}
fn default_read_write_ratio() -> f64 {
    0.8
}
fn default_health_check_interval_secs() -> u64 {
    30
}
fn default_slow_query_ms() -> u64 {
    100
}
fn default_query_cache_size() -> usize {
    1000
}
fn default_query_cache_ttl_secs() -> u64 {
    5 * 60
}

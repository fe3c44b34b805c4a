//! PostgreSQL backend on a `deadpool-postgres` pool.

use crate::backend::{PoolStats, QueryResult, SqlBackend, SqlParams};
use crate::config::PoolConfig;
use crate::error::DbResult;
use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio_postgres::types::Type;
use tokio_postgres::{NoTls, Row};

#[derive(Default)]
struct WaitStats {
    count: u64,
    total: Duration,
}

/// One pool against one server (primary or replica).
pub struct PgBackend {
    label: String,
    pool: Pool,
    max_idle: usize,
    max_lifetime: Duration,
    max_idle_time: Duration,
    waits: Mutex<WaitStats>,
}

impl PgBackend {
    /// Build the pool. No connection is made until first use.
    pub fn connect(label: &str, url: &str, config: &PoolConfig) -> DbResult<Self> {
        config.validate()?;

        let mut cfg = Config::new();
        cfg.url = Some(url.to_string());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg.pool = Some(deadpool_postgres::PoolConfig::new(config.max_open));

        let pool = cfg.create_pool(Some(Runtime::Tokio1), NoTls)?;

        tracing::info!(
            backend = label,
            max_open = config.max_open,
            max_idle = config.max_idle,
            max_lifetime_secs = config.conn_max_lifetime_secs,
            max_idle_secs = config.conn_max_idle_secs,
            "postgres pool created"
        );

        Ok(Self {
            label: label.to_string(),
            pool,
            max_idle: config.max_idle,
            max_lifetime: config.conn_max_lifetime(),
            max_idle_time: config.conn_max_idle_time(),
            waits: Mutex::new(WaitStats::default()),
        })
    }

    /// Check out a connection, recording the wait if none was free.
    async fn get_conn(&self) -> DbResult<deadpool_postgres::Object> {
        let contended = self.pool.status().available == 0;
        let started = Instant::now();
        let conn = self.pool.get().await?;
        if contended {
            let mut waits = self.waits.lock();
            waits.count += 1;
            waits.total += started.elapsed();
        }
        Ok(conn)
    }
}

#[async_trait]
impl SqlBackend for PgBackend {
    fn label(&self) -> &str {
        &self.label
    }

    async fn query(&self, sql: &str, params: SqlParams<'_>) -> DbResult<QueryResult> {
        let conn = self.get_conn().await?;
        let statement = conn.prepare_cached(sql).await?;
        let columns = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        let rows = conn.query(&statement, params).await?;

        let rows = rows
            .iter()
            .map(row_to_json)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(QueryResult { columns, rows })
    }

    async fn execute(&self, sql: &str, params: SqlParams<'_>) -> DbResult<u64> {
        let conn = self.get_conn().await?;
        Ok(conn.execute(sql, params).await?)
    }

    async fn ping(&self) -> DbResult<()> {
        let conn = self.get_conn().await?;
        conn.simple_query("SELECT 1").await?;
        Ok(())
    }

    fn stats(&self) -> PoolStats {
        let status = self.pool.status();
        let waits = self.waits.lock();
        PoolStats {
            max_open: status.max_size,
            open: status.size,
            in_use: status.size.saturating_sub(status.available),
            idle: status.available,
            wait_count: waits.count,
            wait_duration: waits.total,
        }
    }

    fn prune_idle(&self) {
        let kept = AtomicUsize::new(0);
        let max_lifetime = self.max_lifetime;
        let max_idle_time = self.max_idle_time;
        let max_idle = self.max_idle;

        // `retain` walks idle connections only.
        let _ = self.pool.retain(|_, metrics| {
            if metrics.age() > max_lifetime || metrics.last_used() > max_idle_time {
                return false;
            }
            kept.fetch_add(1, Ordering::Relaxed) < max_idle
        });
    }

    async fn close(&self) -> DbResult<()> {
        self.pool.close();
        tracing::info!(backend = %self.label, "postgres pool closed");
        Ok(())
    }
}

fn row_to_json(row: &Row) -> Result<Vec<JsonValue>, tokio_postgres::Error> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| column_to_json(row, idx, column.type_()))
        .collect()
}

fn column_to_json(row: &Row, idx: usize, ty: &Type) -> Result<JsonValue, tokio_postgres::Error> {
    let value = match ty.name() {
        "bool" => row.try_get::<_, Option<bool>>(idx)?.map(JsonValue::from),
        "int2" => row.try_get::<_, Option<i16>>(idx)?.map(JsonValue::from),
        "int4" => row.try_get::<_, Option<i32>>(idx)?.map(JsonValue::from),
        "int8" => row.try_get::<_, Option<i64>>(idx)?.map(JsonValue::from),
        "float4" => row.try_get::<_, Option<f32>>(idx)?.map(JsonValue::from),
        "float8" => row.try_get::<_, Option<f64>>(idx)?.map(JsonValue::from),
        "json" | "jsonb" => row.try_get::<_, Option<JsonValue>>(idx)?,
        "uuid" => row
            .try_get::<_, Option<uuid::Uuid>>(idx)?
            .map(|id| JsonValue::String(id.to_string())),
        "timestamptz" => row
            .try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)?
            .map(|ts| JsonValue::String(ts.to_rfc3339())),
        "timestamp" => row
            .try_get::<_, Option<chrono::NaiveDateTime>>(idx)?
            .map(|ts| JsonValue::String(ts.to_string())),
        "date" => row
            .try_get::<_, Option<chrono::NaiveDate>>(idx)?
            .map(|d| JsonValue::String(d.to_string())),
        // Text-like columns; anything else without a mapping reads as null.
        _ => row.try_get::<_, Option<String>>(idx).ok().flatten().map(JsonValue::String),
    };
    Ok(value.unwrap_or(JsonValue::Null))
}


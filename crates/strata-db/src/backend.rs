use crate::error::DbResult;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tokio_postgres::types::ToSql;

/// Statement parameters, in the form `tokio-postgres` binds them.
pub type SqlParams<'a> = &'a [&'a (dyn ToSql + Sync)];

/// Materialised result set. Rows hold one JSON value per column.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<JsonValue>>,
}

impl QueryResult {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows as JSON objects keyed by column name.
    pub fn to_objects(&self) -> Vec<JsonValue> {
        self.rows
            .iter()
            .map(|row| {
                let object = self
                    .columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect::<serde_json::Map<_, _>>();
                JsonValue::Object(object)
            })
            .collect()
    }
}

/// Pool gauges reported by a backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub max_open: usize,
    pub open: usize,
    pub in_use: usize,
    pub idle: usize,
    /// Checkouts that had to wait for a free connection.
    pub wait_count: u64,
    /// Total time spent waiting in those checkouts.
    pub wait_duration: Duration,
}

/// SQL execution seam used by the connection manager.
///
/// Pooling and connection-level concurrency belong to the implementation; the
/// manager only routes, times and caches.
#[async_trait]
pub trait SqlBackend: Send + Sync {
    /// Short label used in logs (`primary`, `replica`).
    fn label(&self) -> &str;

    async fn query(&self, sql: &str, params: SqlParams<'_>) -> DbResult<QueryResult>;

    /// Run a statement that returns no rows; yields the affected row count.
    async fn execute(&self, sql: &str, params: SqlParams<'_>) -> DbResult<u64>;

    async fn ping(&self) -> DbResult<()>;

    fn stats(&self) -> PoolStats;

    /// Drop idle connections past their lifetime or idle-time limits.
    fn prune_idle(&self) {}

    async fn close(&self) -> DbResult<()>;
}

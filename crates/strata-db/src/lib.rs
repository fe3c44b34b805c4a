//! PostgreSQL connection management with read/write routing, a query result
//! cache and query metrics.

pub mod backend;
pub mod config;
pub mod error;
pub mod manager;
pub mod metrics;
pub mod postgres;
pub mod statement;

pub use backend::{PoolStats, QueryResult, SqlBackend, SqlParams};
pub use config::{DatabaseConfig, PoolConfig};
pub use error::{DbError, DbResult};
pub use manager::ConnectionManager;
pub use metrics::{DatabaseMetrics, MetricsSnapshot, PoolMetrics, QueryCacheSnapshot};
pub use postgres::PgBackend;
pub use statement::StatementKind;

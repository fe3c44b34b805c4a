use std::time::Duration;
use thiserror::Error;

/// Errors raised by the connection manager and its backends.
#[derive(Debug, Error)]
pub enum DbError {
    /// Invalid settings; fatal at construction.
    #[error("invalid database configuration: {0}")]
    Config(String),

    #[error("failed to create connection pool: {0}")]
    CreatePool(#[from] deadpool_postgres::CreatePoolError),

    #[error("connection pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// Statement failed in the database. Passed through to callers unchanged.
    #[error("query failed: {0}")]
    Query(#[from] tokio_postgres::Error),

    /// Backend-specific failure not covered by the variants above.
    #[error("database backend error: {0}")]
    Backend(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("health check failed: {0}")]
    HealthCheck(String),
}

pub type DbResult<T> = Result<T, DbError>;

//! Layered key-value store behind the HTTP response cache.
//!
//! The in-process tier lives in [`TieredStore`]; the optional remote tier is a
//! RESP2 server reached through [`RespStore`].

mod resp;
mod tiered;

#[cfg(test)]
pub(crate) mod fake;

pub use resp::RespStore;
pub use tiered::{L1Policy, TieredStore};

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Retention class of a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Fast and short-lived: in-process only.
    Hot,
    /// Slower and longer-lived: remote when available.
    Warm,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store command timed out after {0:?}")]
    Timeout(Duration),

    #[error("RESP protocol error: {0}")]
    Protocol(String),

    #[error("remote store replied with error: {0}")]
    Remote(String),
}

/// Key-value contract consumed by the response cache.
#[async_trait]
pub trait LayeredStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError>;

    async fn set(&self, key: &str, value: Bytes, tier: Tier) -> Result<(), StoreError>;

    async fn delete(&self, keys: &[String]) -> Result<(), StoreError>;
}

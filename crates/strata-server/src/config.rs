use crate::response_cache::{default_statuses, HttpCacheConfig};
use crate::store::L1Policy;
use axum::http::{HeaderName, Method};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use strata_db::DatabaseConfig;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    /// Absent: the catalog serves built-in mock data.
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub http_cache: HttpCacheSection,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// `[http_cache]` as written in the file; see [`HttpCacheSection::to_config`].
#[derive(Debug, Clone, Deserialize)]
pub struct HttpCacheSection {
    #[serde(default = "default_http_ttl")]
    pub ttl_seconds: u64,
    #[serde(default = "default_max_size")]
    pub max_size_bytes: usize,
    /// Defaults to 2xx, 3xx, 404 and 410.
    #[serde(default)]
    pub cacheable_statuses: Option<Vec<u16>>,
    #[serde(default = "default_methods")]
    pub cacheable_methods: Vec<String>,
    #[serde(default = "default_excluded_prefixes")]
    pub excluded_prefixes: Vec<String>,
    #[serde(default = "default_vary_headers")]
    pub vary_headers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default)]
    pub policy: L1Policy,
    #[serde(default = "default_hot_ttl")]
    pub hot_ttl_seconds: u64,
    #[serde(default = "default_warm_ttl")]
    pub warm_ttl_seconds: u64,
    #[serde(default)]
    pub remote: Option<RemoteStoreConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteStoreConfig {
    pub addr: String,
    #[serde(default = "default_remote_timeout_ms")]
    pub timeout_ms: u64,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.http_cache.to_config()?;
        if let Some(db) = &config.database {
            db.pool
                .validate()
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        Ok(config)
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl HttpCacheSection {
    /// Parse method and header names into the middleware policy.
    pub fn to_config(&self) -> Result<HttpCacheConfig, ConfigError> {
        let cacheable_methods = self
            .cacheable_methods
            .iter()
            .map(|m| {
                Method::from_bytes(m.to_ascii_uppercase().as_bytes())
                    .map_err(|_| ConfigError::Invalid(format!("invalid HTTP method `{m}`")))
            })
            .collect::<Result<_, _>>()?;

        let vary_headers = self
            .vary_headers
            .iter()
            .map(|h| {
                HeaderName::from_bytes(h.to_ascii_lowercase().as_bytes())
                    .map_err(|_| ConfigError::Invalid(format!("invalid header name `{h}`")))
            })
            .collect::<Result<_, _>>()?;

        let cacheable_statuses = match &self.cacheable_statuses {
            Some(codes) => {
                if let Some(bad) = codes.iter().find(|c| !(100..=599).contains(*c)) {
                    return Err(ConfigError::Invalid(format!("invalid status code {bad}")));
                }
                codes.iter().copied().collect()
            }
            None => default_statuses(),
        };

        Ok(HttpCacheConfig {
            ttl: Duration::from_secs(self.ttl_seconds),
            max_size: self.max_size_bytes,
            cacheable_statuses,
            cacheable_methods,
            excluded_prefixes: self.excluded_prefixes.clone(),
            vary_headers,
        })
    }
}

impl StoreConfig {
    pub fn hot_ttl(&self) -> Duration {
        Duration::from_secs(self.hot_ttl_seconds)
    }

    pub fn warm_ttl(&self) -> Duration {
        Duration::from_secs(self.warm_ttl_seconds)
    }
}

impl RemoteStoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            metrics_addr: default_metrics_addr(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for HttpCacheSection {
    fn default() -> Self {
        Self {
            ttl_seconds: default_http_ttl(),
            max_size_bytes: default_max_size(),
            cacheable_statuses: None,
            cacheable_methods: default_methods(),
            excluded_prefixes: default_excluded_prefixes(),
            vary_headers: default_vary_headers(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            policy: L1Policy::default(),
            hot_ttl_seconds: default_hot_ttl(),
            warm_ttl_seconds: default_warm_ttl(),
            remote: None,
        }
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_metrics_addr() -> String {
    "0.0.0.0:9090".to_string()
}
fn default_request_timeout_ms() -> u64 {
    10_000
}
fn default_http_ttl() -> u64 {
    5 * 60
}
fn default_max_size() -> usize {
    100 * 1024 * 1024
}
fn default_methods() -> Vec<String> {
    vec!["GET".to_string(), "HEAD".to_string()]
}
fn default_excluded_prefixes() -> Vec<String> {
    ["/health", "/metrics", "/auth", "/api/auth"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_vary_headers() -> Vec<String> {
    ["accept", "accept-encoding", "authorization"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_capacity() -> usize {
    10_000
}
fn default_hot_ttl() -> u64 {
    60
}
fn default_warm_ttl() -> u64 {
    60 * 60
}
fn default_remote_timeout_ms() -> u64 {
    500
}

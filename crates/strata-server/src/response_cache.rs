//! Whole-response caching for safe, idempotent requests.
//!
//! [`response_cache_middleware`] derives a key for each cacheable request,
//! replays a stored [`CachedResponse`] on a hit, and on a miss runs the inner
//! handler. Storable responses are buffered and a snapshot is written in the
//! background; everything else streams through untouched. Cache failures
//! never change what the client receives.

use crate::store::{LayeredStore, Tier};
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{
    HeaderName, HeaderValue, AGE, CACHE_CONTROL, CONNECTION, CONTENT_TYPE, TRANSFER_ENCODING,
};
use axum::http::{response, HeaderMap, Method, StatusCode, Uri};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http_body_util::BodyExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Namespace of every key written by the middleware.
pub const KEY_PREFIX: &str = "http_cache:";

pub const X_CACHE: &str = "x-cache";
pub const X_CACHE_DATE: &str = "x-cache-date";

/// Immutable per-middleware policy.
#[derive(Debug, Clone)]
pub struct HttpCacheConfig {
    pub ttl: Duration,
    /// Largest body, in bytes, that may be stored.
    pub max_size: usize,
    pub cacheable_statuses: HashSet<u16>,
    pub cacheable_methods: HashSet<Method>,
    pub excluded_prefixes: Vec<String>,
    /// Headers whose values take part in the key, in key order.
    pub vary_headers: Vec<HeaderName>,
}

impl Default for HttpCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(5 * 60),
            max_size: 100 * 1024 * 1024,
            cacheable_statuses: default_statuses(),
            cacheable_methods: HashSet::from([Method::GET, Method::HEAD]),
            excluded_prefixes: ["/health", "/metrics", "/auth", "/api/auth"]
                .into_iter()
                .map(String::from)
                .collect(),
            vary_headers: vec![
                axum::http::header::ACCEPT,
                axum::http::header::ACCEPT_ENCODING,
                axum::http::header::AUTHORIZATION,
            ],
        }
    }
}

/// 2xx, 3xx, 404 and 410.
pub fn default_statuses() -> HashSet<u16> {
    (200..400).chain([404, 410]).collect()
}

/// Snapshot of one response, as written to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    /// Header names in first-seen order, each with all of its values.
    pub headers: Vec<(String, Vec<String>)>,
    #[serde(with = "base64_body")]
    pub body: Bytes,
    pub created_at: DateTime<Utc>,
    pub ttl_ms: u64,
    pub size: usize,
}

impl CachedResponse {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.created_at).to_std().unwrap_or_default()
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.age(now) > Duration::from_millis(self.ttl_ms)
    }
}

mod base64_body {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

/// Outcome of [`ResponseCache::lookup`].
#[derive(Debug)]
pub enum Lookup {
    Hit(CachedResponse),
    Miss,
    /// The key holds a stale or undecodable snapshot. The caller overwrites
    /// it with a fresh one or removes it with [`ResponseCache::evict`].
    Invalid,
}

/// Why a captured response was not stored.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("response body of {size} bytes exceeds cache limit of {max} bytes")]
    TooLarge { size: usize, max: usize },

    #[error("failed to encode cached response: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Cumulative counters of the middleware.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct HttpCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub errors: u64,
    /// `hits / (hits + misses) * 100`, zero before any traffic.
    pub hit_rate: f64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: u64,
    misses: u64,
    sets: u64,
    errors: u64,
}

/// Counter set shared between the middleware and the stats endpoints.
#[derive(Debug, Default)]
pub struct HttpCacheMetrics {
    counters: Mutex<Counters>,
}

impl HttpCacheMetrics {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_hit(&self) {
        self.counters.lock().hits += 1;
        metrics::counter!("strata_http_cache_hits_total").increment(1);
    }

    pub fn record_miss(&self) {
        self.counters.lock().misses += 1;
        metrics::counter!("strata_http_cache_misses_total").increment(1);
    }

    pub fn record_set(&self) {
        self.counters.lock().sets += 1;
        metrics::counter!("strata_http_cache_sets_total").increment(1);
    }

    pub fn record_error(&self) {
        self.counters.lock().errors += 1;
        metrics::counter!("strata_http_cache_errors_total").increment(1);
    }

    pub fn snapshot(&self) -> HttpCacheStats {
        let c = self.counters.lock();
        let lookups = c.hits + c.misses;
        HttpCacheStats {
            hits: c.hits,
            misses: c.misses,
            sets: c.sets,
            errors: c.errors,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                c.hits as f64 / lookups as f64 * 100.0
            },
        }
    }
}

/// Response cache bound to one store and one policy.
pub struct ResponseCache {
    config: HttpCacheConfig,
    store: Arc<dyn LayeredStore>,
    metrics: Arc<HttpCacheMetrics>,
}

impl ResponseCache {
    pub fn new(
        config: HttpCacheConfig,
        store: Arc<dyn LayeredStore>,
        metrics: Arc<HttpCacheMetrics>,
    ) -> Self {
        Self {
            config,
            store,
            metrics,
        }
    }

    pub fn stats(&self) -> HttpCacheStats {
        self.metrics.snapshot()
    }

    /// Method is cacheable and the path is outside every excluded prefix.
    pub fn is_cacheable_request(&self, method: &Method, path: &str) -> bool {
        self.config.cacheable_methods.contains(method)
            && !self
                .config
                .excluded_prefixes
                .iter()
                .any(|prefix| path.starts_with(prefix.as_str()))
    }

    /// Whether a response with this status and these headers may be stored.
    pub fn is_storable(&self, status: StatusCode, headers: &HeaderMap) -> bool {
        self.config.cacheable_statuses.contains(&status.as_u16()) && !forbids_storage(headers)
    }

    /// `http_cache:` followed by the hex SHA-256 of method, path, raw query
    /// and every value of each vary header present on the request.
    ///
    /// Every field is hashed behind its length, so no field can be forged
    /// from the bytes of its neighbour.
    pub fn generate_key(&self, method: &Method, uri: &Uri, headers: &HeaderMap) -> String {
        let mut hasher = Sha256::new();
        hash_field(&mut hasher, method.as_str().as_bytes());
        hash_field(&mut hasher, uri.path().as_bytes());
        hash_field(&mut hasher, uri.query().unwrap_or_default().as_bytes());

        for name in &self.config.vary_headers {
            let values = headers.get_all(name);
            let count = values.iter().count();
            if count == 0 {
                continue;
            }
            hash_field(&mut hasher, name.as_str().as_bytes());
            hasher.update((count as u64).to_be_bytes());
            for value in values.iter() {
                hash_field(&mut hasher, value.as_bytes());
            }
        }

        format!("{KEY_PREFIX}{}", hex::encode(hasher.finalize()))
    }

    /// Fetch and decode the snapshot under `key`.
    ///
    /// Store failures are counted as errors and read as a miss. Undecodable
    /// snapshots are counted as errors and, like stale ones, come back as
    /// [`Lookup::Invalid`].
    pub async fn lookup(&self, key: &str) -> Lookup {
        let raw = match self.store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Lookup::Miss,
            Err(err) => {
                self.metrics.record_error();
                tracing::warn!(key = %key, error = %err, "response cache lookup failed");
                return Lookup::Miss;
            }
        };

        match serde_json::from_slice::<CachedResponse>(&raw) {
            Ok(cached) if cached.is_stale(Utc::now()) => {
                tracing::debug!(key = %key, "response cache entry stale");
                Lookup::Invalid
            }
            Ok(cached) => Lookup::Hit(cached),
            Err(err) => {
                self.metrics.record_error();
                tracing::warn!(key = %key, error = %err, "corrupt response cache entry");
                Lookup::Invalid
            }
        }
    }

    /// Replay a snapshot with `X-Cache: HIT`, `X-Cache-Date` and `Age`.
    pub fn serve(&self, cached: &CachedResponse) -> Response {
        let mut response = Response::new(Body::from(cached.body.clone()));
        *response.status_mut() =
            StatusCode::from_u16(cached.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let headers = response.headers_mut();
        for (name, values) in &cached.headers {
            let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
                continue;
            };
            for value in values {
                if let Ok(value) = HeaderValue::from_str(value) {
                    headers.append(name.clone(), value);
                }
            }
        }

        headers.insert(X_CACHE, HeaderValue::from_static("HIT"));
        let date = cached.created_at.format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        if let Ok(date) = HeaderValue::from_str(&date) {
            headers.insert(X_CACHE_DATE, date);
        }
        headers.insert(AGE, HeaderValue::from(cached.age(Utc::now()).as_secs()));
        response
    }

    /// Store a captured response when its status and size allow it.
    ///
    /// Returns `Ok(false)` when the response is simply not cacheable. An
    /// oversized body is an error and is counted once. The store write runs
    /// in a spawned task; its outcome lands in the counters.
    pub fn capture_and_store(
        &self,
        key: String,
        parts: &response::Parts,
        body: &Bytes,
    ) -> Result<bool, CaptureError> {
        if !self.is_storable(parts.status, &parts.headers) {
            return Ok(false);
        }
        if body.len() > self.config.max_size {
            self.metrics.record_error();
            return Err(CaptureError::TooLarge {
                size: body.len(),
                max: self.config.max_size,
            });
        }

        let snapshot = CachedResponse {
            status: parts.status.as_u16(),
            headers: capture_headers(&parts.headers),
            body: body.clone(),
            created_at: Utc::now(),
            ttl_ms: u64::try_from(self.config.ttl.as_millis()).unwrap_or(u64::MAX),
            size: body.len(),
        };
        let encoded = match serde_json::to_vec(&snapshot) {
            Ok(encoded) => Bytes::from(encoded),
            Err(err) => {
                self.metrics.record_error();
                return Err(err.into());
            }
        };

        let store = Arc::clone(&self.store);
        let metrics = Arc::clone(&self.metrics);
        tokio::spawn(async move {
            match store.set(&key, encoded, Tier::Warm).await {
                Ok(()) => metrics.record_set(),
                Err(err) => {
                    metrics.record_error();
                    tracing::warn!(key = %key, error = %err, "response cache store failed");
                }
            }
        });
        Ok(true)
    }

    /// Delete `key` in the background.
    pub fn evict(&self, key: String) {
        let store = Arc::clone(&self.store);
        let keys = vec![key];
        tokio::spawn(async move {
            if let Err(err) = store.delete(&keys).await {
                tracing::warn!(key = %keys[0], error = %err, "failed to delete response cache entry");
            }
        });
    }
}

/// Axum middleware; install with `middleware::from_fn_with_state`.
pub async fn response_cache_middleware(
    State(cache): State<Arc<ResponseCache>>,
    request: Request,
    next: Next,
) -> Response {
    if !cache.is_cacheable_request(request.method(), request.uri().path()) {
        return next.run(request).await;
    }

    let key = cache.generate_key(request.method(), request.uri(), request.headers());
    let invalid = match cache.lookup(&key).await {
        Lookup::Hit(cached) => {
            cache.metrics.record_hit();
            tracing::debug!(key = %key, "response cache HIT");
            return cache.serve(&cached);
        }
        Lookup::Miss => false,
        Lookup::Invalid => true,
    };
    cache.metrics.record_miss();

    let response = next.run(request).await;

    // Not buffered: the body goes to the client as the handler produces it.
    if !cache.is_storable(response.status(), response.headers()) {
        if invalid {
            cache.evict(key);
        }
        tracing::debug!(status = response.status().as_u16(), "response cache MISS, not storable");
        return response;
    }

    let (parts, body) = response.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            tracing::error!(error = %err, "failed to buffer response body");
            if invalid {
                cache.evict(key);
            }
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    // A stored snapshot overwrites the invalid one; only evict when nothing
    // is written under the key.
    match cache.capture_and_store(key.clone(), &parts, &body) {
        Ok(true) => tracing::debug!(status = parts.status.as_u16(), "response cache MISS, stored"),
        Ok(false) => {
            if invalid {
                cache.evict(key);
            }
        }
        Err(err) => {
            tracing::warn!(error = %err, "response not cached");
            if invalid {
                cache.evict(key);
            }
        }
    }

    Response::from_parts(parts, Body::from(body))
}

/// `no-store` and `private` responses are never written, and event streams
/// are never buffered.
fn forbids_storage(headers: &HeaderMap) -> bool {
    let event_stream = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim_start().starts_with("text/event-stream"));

    event_stream
        || headers
            .get_all(CACHE_CONTROL)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .map(|d| d.trim().to_ascii_lowercase())
            .any(|d| d == "no-store" || d == "private")
}

fn hash_field(hasher: &mut Sha256, field: &[u8]) {
    hasher.update((field.len() as u64).to_be_bytes());
    hasher.update(field);
}

fn capture_headers(headers: &HeaderMap) -> Vec<(String, Vec<String>)> {
    headers
        .keys()
        .filter(|name| *name != TRANSFER_ENCODING && *name != CONNECTION)
        .map(|name| {
            let values = headers
                .get_all(name)
                .iter()
                .filter_map(|v| v.to_str().ok().map(str::to_string))
                .collect();
            (name.as_str().to_string(), values)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fake::FakeRedis;
    use crate::store::{L1Policy, RespStore, StoreError, TieredStore};
    use async_trait::async_trait;
    use axum::http::header::{ACCEPT, USER_AGENT};
    use axum::routing::get;
    use axum::{middleware, Router};
    use futures_util::StreamExt;
    use std::collections::HashMap;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    const LARGE_BODY: usize = 8 * 1024;

    #[derive(Default)]
    struct MemoryStore {
        entries: Mutex<HashMap<String, Bytes>>,
        tiers: Mutex<Vec<Tier>>,
    }

    impl MemoryStore {
        fn keys(&self) -> Vec<String> {
            self.entries.lock().keys().cloned().collect()
        }

        fn snapshot(&self, key: &str) -> Option<CachedResponse> {
            let raw = self.entries.lock().get(key).cloned()?;
            serde_json::from_slice(&raw).ok()
        }
    }

    #[async_trait]
    impl LayeredStore for MemoryStore {
        async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
            Ok(self.entries.lock().get(key).cloned())
        }

        async fn set(&self, key: &str, value: Bytes, tier: Tier) -> Result<(), StoreError> {
            self.tiers.lock().push(tier);
            self.entries.lock().insert(key.to_string(), value);
            Ok(())
        }

        async fn delete(&self, keys: &[String]) -> Result<(), StoreError> {
            let mut entries = self.entries.lock();
            for key in keys {
                entries.remove(key);
            }
            Ok(())
        }
    }

    struct FailingStore;

    #[async_trait]
    impl LayeredStore for FailingStore {
        async fn get(&self, _key: &str) -> Result<Option<Bytes>, StoreError> {
            Err(StoreError::Timeout(Duration::from_millis(50)))
        }

        async fn set(&self, _key: &str, _value: Bytes, _tier: Tier) -> Result<(), StoreError> {
            Err(StoreError::Remote("READONLY".into()))
        }

        async fn delete(&self, _keys: &[String]) -> Result<(), StoreError> {
            Err(StoreError::Remote("READONLY".into()))
        }
    }

    struct Harness {
        app: Router,
        cache: Arc<ResponseCache>,
        calls: Arc<AtomicUsize>,
    }

    fn harness(config: HttpCacheConfig, store: Arc<dyn LayeredStore>) -> Harness {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = Arc::new(ResponseCache::new(config, store, HttpCacheMetrics::shared()));

        let counter = Arc::clone(&calls);
        let items = move || {
            let counter = Arc::clone(&counter);
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                ([(CONTENT_TYPE, "text/plain")], format!("items-{n}"))
            }
        };
        let counter = Arc::clone(&calls);
        let health = move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                "ok"
            }
        };

        let app = Router::new()
            .route("/api/items", get(items.clone()).post(items))
            .route("/api/big", get(|| async { "x".repeat(64) }))
            .route("/api/large", get(|| async { "z".repeat(LARGE_BODY) }))
            .route(
                "/api/events",
                get(|| async {
                    let events = futures_util::stream::once(async {
                        Ok::<_, Infallible>(Bytes::from_static(b"data: tick\n\n"))
                    })
                    .chain(futures_util::stream::pending());
                    ([(CONTENT_TYPE, "text/event-stream")], Body::from_stream(events))
                }),
            )
            .route("/api/gone", get(|| async { (StatusCode::NOT_FOUND, "missing") }))
            .route("/api/broken", get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }))
            .route(
                "/api/private",
                get(|| async { ([(CACHE_CONTROL, "private, max-age=60")], "mine") }),
            )
            .route("/health", get(health))
            .layer(middleware::from_fn_with_state(
                Arc::clone(&cache),
                response_cache_middleware,
            ));

        Harness { app, cache, calls }
    }

    async fn send(app: &Router, method: Method, uri: &str) -> (StatusCode, HeaderMap, Bytes) {
        let request = axum::http::Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let (parts, body) = response.into_parts();
        (parts.status, parts.headers, body.collect().await.unwrap().to_bytes())
    }

    /// Stores run in a spawned task; poll until the counters catch up.
    async fn settle(cache: &ResponseCache, predicate: impl Fn(&HttpCacheStats) -> bool) {
        for _ in 0..200 {
            if predicate(&cache.stats()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("cache counters never settled: {:?}", cache.stats());
    }

    #[tokio::test]
    async fn second_get_is_served_from_cache() {
        let store = Arc::new(MemoryStore::default());
        let h = harness(HttpCacheConfig::default(), store.clone());

        let (status, headers, body) = send(&h.app, Method::GET, "/api/items?page=1").await;
        assert_eq!(status, StatusCode::OK);
        assert!(headers.get(X_CACHE).is_none());
        assert_eq!(body, "items-1");
        settle(&h.cache, |s| s.sets == 1).await;

        let (status, headers, body) = send(&h.app, Method::GET, "/api/items?page=1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "items-1");
        assert_eq!(headers[X_CACHE], "HIT");
        assert_eq!(headers[CONTENT_TYPE], "text/plain");
        assert!(headers.contains_key(X_CACHE_DATE));
        assert_eq!(headers[AGE], "0");
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);

        let stats = h.cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.sets), (1, 1, 1));
        assert!((stats.hit_rate - 50.0).abs() < f64::EPSILON);
        assert_eq!(*store.tiers.lock(), vec![Tier::Warm]);
    }

    #[tokio::test]
    async fn different_query_is_a_different_entry() {
        let h = harness(HttpCacheConfig::default(), Arc::new(MemoryStore::default()));

        send(&h.app, Method::GET, "/api/items?page=1").await;
        settle(&h.cache, |s| s.sets == 1).await;
        let (_, headers, body) = send(&h.app, Method::GET, "/api/items?page=2").await;

        assert!(headers.get(X_CACHE).is_none());
        assert_eq!(body, "items-2");
    }

    fn items_key(cache: &ResponseCache, uri: &'static str) -> String {
        cache.generate_key(&Method::GET, &Uri::from_static(uri), &HeaderMap::new())
    }

    #[tokio::test]
    async fn stale_entries_miss_and_are_rewritten() {
        let config = HttpCacheConfig {
            ttl: Duration::from_millis(300),
            ..HttpCacheConfig::default()
        };
        let store = Arc::new(MemoryStore::default());
        let h = harness(config, store.clone());
        let key = items_key(&h.cache, "/api/items");

        send(&h.app, Method::GET, "/api/items").await;
        settle(&h.cache, |s| s.sets == 1).await;
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(store.snapshot(&key).unwrap().is_stale(Utc::now()));

        let (_, headers, body) = send(&h.app, Method::GET, "/api/items").await;
        assert!(headers.get(X_CACHE).is_none());
        assert_eq!(body, "items-2");
        settle(&h.cache, |s| s.sets == 2).await;

        // Give any other background task time to run before inspecting.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let fresh = store.snapshot(&key).expect("rewritten snapshot is kept");
        assert_eq!(fresh.body, "items-2");
        assert!(!fresh.is_stale(Utc::now()));

        let (_, headers, body) = send(&h.app, Method::GET, "/api/items").await;
        assert_eq!(headers[X_CACHE], "HIT");
        assert_eq!(body, "items-2");
        assert_eq!(h.cache.stats().misses, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn refresh_after_expiry_is_never_undone() {
        for _ in 0..25 {
            let config = HttpCacheConfig {
                ttl: Duration::from_millis(5),
                ..HttpCacheConfig::default()
            };
            let store = Arc::new(MemoryStore::default());
            let h = harness(config, store.clone());
            let key = items_key(&h.cache, "/api/items");

            send(&h.app, Method::GET, "/api/items").await;
            settle(&h.cache, |s| s.sets == 1).await;
            tokio::time::sleep(Duration::from_millis(10)).await;

            send(&h.app, Method::GET, "/api/items").await;
            settle(&h.cache, |s| s.sets == 2).await;
            tokio::time::sleep(Duration::from_millis(10)).await;

            let snapshot = store.snapshot(&key).expect("refreshed snapshot survives");
            assert_eq!(snapshot.body, "items-2");
        }
    }

    #[tokio::test]
    async fn invalid_entry_is_evicted_when_nothing_replaces_it() {
        let store = Arc::new(MemoryStore::default());
        let h = harness(HttpCacheConfig::default(), store.clone());
        let key = items_key(&h.cache, "/api/broken");
        store
            .entries
            .lock()
            .insert(key, Bytes::from_static(b"\x00garbage"));

        let (status, _, _) = send(&h.app, Method::GET, "/api/broken").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

        for _ in 0..200 {
            if store.keys().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(store.keys().is_empty());
        let stats = h.cache.stats();
        assert_eq!((stats.errors, stats.sets), (1, 0));
    }

    #[tokio::test]
    async fn large_snapshots_round_trip_through_the_remote_tier() {
        let redis = FakeRedis::spawn().await;
        let tiered = || -> Arc<dyn LayeredStore> {
            Arc::new(TieredStore::new(
                L1Policy::Sieve,
                1024,
                Duration::from_secs(60),
                Duration::from_secs(600),
                Some(RespStore::new(redis.addr(), Duration::from_secs(1))),
            ))
        };

        let warm = harness(HttpCacheConfig::default(), tiered());
        let (status, headers, body) = send(&warm.app, Method::GET, "/api/large").await;
        assert_eq!(status, StatusCode::OK);
        assert!(headers.get(X_CACHE).is_none());
        assert_eq!(body.len(), LARGE_BODY);
        settle(&warm.cache, |s| s.sets == 1).await;
        assert_eq!(warm.cache.stats().errors, 0);

        let key = items_key(&warm.cache, "/api/large");
        let raw = redis.value(&key).expect("snapshot written to the remote tier");
        assert!(raw.len() > 4 * 1024);
        assert_eq!(redis.px(&key), Some(600_000));

        let (_, headers, _) = send(&warm.app, Method::GET, "/api/large").await;
        assert_eq!(headers[X_CACHE], "HIT");

        // Empty L1 over the same remote tier.
        let cold = harness(HttpCacheConfig::default(), tiered());
        let (status, headers, body) = send(&cold.app, Method::GET, "/api/large").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[X_CACHE], "HIT");
        assert_eq!(body, "z".repeat(LARGE_BODY).as_str());
        assert_eq!(cold.cache.stats().errors, 0);
    }

    #[tokio::test]
    async fn event_streams_pass_through_unbuffered() {
        let h = harness(HttpCacheConfig::default(), Arc::new(MemoryStore::default()));
        let request = axum::http::Request::builder()
            .uri("/api/events")
            .body(Body::empty())
            .unwrap();

        let response = tokio::time::timeout(Duration::from_secs(1), h.app.clone().oneshot(request))
            .await
            .expect("headers arrive while the stream is open")
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(X_CACHE).is_none());

        let mut body = response.into_body();
        let frame = tokio::time::timeout(Duration::from_secs(1), body.frame())
            .await
            .expect("first event arrives")
            .unwrap()
            .unwrap();
        assert_eq!(frame.into_data().unwrap(), "data: tick\n\n");

        let stats = h.cache.stats();
        assert_eq!((stats.misses, stats.sets, stats.errors), (1, 0, 0));
    }

    #[tokio::test]
    async fn post_and_excluded_paths_are_never_stored() {
        let store = Arc::new(MemoryStore::default());
        let h = harness(HttpCacheConfig::default(), store.clone());

        send(&h.app, Method::POST, "/api/items").await;
        send(&h.app, Method::POST, "/api/items").await;
        send(&h.app, Method::GET, "/health").await;
        send(&h.app, Method::GET, "/health").await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(store.keys().is_empty());
        assert_eq!(h.calls.load(Ordering::SeqCst), 4);
        assert_eq!(h.cache.stats(), HttpCacheStats::default());
    }

    #[tokio::test]
    async fn oversized_bodies_count_one_error_per_attempt() {
        let config = HttpCacheConfig {
            max_size: 16,
            ..HttpCacheConfig::default()
        };
        let store = Arc::new(MemoryStore::default());
        let h = harness(config, store.clone());

        for attempt in 1..=2 {
            let (status, headers, body) = send(&h.app, Method::GET, "/api/big").await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body.len(), 64);
            assert!(headers.get(X_CACHE).is_none());
            assert_eq!(h.cache.stats().errors, attempt);
        }
        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn status_policy_decides_storage() {
        let store = Arc::new(MemoryStore::default());
        let h = harness(HttpCacheConfig::default(), store.clone());

        send(&h.app, Method::GET, "/api/broken").await;
        send(&h.app, Method::GET, "/api/private").await;
        send(&h.app, Method::GET, "/api/gone").await;
        settle(&h.cache, |s| s.sets == 1).await;

        let (status, headers, body) = send(&h.app, Method::GET, "/api/gone").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(headers[X_CACHE], "HIT");
        assert_eq!(body, "missing");
        assert_eq!(store.keys().len(), 1);
    }

    #[tokio::test]
    async fn failing_store_degrades_to_live_responses() {
        let h = harness(HttpCacheConfig::default(), Arc::new(FailingStore));

        let (status, _, body) = send(&h.app, Method::GET, "/api/items").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "items-1");
        // Lookup failure plus the failed background write.
        settle(&h.cache, |s| s.errors == 2).await;

        let (_, headers, body) = send(&h.app, Method::GET, "/api/items").await;
        assert!(headers.get(X_CACHE).is_none());
        assert_eq!(body, "items-2");
        let stats = h.cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.sets), (0, 2, 0));
    }

    #[tokio::test]
    async fn corrupt_entries_are_dropped() {
        let store = Arc::new(MemoryStore::default());
        let h = harness(HttpCacheConfig::default(), store.clone());
        let key = h
            .cache
            .generate_key(&Method::GET, &Uri::from_static("/api/items"), &HeaderMap::new());
        store
            .entries
            .lock()
            .insert(key.clone(), Bytes::from_static(b"{not json"));

        let (_, headers, body) = send(&h.app, Method::GET, "/api/items").await;
        assert!(headers.get(X_CACHE).is_none());
        assert_eq!(body, "items-1");
        assert_eq!(h.cache.stats().errors, 1);

        // Overwritten in place by the fresh snapshot, never deleted after it.
        settle(&h.cache, |s| s.sets == 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.snapshot(&key).map(|s| s.body), Some(Bytes::from_static(b"items-1")));
        let (_, headers, _) = send(&h.app, Method::GET, "/api/items").await;
        assert_eq!(headers[X_CACHE], "HIT");
    }

    #[test]
    fn key_depends_only_on_vary_surface() {
        let cache = ResponseCache::new(
            HttpCacheConfig::default(),
            Arc::new(MemoryStore::default()),
            HttpCacheMetrics::shared(),
        );
        let uri = Uri::from_static("/api/items?page=1");
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let key = cache.generate_key(&Method::GET, &uri, &headers);
        assert!(key.starts_with(KEY_PREFIX));
        assert_eq!(key.len(), KEY_PREFIX.len() + 64);
        assert_eq!(key, cache.generate_key(&Method::GET, &uri, &headers));

        let mut other_agent = headers.clone();
        other_agent.insert(USER_AGENT, HeaderValue::from_static("curl/8"));
        assert_eq!(key, cache.generate_key(&Method::GET, &uri, &other_agent));

        let mut other_accept = headers.clone();
        other_accept.insert(ACCEPT, HeaderValue::from_static("text/html"));
        assert_ne!(key, cache.generate_key(&Method::GET, &uri, &other_accept));

        let other_query = Uri::from_static("/api/items?page=2");
        assert_ne!(key, cache.generate_key(&Method::GET, &other_query, &headers));
        assert_ne!(key, cache.generate_key(&Method::HEAD, &uri, &headers));
    }

    #[test]
    fn query_cannot_impersonate_a_vary_header() {
        let cache = ResponseCache::new(
            HttpCacheConfig::default(),
            Arc::new(MemoryStore::default()),
            HttpCacheMetrics::shared(),
        );
        let forged: Uri = "/api/items?x|accept:application/json".parse().unwrap();
        let plain = Uri::from_static("/api/items?x");
        let mut accept = HeaderMap::new();
        accept.insert(ACCEPT, HeaderValue::from_static("application/json"));

        assert_ne!(
            cache.generate_key(&Method::GET, &forged, &HeaderMap::new()),
            cache.generate_key(&Method::GET, &plain, &accept),
        );
    }

    #[test]
    fn every_value_of_a_repeated_vary_header_counts() {
        let cache = ResponseCache::new(
            HttpCacheConfig::default(),
            Arc::new(MemoryStore::default()),
            HttpCacheMetrics::shared(),
        );
        let uri = Uri::from_static("/api/items");
        let mut first = HeaderMap::new();
        first.append(ACCEPT, HeaderValue::from_static("text/html"));
        first.append(ACCEPT, HeaderValue::from_static("application/json"));
        let mut second = HeaderMap::new();
        second.append(ACCEPT, HeaderValue::from_static("text/html"));
        second.append(ACCEPT, HeaderValue::from_static("text/plain"));

        assert_ne!(
            cache.generate_key(&Method::GET, &uri, &first),
            cache.generate_key(&Method::GET, &uri, &second),
        );
    }

    #[test]
    fn request_filter_uses_methods_and_prefixes() {
        let cache = ResponseCache::new(
            HttpCacheConfig::default(),
            Arc::new(MemoryStore::default()),
            HttpCacheMetrics::shared(),
        );
        assert!(cache.is_cacheable_request(&Method::GET, "/api/courses"));
        assert!(cache.is_cacheable_request(&Method::HEAD, "/api/courses"));
        assert!(!cache.is_cacheable_request(&Method::POST, "/api/courses"));
        assert!(!cache.is_cacheable_request(&Method::GET, "/health/ready"));
        assert!(!cache.is_cacheable_request(&Method::GET, "/api/auth/login"));
    }

    #[test]
    fn snapshot_encodes_body_as_base64() {
        let snapshot = CachedResponse {
            status: 200,
            headers: vec![("set-cookie".into(), vec!["a=1".into(), "b=2".into()])],
            body: Bytes::from_static(&[0, 159, 146, 150]),
            created_at: Utc::now(),
            ttl_ms: 1_000,
            size: 4,
        };
        let json: serde_json::Value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["body"], "AJ+Slg==");

        let decoded: CachedResponse = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, snapshot);
        assert!(!decoded.is_stale(Utc::now()));
        assert!(decoded.is_stale(Utc::now() + chrono::Duration::seconds(2)));
    }

    #[test]
    fn hit_rate_is_zero_without_traffic() {
        let metrics = HttpCacheMetrics::default();
        assert_eq!(metrics.snapshot().hit_rate, 0.0);
        metrics.record_hit();
        metrics.record_miss();
        metrics.record_miss();
        metrics.record_miss();
        assert!((metrics.snapshot().hit_rate - 25.0).abs() < f64::EPSILON);
    }
}

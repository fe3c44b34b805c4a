use crate::app::AppState;
use crate::response_cache::HttpCacheStats;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use strata_cache::CacheStats;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

const WINDOW: Duration = Duration::from_millis(500);

/// State of the metrics router.
#[derive(Clone)]
pub struct MetricsState {
    pub app: Arc<AppState>,
    pub tx: broadcast::Sender<StatsSnapshot>,
}

/// Everything `/api/stats` returns and `/ws/metrics` pushes.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub timestamp_ms: u128,
    pub uptime_seconds: u64,
    pub window_ms: u64,
    /// Cacheable requests per second over the last window.
    pub throughput_rps: f64,
    pub http_cache: HttpCacheStats,
    pub l1: TierMetrics,
    pub remote_tier: bool,
    pub database: Option<strata_db::MetricsSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TierMetrics {
    pub name: String,
    pub hit_rate: f64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
    pub capacity: usize,
}

impl TierMetrics {
    fn from_stats(name: &str, stats: &CacheStats) -> Self {
        Self {
            name: name.to_string(),
            hit_rate: stats.hit_ratio(),
            hits: stats.hits,
            misses: stats.misses,
            evictions: stats.evictions,
            size: stats.current_size,
            capacity: stats.capacity,
        }
    }
}

impl StatsSnapshot {
    pub fn collect(state: &AppState, throughput_rps: f64) -> Self {
        let l1 = state.store.l1_stats();
        Self {
            timestamp_ms: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis())
                .unwrap_or_default(),
            uptime_seconds: state.started_at.elapsed().as_secs(),
            window_ms: WINDOW.as_millis() as u64,
            throughput_rps,
            http_cache: state.response_cache.stats(),
            l1: TierMetrics::from_stats(state.store.l1_name(), &l1),
            remote_tier: state.store.has_remote(),
            database: state.db.as_ref().map(|db| db.metrics()),
        }
    }
}

/// Snapshot metrics every 500ms and broadcast them until `shutdown`.
pub async fn metrics_broadcaster(
    state: Arc<AppState>,
    tx: broadcast::Sender<StatsSnapshot>,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(WINDOW);
    let mut prev_lookups: u64 = 0;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        let http = state.response_cache.stats();
        let lookups = http.hits + http.misses;
        let throughput = lookups.saturating_sub(prev_lookups) as f64 / WINDOW.as_secs_f64();
        prev_lookups = lookups;

        // No subscribers is fine.
        let _ = tx.send(StatsSnapshot::collect(&state, throughput));
    }
}

/// GET /ws/metrics
pub async fn ws_metrics_handler(
    ws: WebSocketUpgrade,
    State(state): State<MetricsState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_client(socket, state.tx))
}

async fn handle_ws_client(mut socket: WebSocket, tx: broadcast::Sender<StatsSnapshot>) {
    let mut rx = tx.subscribe();

    loop {
        match rx.recv().await {
            Ok(snapshot) => {
                let Ok(json) = serde_json::to_string(&snapshot) else {
                    continue;
                };
                if socket.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// GET /api/stats
pub async fn stats_handler(State(state): State<MetricsState>) -> Json<StatsSnapshot> {
    Json(StatsSnapshot::collect(&state.app, 0.0))
}

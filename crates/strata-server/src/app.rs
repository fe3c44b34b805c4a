use crate::catalog;
use crate::metrics::{stats_handler, ws_metrics_handler, MetricsState, StatsSnapshot};
use crate::response_cache::{response_cache_middleware, ResponseCache};
use crate::store::TieredStore;
use axum::routing::{get, post};
use axum::{middleware, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::{Duration, Instant};
use strata_db::ConnectionManager;
use tokio::sync::broadcast;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Shared application state passed to all handlers.
pub struct AppState {
    /// `None` when no database is configured.
    pub db: Option<Arc<ConnectionManager>>,
    pub store: Arc<TieredStore>,
    pub response_cache: Arc<ResponseCache>,
    pub started_at: Instant,
}

/// Public API: catalog routes behind the response cache.
pub fn api_router(state: Arc<AppState>, request_timeout: Duration) -> Router {
    Router::new()
        .route("/health", get(catalog::health))
        .route("/api/courses", get(catalog::list_courses))
        .route("/api/courses/{id}", get(catalog::get_course))
        .route("/api/courses/{id}/enrollments", post(catalog::enroll))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state.response_cache),
            response_cache_middleware,
        ))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Admin surface on the metrics port.
pub fn metrics_router(
    state: Arc<AppState>,
    tx: broadcast::Sender<StatsSnapshot>,
    prometheus: PrometheusHandle,
) -> Router {
    Router::new()
        .route("/ws/metrics", get(ws_metrics_handler))
        .route("/api/stats", get(stats_handler))
        .route(
            "/metrics",
            get(move || {
                let handle = prometheus.clone();
                async move { handle.render() }
            }),
        )
        .with_state(MetricsState { app: state, tx })
}

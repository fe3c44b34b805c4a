mod app;
mod catalog;
mod config;
mod metrics;
mod response_cache;
mod store;

use app::{api_router, metrics_router, AppState};
use config::Config;
use response_cache::{HttpCacheMetrics, ResponseCache};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use store::{RespStore, TieredStore};
use strata_db::ConnectionManager;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    if let Err(err) = run().await {
        tracing::error!(error = %err, "strata server failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let http_cache = config.http_cache.to_config()?;

    let prom_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    let remote = config
        .store
        .remote
        .as_ref()
        .map(|r| RespStore::new(r.addr.clone(), r.timeout()));
    let store = Arc::new(TieredStore::new(
        config.store.policy,
        config.store.capacity,
        config.store.hot_ttl(),
        config.store.warm_ttl(),
        remote,
    ));

    let db = match &config.database {
        Some(db_config) => Some(Arc::new(ConnectionManager::open(db_config).await?)),
        None => {
            tracing::info!("no [database] section, catalog serves mock data");
            None
        }
    };

    tracing::info!(
        ttl_secs = http_cache.ttl.as_secs(),
        max_size = http_cache.max_size,
        excluded = ?http_cache.excluded_prefixes,
        "response cache configured"
    );
    let response_cache = Arc::new(ResponseCache::new(
        http_cache,
        store.clone(),
        HttpCacheMetrics::shared(),
    ));

    let state = Arc::new(AppState {
        db: db.clone(),
        store,
        response_cache,
        started_at: Instant::now(),
    });

    let shutdown = CancellationToken::new();

    let (metrics_tx, _) = broadcast::channel(64);
    tokio::spawn(metrics::metrics_broadcaster(
        Arc::clone(&state),
        metrics_tx.clone(),
        shutdown.clone(),
    ));

    let api = api_router(Arc::clone(&state), config.server.request_timeout());
    let admin = metrics_router(Arc::clone(&state), metrics_tx, prom_handle);

    let api_addr = &config.server.listen_addr;
    let metrics_addr = &config.server.metrics_addr;
    let api_listener = tokio::net::TcpListener::bind(api_addr).await?;
    let metrics_listener = tokio::net::TcpListener::bind(metrics_addr).await?;

    tracing::info!(
        api = %api_addr,
        metrics = %metrics_addr,
        database = db.is_some(),
        "strata server starting"
    );

    tokio::spawn(shutdown_signal(shutdown.clone()));

    let api_future =
        axum::serve(api_listener, api).with_graceful_shutdown(shutdown.clone().cancelled_owned());
    let metrics_future = axum::serve(metrics_listener, admin)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned());

    tokio::select! {
        result = api_future => {
            if let Err(e) = result {
                tracing::error!(error = %e, "api server error");
            }
        }
        result = metrics_future => {
            if let Err(e) = result {
                tracing::error!(error = %e, "metrics server error");
            }
        }
    }
    shutdown.cancel();

    if let Some(db) = &db {
        db.close().await?;
    }
    tracing::info!("strata server shut down");
    Ok(())
}

/// `config.toml` in the working directory, or defaults when it is absent.
fn load_config() -> Result<Config, config::ConfigError> {
    let path = Path::new("config.toml");
    if !path.exists() {
        tracing::info!("no config.toml found, using defaults");
        return Ok(Config::default());
    }
    let config = Config::load(path)?;
    tracing::info!("loaded config from config.toml");
    Ok(config)
}

/// Listen for SIGINT (Ctrl+C) or SIGTERM and cancel the shutdown token.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }

    tracing::info!("shutdown signal received, draining connections...");
    token.cancel();
}

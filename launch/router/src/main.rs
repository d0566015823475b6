// SPDX-License-Identifier: Apache-2.0

mod cli;
mod config;
mod handlers;
mod state;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use cache_router_core::{GlobalCacheMap, RoutingEngine};
use clap::Parser;
use tower_http::trace::TraceLayer;

use cli::Cli;
use config::RouterConfig;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = RouterConfig::load(&cli)?;

    tracing::info!(
        bind_addr = %config.bind_addr,
        strategy = ?config.routing_strategy,
        proxy_mode = config.proxy_mode,
        "starting cache router"
    );

    let map = Arc::new(GlobalCacheMap::new());
    let engine = RoutingEngine::new(config.routing_strategy.into(), map.clone());
    let state = AppState::new(engine, map.clone(), config.proxy_mode);

    let shutdown = tokio_util::sync::CancellationToken::new();
    let maintenance_shutdown = shutdown.clone();
    let maintenance_map = map.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(cache_router_core::routing::STALE_AFTER / 5);
        loop {
            tokio::select! {
                _ = maintenance_shutdown.cancelled() => return,
                _ = ticker.tick() => {
                    maintenance_map.sweep_stale(std::time::Instant::now(), cache_router_core::routing::STALE_AFTER);
                    maintenance_map.audit_invariants();
                }
            }
        }
    });

    let app = Router::new()
        .route("/v1/completions", post(handlers::completions))
        .route("/internal/heartbeat", post(handlers::heartbeat))
        .route("/internal/eviction", post(handlers::eviction))
        .route("/internal/sync", post(handlers::sync))
        .route("/healthz", get(handlers::healthz))
        .route("/metrics", get(handlers::metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    let shutdown_signal = shutdown.clone();

    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
        shutdown_signal.cancel();
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn test_app() -> Router {
        let map = Arc::new(GlobalCacheMap::new());
        let engine = RoutingEngine::new(cache_router_core::Strategy::RoundRobin, map.clone());
        let state = AppState::new(engine, map, false);
        Router::new()
            .route("/v1/completions", post(handlers::completions))
            .route("/internal/heartbeat", post(handlers::heartbeat))
            .route("/healthz", get(handlers::healthz))
            .with_state(state)
    }

    #[tokio::test]
    async fn healthz_reports_ok() {
        let app = test_app();
        let response = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn completions_without_workers_returns_503() {
        let app = test_app();
        let body = Body::from(r#"{"prompt":"hello world"}"#);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/completions")
                    .header("content-type", "application/json")
                    .body(body)
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn heartbeat_then_completions_succeeds() {
        let app = test_app();
        let hb = Body::from(r#"{"worker_id":"w1","current_load":0}"#);
        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/internal/heartbeat")
                    .header("content-type", "application/json")
                    .body(hb)
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = Body::from(r#"{"prompt":"hello world"}"#);
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/completions")
                    .header("content-type", "application/json")
                    .body(body)
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}

// SPDX-License-Identifier: Apache-2.0

mod cli;
mod control_loops;
mod task;

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use cli::Cli;
use task::WorkerCache;

#[derive(Clone)]
struct AppState {
    cache: Arc<WorkerCache>,
    prefill_ms_per_block: u64,
    decode_ms_per_token: u64,
    default_max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateRequest {
    prompt: String,
    #[serde(default)]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct GenerateResponse {
    cached_blocks: usize,
    newly_allocated_blocks: usize,
    prefill_ms: u64,
    decode_ms: u64,
}

async fn generate(State(state): State<AppState>, Json(req): Json<GenerateRequest>) -> Json<GenerateResponse> {
    let max_tokens = req.max_tokens.unwrap_or(state.default_max_tokens);
    let outcome = state
        .cache
        .run_task(&req.prompt, max_tokens, state.prefill_ms_per_block, state.decode_ms_per_token)
        .await
        .expect("capacity sized generously enough for simulated traffic");

    Json(GenerateResponse {
        cached_blocks: outcome.cached_blocks,
        newly_allocated_blocks: outcome.newly_allocated_blocks,
        prefill_ms: outcome.prefill_ms,
        decode_ms: outcome.decode_ms,
    })
}

async fn healthz() -> &'static str {
    "ok"
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let worker_id = cli.worker_id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let worker_url = cli.worker_url.clone().or_else(|| Some(format!("http://{}", cli.bind_addr)));

    tracing::info!(worker_id = %worker_id, router_url = %cli.router_url, "starting cache worker");

    let cache = Arc::new(WorkerCache::new(cli.max_blocks));
    let state = AppState {
        cache: cache.clone(),
        prefill_ms_per_block: cli.prefill_ms_per_block,
        decode_ms_per_token: cli.decode_ms_per_token,
        default_max_tokens: cli.default_max_tokens,
    };

    let app = Router::new()
        .route("/generate", post(generate))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let shutdown = tokio_util::sync::CancellationToken::new();
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(5))
        .build()?;

    let heartbeat = tokio::spawn(control_loops::heartbeat_loop(
        client.clone(),
        cli.router_url.clone(),
        worker_id.clone(),
        worker_url,
        cache.clone(),
        shutdown.clone(),
    ));
    let eviction = tokio::spawn(control_loops::eviction_loop(
        client.clone(),
        cli.router_url.clone(),
        worker_id.clone(),
        cache.clone(),
        shutdown.clone(),
    ));
    let sync = tokio::spawn(control_loops::sync_loop(
        client,
        cli.router_url.clone(),
        worker_id,
        cache,
        shutdown.clone(),
    ));

    let listener = tokio::net::TcpListener::bind(&cli.bind_addr).await?;
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
        shutdown_signal.cancel();
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    let _ = tokio::join!(heartbeat, eviction, sync);
    Ok(())
}

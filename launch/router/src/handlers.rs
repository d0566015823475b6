// SPDX-License-Identifier: Apache-2.0

use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use cache_router_core::protocol::{
    CompletionRequest, CompletionResponse, ErrorResponse, EvictionAck, EvictionReport,
    HeartbeatRequest, HeartbeatResponse, SyncAck, SyncReport,
};
use cache_router_core::tokens::compute_block_hashes;
use cache_router_core::{CacheStatus, Strategy};

use crate::state::{status_for, AppState};

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorResponse { error: message.into() })).into_response()
}

pub async fn completions(
    State(state): State<AppState>,
    Json(req): Json<CompletionRequest>,
) -> Response {
    let block_hashes = compute_block_hashes(&req.prompt);

    let result = match state.engine.route(&block_hashes, Instant::now()) {
        Ok(result) => result,
        Err(err) => {
            tracing::warn!(error = %err, "routing failed");
            return error_response(status_for(&err), err.to_string());
        }
    };

    if state.proxy_mode {
        if let Some(url) = state.map.worker_url(&result.worker) {
            match state.http_client.post(format!("{url}/generate")).json(&req).send().await {
                Ok(resp) if resp.status().is_success() => {
                    return match resp.json::<serde_json::Value>().await {
                        Ok(body) => Json(body).into_response(),
                        Err(err) => error_response(StatusCode::BAD_GATEWAY, err.to_string()),
                    };
                }
                Ok(resp) => {
                    return error_response(
                        StatusCode::BAD_GATEWAY,
                        format!("worker responded with {}", resp.status()),
                    );
                }
                Err(err) => {
                    tracing::warn!(error = %err, worker = %result.worker, "proxy forward failed");
                    return error_response(StatusCode::BAD_GATEWAY, "proxy unreachable".to_string());
                }
            }
        }
    }

    Json(CompletionResponse {
        worker: result.worker,
        cache_status: match result.cache_status {
            CacheStatus::Hit => "HIT".to_string(),
            CacheStatus::Miss => "MISS".to_string(),
        },
        match_length: result.match_length,
    })
    .into_response()
}

pub async fn heartbeat(
    State(state): State<AppState>,
    Json(req): Json<HeartbeatRequest>,
) -> Json<HeartbeatResponse> {
    let now = Instant::now();
    state.map.update_load(&req.worker_id, req.current_load, now);
    if let Some(url) = req.worker_url {
        state.map.set_worker_url(&req.worker_id, url, now);
    }
    Json(HeartbeatResponse { acknowledged: true })
}

pub async fn eviction(
    State(state): State<AppState>,
    Json(req): Json<EvictionReport>,
) -> Json<EvictionAck> {
    for hash in &req.evicted_hashes {
        state.map.evict(&req.worker_id, *hash);
    }
    Json(EvictionAck {
        acknowledged: req.evicted_hashes.len(),
    })
}

pub async fn sync(State(state): State<AppState>, Json(req): Json<SyncReport>) -> Json<SyncAck> {
    state.map.sync(&req.worker_id, req.active_hashes);
    Json(SyncAck { acknowledged: true })
}

pub async fn healthz() -> &'static str {
    "ok"
}

fn strategy_label(strategy: Strategy) -> &'static str {
    match strategy {
        Strategy::CacheAware => "cache_aware",
        Strategy::LeastLoaded => "least_loaded",
        Strategy::RoundRobin => "round_robin",
    }
}

pub async fn metrics(State(state): State<AppState>) -> String {
    let workers = state.map.known_workers();
    format!(
        "cache_router_known_workers {}\ncache_router_strategy{{name=\"{}\"}} 1\n",
        workers.len(),
        strategy_label(state.engine.strategy()),
    )
}

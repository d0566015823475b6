// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::time::Duration;

use cache_router_core::protocol::{flatten_sequences_for_sync, EvictionReport, HeartbeatRequest, SyncReport};

use crate::task::WorkerCache;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);
const EVICTION_INTERVAL: Duration = Duration::from_millis(100);
const SYNC_INTERVAL: Duration = Duration::from_secs(5);

/// POST `{worker_id, current_load, worker_url}` every second. Also serves
/// as this worker's liveness signal.
pub async fn heartbeat_loop(
    client: reqwest::Client,
    router_url: String,
    worker_id: String,
    worker_url: Option<String>,
    cache: Arc<WorkerCache>,
    shutdown: tokio_util::sync::CancellationToken,
) {
    let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => {
                let body = HeartbeatRequest {
                    worker_id: worker_id.clone(),
                    current_load: cache.current_load(),
                    worker_url: worker_url.clone(),
                };
                if let Err(err) = client
                    .post(format!("{router_url}/internal/heartbeat"))
                    .json(&body)
                    .send()
                    .await
                {
                    tracing::warn!(error = %err, "heartbeat failed, will retry next tick");
                }
            }
        }
    }
}

/// Drain and POST evicted hashes every 100ms. Best-effort: a dropped report
/// is corrected by the next full sync.
pub async fn eviction_loop(
    client: reqwest::Client,
    router_url: String,
    worker_id: String,
    cache: Arc<WorkerCache>,
    shutdown: tokio_util::sync::CancellationToken,
) {
    let mut ticker = tokio::time::interval(EVICTION_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => {
                let evicted_hashes = cache.drain_pending_evictions();
                if evicted_hashes.is_empty() {
                    continue;
                }
                let body = EvictionReport {
                    worker_id: worker_id.clone(),
                    evicted_hashes,
                };
                if let Err(err) = client
                    .post(format!("{router_url}/internal/eviction"))
                    .json(&body)
                    .send()
                    .await
                {
                    tracing::warn!(error = %err, "eviction report failed, dropping batch");
                }
            }
        }
    }
}

/// POST the full, deduplicated set of held blocks every 5 seconds — the
/// authoritative reconciliation signal that bounds router staleness.
pub async fn sync_loop(
    client: reqwest::Client,
    router_url: String,
    worker_id: String,
    cache: Arc<WorkerCache>,
    shutdown: tokio_util::sync::CancellationToken,
) {
    let mut ticker = tokio::time::interval(SYNC_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => {
                let active_hashes = flatten_sequences_for_sync(&cache.snapshot_sequences());
                let body = SyncReport {
                    worker_id: worker_id.clone(),
                    active_hashes,
                };
                if let Err(err) = client
                    .post(format!("{router_url}/internal/sync"))
                    .json(&body)
                    .send()
                    .await
                {
                    tracing::warn!(error = %err, "sync report failed, will retry next tick");
                }
            }
        }
    }
}

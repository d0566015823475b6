// SPDX-License-Identifier: Apache-2.0

//! Wire DTOs shared by the router and worker binaries.
//!
//! These mirror the RPC surface: a completion request/response pair plus the
//! three consistency-protocol signals a worker pushes to the router
//! (heartbeat, eviction, sync). Field names match the router's HTTP
//! contract, not the in-memory `GlobalCacheMap` method names.

use serde::{Deserialize, Serialize};

use crate::hash::BlockHash;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub prompt: String,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub prefix_len: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub worker: String,
    pub cache_status: String,
    pub match_length: usize,
}

/// Periodic liveness + load signal. Also carries `worker_url` on first
/// contact (or whenever it changes) so the router can proxy in proxy mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub worker_id: String,
    pub current_load: u64,
    #[serde(default)]
    pub worker_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub acknowledged: bool,
}

/// Batched report of blocks a worker has evicted since its last report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvictionReport {
    pub worker_id: String,
    pub evicted_hashes: Vec<BlockHash>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvictionAck {
    pub acknowledged: usize,
}

/// Truth signal: the ordered concatenation of the worker's currently-held
/// sequences, deduplicated while preserving first occurrence — a single
/// flat list, not the per-sequence structure `BlockCache` keeps internally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub worker_id: String,
    pub active_hashes: Vec<BlockHash>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncAck {
    pub acknowledged: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Flatten `BlockCache::snapshot_sequences()` into the deduplicated,
/// first-occurrence-order hash list the sync endpoint expects.
pub fn flatten_sequences_for_sync(sequences: &[Vec<BlockHash>]) -> Vec<BlockHash> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for seq in sequences {
        for h in seq {
            if seen.insert(*h) {
                out.push(*h);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_round_trips_through_json() {
        let req = HeartbeatRequest {
            worker_id: "w1".into(),
            current_load: 3,
            worker_url: Some("http://127.0.0.1:9001".into()),
        };
        let json = serde_json::to_string(&req).unwrap();
        let back: HeartbeatRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.worker_id, "w1");
        assert_eq!(back.current_load, 3);
    }

    #[test]
    fn heartbeat_worker_url_defaults_to_none() {
        let json = r#"{"worker_id":"w1","current_load":0}"#;
        let req: HeartbeatRequest = serde_json::from_str(json).unwrap();
        assert!(req.worker_url.is_none());
    }

    #[test]
    fn flatten_dedupes_preserving_first_occurrence() {
        let h = |b: u8| BlockHash::from_bytes([b; 32]);
        let sequences = vec![vec![h(1), h(2)], vec![h(2), h(3)]];
        let flat = flatten_sequences_for_sync(&sequences);
        assert_eq!(flat, vec![h(1), h(2), h(3)]);
    }
}

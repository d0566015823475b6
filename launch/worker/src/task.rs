// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use cache_router_core::tokens::compute_block_hashes;
use cache_router_core::{BlockCache, BlockHash, CoreError};

/// Wraps a [`BlockCache`] with the bookkeeping the control loops need:
/// a coalescing queue of just-evicted hashes, and a running load figure
/// (total remaining simulated latency across live tasks, the worker-side
/// convention for the heartbeat's opaque `current_load`).
pub struct WorkerCache {
    cache: Mutex<BlockCache>,
    pending_evictions: Mutex<Vec<BlockHash>>,
    load_ms: AtomicU64,
    next_seq_id: AtomicU64,
}

pub struct TaskOutcome {
    pub cached_blocks: usize,
    pub newly_allocated_blocks: usize,
    pub prefill_ms: u64,
    pub decode_ms: u64,
}

impl WorkerCache {
    pub fn new(max_blocks: usize) -> Self {
        Self {
            cache: Mutex::new(BlockCache::new(max_blocks)),
            pending_evictions: Mutex::new(Vec::new()),
            load_ms: AtomicU64::new(0),
            next_seq_id: AtomicU64::new(0),
        }
    }

    pub fn current_load(&self) -> u64 {
        self.load_ms.load(Ordering::Relaxed)
    }

    /// Drain every hash queued for eviction reporting since the last drain.
    pub fn drain_pending_evictions(&self) -> Vec<BlockHash> {
        std::mem::take(&mut *self.pending_evictions.lock().unwrap())
    }

    pub fn snapshot_sequences(&self) -> Vec<Vec<BlockHash>> {
        self.cache.lock().unwrap().snapshot_sequences()
    }

    /// Run one request's full prefill → decode lifecycle: pin its blocks
    /// (evicting as needed), sleep out the simulated latency, then unpin.
    /// `max_tokens` drives the decode phase; the prompt's block fingerprint
    /// drives prefill cost (one `prefill_ms_per_block` charge per block that
    /// wasn't already cached).
    pub async fn run_task(
        &self,
        prompt: &str,
        max_tokens: u32,
        prefill_ms_per_block: u64,
        decode_ms_per_token: u64,
    ) -> Result<TaskOutcome, CoreError> {
        let block_hashes = compute_block_hashes(prompt);
        let seq_id = self.next_seq_id.fetch_add(1, Ordering::Relaxed);

        let outcome = {
            let mut cache = self.cache.lock().unwrap();
            let outcome = cache.allocate(seq_id, &block_hashes)?;
            if !outcome.evicted.is_empty() {
                self.pending_evictions.lock().unwrap().extend(outcome.evicted.iter().copied());
            }
            outcome
        };

        let prefill_ms = outcome.newly_allocated.len() as u64 * prefill_ms_per_block;
        let decode_ms = u64::from(max_tokens) * decode_ms_per_token;
        let total_ms = prefill_ms + decode_ms;

        self.load_ms.fetch_add(total_ms, Ordering::Relaxed);

        if prefill_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(prefill_ms)).await;
        }
        if decode_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(decode_ms)).await;
        }

        self.cache.lock().unwrap().complete(seq_id);
        self.load_ms.fetch_sub(total_ms, Ordering::Relaxed);

        Ok(TaskOutcome {
            cached_blocks: outcome.cached.len(),
            newly_allocated_blocks: outcome.newly_allocated.len(),
            prefill_ms,
            decode_ms,
        })
    }
}

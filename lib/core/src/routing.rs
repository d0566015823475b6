// SPDX-License-Identifier: Apache-2.0

//! `RoutingEngine`: turns a token sequence and a strategy choice into a
//! worker selection, against a shared [`GlobalCacheMap`].

use std::time::{Duration, Instant};

use crate::cache_map::{GlobalCacheMap, WorkerId};
use crate::error::CoreError;
use crate::hash::BlockHash;

/// How a request's routing decision related to a worker's existing cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

#[derive(Debug, Clone)]
pub struct RouteResult {
    pub worker: WorkerId,
    pub cache_status: CacheStatus,
    /// Number of leading blocks that matched an existing worker registration.
    pub match_length: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    CacheAware,
    LeastLoaded,
    RoundRobin,
}

impl std::str::FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cache_aware" => Ok(Strategy::CacheAware),
            "least_loaded" => Ok(Strategy::LeastLoaded),
            "round_robin" => Ok(Strategy::RoundRobin),
            other => Err(format!("unknown routing strategy: {other}")),
        }
    }
}

/// Speculative load bump applied to a worker chosen by `least_loaded`
/// before its next real heartbeat arrives, so a burst of requests doesn't
/// pile onto the same worker while it's in flight.
const SPECULATIVE_LOAD_BUMP: u64 = 50;

/// How long a worker may go without a heartbeat before routing treats it as
/// stale and excludes it from candidate pools. Also the interval the router
/// binary uses for its periodic stale-sweep (spec §4.5: "recommended 3x
/// heartbeat interval" — the 1s heartbeat cadence puts this at 15s).
pub const STALE_AFTER: Duration = Duration::from_secs(15);

/// Deterministic cursor over a sorted worker snapshot, for `round_robin`.
#[derive(Default)]
struct RoundRobinCursor {
    index: usize,
}

pub struct RoutingEngine {
    strategy: Strategy,
    map: std::sync::Arc<GlobalCacheMap>,
    rr_cursor: parking_lot::Mutex<RoundRobinCursor>,
}

impl RoutingEngine {
    pub fn new(strategy: Strategy, map: std::sync::Arc<GlobalCacheMap>) -> Self {
        Self {
            strategy,
            map,
            rr_cursor: parking_lot::Mutex::new(RoundRobinCursor::default()),
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Select a worker for a request whose prompt hashes to `block_hashes`.
    pub fn route(&self, block_hashes: &[BlockHash], now: Instant) -> Result<RouteResult, CoreError> {
        match self.strategy {
            Strategy::CacheAware => self.route_cache_aware(block_hashes, now),
            Strategy::LeastLoaded => self.route_least_loaded(now),
            Strategy::RoundRobin => self.route_round_robin(),
        }
    }

    fn route_cache_aware(
        &self,
        block_hashes: &[BlockHash],
        now: Instant,
    ) -> Result<RouteResult, CoreError> {
        let (worker, match_length) = self.map.longest_prefix_match(block_hashes, now, STALE_AFTER);

        if let Some(worker) = worker {
            return Ok(RouteResult {
                worker,
                cache_status: CacheStatus::Hit,
                match_length,
            });
        }

        // Miss: fall back to least-loaded, then speculatively register this
        // sequence against the chosen worker so the next identical request
        // hits without waiting for a real sync. Skip the speculative update
        // for an empty sequence (a prompt shorter than BLOCK_SIZE) — it
        // would otherwise wipe any sequence already registered for `worker`.
        let worker = self
            .map
            .least_loaded(None, now, STALE_AFTER)
            .ok_or(CoreError::NoWorkersAvailable)?;
        if !block_hashes.is_empty() {
            self.map.update_block_sequence(&worker, block_hashes.to_vec());
        }
        Ok(RouteResult {
            worker,
            cache_status: CacheStatus::Miss,
            match_length: 0,
        })
    }

    fn route_least_loaded(&self, now: Instant) -> Result<RouteResult, CoreError> {
        let worker = self
            .map
            .least_loaded(None, now, STALE_AFTER)
            .ok_or(CoreError::NoWorkersAvailable)?;

        // Speculative bump: reflects the request just assigned before the
        // worker's next heartbeat reports its real load.
        self.map.bump_load(&worker, SPECULATIVE_LOAD_BUMP, now);

        Ok(RouteResult {
            worker,
            cache_status: CacheStatus::Miss,
            match_length: 0,
        })
    }

    fn route_round_robin(&self) -> Result<RouteResult, CoreError> {
        let snapshot = self.map.known_workers();
        if snapshot.is_empty() {
            return Err(CoreError::NoWorkersAvailable);
        }
        let mut cursor = self.rr_cursor.lock();
        let worker = snapshot[cursor.index % snapshot.len()].clone();
        cursor.index = (cursor.index + 1) % snapshot.len();
        Ok(RouteResult {
            worker,
            cache_status: CacheStatus::Miss,
            match_length: 0,
        })
    }
}

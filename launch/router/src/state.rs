// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use cache_router_core::{CoreError, GlobalCacheMap, RoutingEngine};

#[derive(Clone)]
pub struct AppState {
    pub map: Arc<GlobalCacheMap>,
    pub engine: Arc<RoutingEngine>,
    pub proxy_mode: bool,
    pub http_client: reqwest::Client,
}

impl AppState {
    pub fn new(engine: RoutingEngine, map: Arc<GlobalCacheMap>, proxy_mode: bool) -> Self {
        Self {
            map,
            engine: Arc::new(engine),
            proxy_mode,
            http_client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(5))
                .build()
                .expect("reqwest client builds with static config"),
        }
    }
}

/// Maps [`CoreError`] onto the HTTP status the table in the design notes
/// assigns it.
pub fn status_for(err: &CoreError) -> axum::http::StatusCode {
    use axum::http::StatusCode;
    match err {
        CoreError::NoWorkersAvailable => StatusCode::SERVICE_UNAVAILABLE,
        CoreError::CapacityExceeded { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        CoreError::InvariantViolation(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

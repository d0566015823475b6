// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq, Serialize, Deserialize)]
#[value(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CliStrategy {
    CacheAware,
    LeastLoaded,
    RoundRobin,
}

impl From<CliStrategy> for cache_router_core::Strategy {
    fn from(value: CliStrategy) -> Self {
        match value {
            CliStrategy::CacheAware => cache_router_core::Strategy::CacheAware,
            CliStrategy::LeastLoaded => cache_router_core::Strategy::LeastLoaded,
            CliStrategy::RoundRobin => cache_router_core::Strategy::RoundRobin,
        }
    }
}

/// Cache-aware request router for an LLM serving fleet.
#[derive(Debug, Parser)]
#[command(name = "cache-router", version)]
pub struct Cli {
    /// Address to bind the HTTP server to.
    #[arg(long, env = "ROUTER_BIND_ADDR", default_value = "0.0.0.0:8000")]
    pub bind_addr: String,

    /// Routing strategy to use for `/v1/completions`.
    #[arg(long, value_enum, env = "ROUTING_STRATEGY", default_value = "cache-aware")]
    pub routing_strategy: CliStrategy,

    /// When set, forward completion requests to the selected worker's URL
    /// instead of only returning the routing decision.
    #[arg(long, env = "PROXY_MODE", default_value_t = false)]
    pub proxy_mode: bool,

    /// Path to an optional TOML config file layered under CLI/env values.
    #[arg(long, env = "ROUTER_CONFIG")]
    pub config: Option<String>,
}

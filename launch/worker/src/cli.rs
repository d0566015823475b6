// SPDX-License-Identifier: Apache-2.0

use clap::Parser;

/// Worker-side block cache simulator.
#[derive(Debug, Parser)]
#[command(name = "cache-worker", version)]
pub struct Cli {
    /// Unique id this worker presents to the router. Defaults to a fresh
    /// UUID — restarts are recommended to mint a new id (spec's WorkerId
    /// contract).
    #[arg(long, env = "WORKER_ID")]
    pub worker_id: Option<String>,

    /// Address to bind this worker's own HTTP surface to.
    #[arg(long, env = "WORKER_BIND_ADDR", default_value = "0.0.0.0:9000")]
    pub bind_addr: String,

    /// Base URL this worker advertises to the router for proxy-mode
    /// forwarding (defaults to `http://<bind_addr>`).
    #[arg(long, env = "WORKER_URL")]
    pub worker_url: Option<String>,

    /// Router base URL to push control signals to.
    #[arg(long, env = "ROUTER_URL", default_value = "http://127.0.0.1:8000")]
    pub router_url: String,

    /// Maximum number of blocks this worker's cache can hold.
    #[arg(long, env = "MAX_BLOCKS", default_value_t = 4096)]
    pub max_blocks: usize,

    /// Simulated prefill cost per newly-allocated block, in milliseconds.
    #[arg(long, env = "PREFILL_MS_PER_BLOCK", default_value_t = 20)]
    pub prefill_ms_per_block: u64,

    /// Simulated decode cost per output token, in milliseconds.
    #[arg(long, env = "DECODE_MS_PER_TOKEN", default_value_t = 10)]
    pub decode_ms_per_token: u64,

    /// Default number of tokens to simulate decoding when a request doesn't
    /// specify `max_tokens`.
    #[arg(long, env = "DEFAULT_MAX_TOKENS", default_value_t = 32)]
    pub default_max_tokens: u32,
}

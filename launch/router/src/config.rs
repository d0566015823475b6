// SPDX-License-Identifier: Apache-2.0

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::cli::{Cli, CliStrategy};

/// Fully-resolved router configuration: CLI flags > environment > an
/// optional TOML file > built-in defaults, merged via `figment` the way the
/// rest of this ecosystem layers configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    pub bind_addr: String,
    pub routing_strategy: CliStrategy,
    pub proxy_mode: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".to_string(),
            routing_strategy: CliStrategy::CacheAware,
            proxy_mode: false,
        }
    }
}

impl RouterConfig {
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(RouterConfig::default()));

        if let Some(path) = &cli.config {
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed("ROUTER_").split("__"));

        let mut config: RouterConfig = figment.extract()?;

        // CLI flags always win: clap already resolved env/defaults for
        // these, so re-apply them verbatim over whatever figment produced.
        config.bind_addr = cli.bind_addr.clone();
        config.routing_strategy = cli.routing_strategy;
        config.proxy_mode = cli.proxy_mode;

        Ok(config)
    }
}

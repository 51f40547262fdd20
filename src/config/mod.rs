//! Configuration management for the control plane.
//!
//! Provides hierarchical configuration loading from multiple sources with priority:
//! 1. Default values (hardcoded)
//! 2. `config/default` file (optional)
//! 3. Explicit config file (argument or `LNPLANE_CONFIG`)
//! 4. `config/local` overrides (optional)
//! 5. Environment variables prefixed `LNPLANE__` (highest priority)
//!

mod app;
mod cache;
mod gateway;
mod network;
mod nodes;
mod retry;
mod supervisor;
mod tenant;
mod workers;
pub use app::*;
pub use cache::*;
pub use gateway::*;
pub use network::*;
pub use nodes::*;
pub use retry::*;
pub use supervisor::*;
pub use tenant::*;
pub use workers::*;

#[cfg(test)]
mod config_test;

//---
use std::env;

use config::Config;
use config::ConfigError;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

pub const CONFIG_PATH_ENV: &str = "LNPLANE_CONFIG";
pub const ENV_PREFIX: &str = "LNPLANE";

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Settings {
    /// Process-level paths and endpoints
    #[serde(default)]
    pub app: AppConfig,
    /// Upstream gRPC connection tuning
    #[serde(default)]
    pub network: NetworkConfig,
    /// Reconciliation loop and restart policy
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    /// Bootstrap importer freshness rules
    #[serde(default)]
    pub importer: ImporterConfig,
    /// Cache actor mailboxes and readiness
    #[serde(default)]
    pub cache: CacheConfig,
    /// Event bus buffers
    #[serde(default)]
    pub bus: BusConfig,
    /// Outbound control request gateway
    #[serde(default)]
    pub gateway: GatewayConfig,
    /// Rebalance admission and execution
    #[serde(default)]
    pub rebalancer: RebalancerConfig,
    /// Stream worker intervals and page sizes
    #[serde(default)]
    pub workers: WorkerConfig,
    /// Block details backfill loop
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
    /// Tenant wide preferences
    #[serde(default)]
    pub tenant: TenantSettings,
    /// Local nodes under supervision
    #[serde(default)]
    pub nodes: Vec<NodeConnectionConfig>,
}

impl Settings {
    /// Load configuration from multiple sources.
    ///
    /// # Arguments
    /// * `config_path` - Optional path to an explicit configuration file; it must exist
    ///
    /// # Returns
    /// Merged and validated configuration
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut config = Config::builder();

        // 1. Shared defaults checked into the deployment
        config = config.add_source(File::with_name("config/default").required(false));

        // 2. Explicit file
        if let Some(path) = config_path {
            config = config.add_source(File::with_name(path).required(true));
        }
        if let Ok(path) = env::var(CONFIG_PATH_ENV) {
            config = config.add_source(File::with_name(&path).required(true));
        }

        // 3. Local overrides
        config = config.add_source(File::with_name("config/local").required(false));

        // 4. Environment variables (highest priority)
        config = config.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true),
        );

        let settings: Settings = config.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validates every section; the first violation wins.
    pub fn validate(&self) -> Result<()> {
        self.app.validate()?;
        self.network.validate()?;
        self.supervisor.validate()?;
        self.importer.validate()?;
        self.cache.validate()?;
        self.bus.validate()?;
        self.gateway.validate()?;
        self.rebalancer.validate()?;
        self.workers.validate()?;
        self.maintenance.validate()?;
        self.tenant.validate()?;

        let mut keys = std::collections::HashSet::new();
        for node in &self.nodes {
            node.validate()?;
            if !keys.insert(node.public_key.to_lowercase()) {
                return Err(invalid(format!(
                    "node {} is configured more than once",
                    node.public_key
                )));
            }
        }
        Ok(())
    }
}

pub(crate) fn invalid(message: impl Into<String>) -> Error {
    Error::Config(ConfigError::Message(message.into()))
}

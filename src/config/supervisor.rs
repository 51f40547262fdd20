use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use super::invalid;
use super::BackoffPolicy;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SupervisorConfig {
    /// Reconciliation tick
    #[serde(default = "default_tick_interval")]
    pub tick_interval_in_ms: u64,

    /// Restart delay for failed workers
    #[serde(default)]
    pub restart_backoff: BackoffPolicy,

    /// How many ticks shutdown waits per dependency tier before moving on
    #[serde(default = "default_shutdown_ticks_per_tier")]
    pub shutdown_ticks_per_tier: u32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            tick_interval_in_ms: default_tick_interval(),
            restart_backoff: BackoffPolicy::default(),
            shutdown_ticks_per_tier: default_shutdown_ticks_per_tier(),
        }
    }
}

impl SupervisorConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_in_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_in_ms == 0 {
            return Err(invalid("supervisor.tick_interval_in_ms must be greater than 0"));
        }
        if self.shutdown_ticks_per_tier == 0 {
            return Err(invalid("supervisor.shutdown_ticks_per_tier must be greater than 0"));
        }
        self.restart_backoff.validate()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ImporterConfig {
    /// A successful import younger than this is skipped unless forced
    #[serde(default = "default_freshness_window")]
    pub freshness_window_in_secs: u64,
}

impl Default for ImporterConfig {
    fn default() -> Self {
        Self {
            freshness_window_in_secs: default_freshness_window(),
        }
    }
}

impl ImporterConfig {
    pub fn freshness_window(&self) -> Duration {
        Duration::from_secs(self.freshness_window_in_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.freshness_window_in_secs == 0 {
            return Err(invalid("importer.freshness_window_in_secs must be greater than 0"));
        }
        Ok(())
    }
}

fn default_tick_interval() -> u64 {
    1_000
}
fn default_shutdown_ticks_per_tier() -> u32 {
    5
}
fn default_freshness_window() -> u64 {
    70
}

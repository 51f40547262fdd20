use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use super::invalid;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    /// Outbound control requests admitted concurrently
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Mailbox depth for queued requests
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    /// Deadline for policy, status, sign and getter calls
    #[serde(default = "default_control_timeout")]
    pub control_timeout_in_ms: u64,

    /// Deadline for imports
    #[serde(default = "default_import_timeout")]
    pub import_timeout_in_ms: u64,

    /// Lowest accepted time lock delta
    #[serde(default = "default_min_time_lock_delta")]
    pub min_time_lock_delta: u32,

    /// Changes of one policy field tolerated inside the window
    #[serde(default = "default_policy_rate_limit_count")]
    pub policy_rate_limit_count: u32,

    #[serde(default = "default_policy_rate_limit_window")]
    pub policy_rate_limit_window_in_secs: u64,

    /// Disable/enable flips tolerated inside the flap window
    #[serde(default = "default_status_flap_limit")]
    pub status_flap_limit: usize,

    #[serde(default = "default_status_flap_window")]
    pub status_flap_window_in_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            queue_size: default_queue_size(),
            control_timeout_in_ms: default_control_timeout(),
            import_timeout_in_ms: default_import_timeout(),
            min_time_lock_delta: default_min_time_lock_delta(),
            policy_rate_limit_count: default_policy_rate_limit_count(),
            policy_rate_limit_window_in_secs: default_policy_rate_limit_window(),
            status_flap_limit: default_status_flap_limit(),
            status_flap_window_in_secs: default_status_flap_window(),
        }
    }
}

impl GatewayConfig {
    pub fn control_timeout(&self) -> Duration {
        Duration::from_millis(self.control_timeout_in_ms)
    }

    pub fn import_timeout(&self) -> Duration {
        Duration::from_millis(self.import_timeout_in_ms)
    }

    pub fn status_flap_window(&self) -> Duration {
        Duration::from_secs(self.status_flap_window_in_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(invalid("gateway.max_concurrency must be greater than 0"));
        }
        if self.queue_size == 0 {
            return Err(invalid("gateway.queue_size must be greater than 0"));
        }
        if self.control_timeout_in_ms == 0 || self.import_timeout_in_ms == 0 {
            return Err(invalid("gateway timeouts must be greater than 0"));
        }
        if self.policy_rate_limit_count == 0 {
            return Err(invalid("gateway.policy_rate_limit_count must be greater than 0"));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RebalancerConfig {
    /// Mailbox depth for rebalance requests
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    /// History is pruned whenever its length crosses a multiple of this
    #[serde(default = "default_history_prune_every")]
    pub history_prune_every: usize,

    /// Results younger than this survive a prune
    #[serde(default = "default_history_retention")]
    pub history_retention_in_secs: u64,

    /// Upstream payment timeout per attempt
    #[serde(default = "default_payment_timeout")]
    pub payment_timeout_in_secs: u32,

    /// Expiry of the self-invoice
    #[serde(default = "default_invoice_expiry")]
    pub invoice_expiry_in_secs: u64,
}

impl Default for RebalancerConfig {
    fn default() -> Self {
        Self {
            queue_size: default_queue_size(),
            history_prune_every: default_history_prune_every(),
            history_retention_in_secs: default_history_retention(),
            payment_timeout_in_secs: default_payment_timeout(),
            invoice_expiry_in_secs: default_invoice_expiry(),
        }
    }
}

impl RebalancerConfig {
    pub fn history_retention(&self) -> Duration {
        Duration::from_secs(self.history_retention_in_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.history_prune_every == 0 {
            return Err(invalid("rebalancer.history_prune_every must be greater than 0"));
        }
        if self.payment_timeout_in_secs == 0 {
            return Err(invalid("rebalancer.payment_timeout_in_secs must be greater than 0"));
        }
        Ok(())
    }
}

fn default_max_concurrency() -> usize {
    2
}
fn default_queue_size() -> usize {
    256
}
fn default_control_timeout() -> u64 {
    2_000
}
fn default_import_timeout() -> u64 {
    60_000
}
fn default_min_time_lock_delta() -> u32 {
    18
}
fn default_policy_rate_limit_count() -> u32 {
    2
}
fn default_policy_rate_limit_window() -> u64 {
    300
}
fn default_status_flap_limit() -> usize {
    2
}
fn default_status_flap_window() -> u64 {
    300
}
fn default_history_prune_every() -> usize {
    100
}
fn default_history_retention() -> u64 {
    60
}
fn default_payment_timeout() -> u32 {
    60
}
fn default_invoice_expiry() -> u64 {
    3_600
}

use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use super::invalid;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WorkerConfig {
    /// Minimum spacing between two reconnect attempts of one stream
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_in_ms: u64,

    #[serde(default = "default_poll_interval")]
    pub forwards_poll_interval_in_secs: u64,

    #[serde(default = "default_forwards_page_size")]
    pub forwards_page_size: u32,

    #[serde(default = "default_poll_interval")]
    pub payments_poll_interval_in_secs: u64,

    #[serde(default = "default_page_size")]
    pub payments_page_size: u64,

    #[serde(default = "default_page_size")]
    pub invoices_page_size: u64,

    #[serde(default = "default_in_flight_interval")]
    pub in_flight_check_interval_in_secs: u64,

    /// Added to creation time plus invoice expiry before an in-flight payment times out
    #[serde(default = "default_in_flight_grace")]
    pub in_flight_grace_in_secs: u64,

    #[serde(default = "default_poll_interval")]
    pub balance_tick_in_secs: u64,

    /// Every n-th balance tick re-reads channel balances from the daemon
    #[serde(default = "default_balance_full_refresh_ticks")]
    pub balance_full_refresh_ticks: u32,

    /// Spacing of the connection service's liveness check
    #[serde(default = "default_liveness_interval")]
    pub liveness_interval_in_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            reconnect_interval_in_ms: default_reconnect_interval(),
            forwards_poll_interval_in_secs: default_poll_interval(),
            forwards_page_size: default_forwards_page_size(),
            payments_poll_interval_in_secs: default_poll_interval(),
            payments_page_size: default_page_size(),
            invoices_page_size: default_page_size(),
            in_flight_check_interval_in_secs: default_in_flight_interval(),
            in_flight_grace_in_secs: default_in_flight_grace(),
            balance_tick_in_secs: default_poll_interval(),
            balance_full_refresh_ticks: default_balance_full_refresh_ticks(),
            liveness_interval_in_secs: default_liveness_interval(),
        }
    }
}

impl WorkerConfig {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_in_ms)
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_secs(self.liveness_interval_in_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.forwards_page_size == 0
            || self.payments_page_size == 0
            || self.invoices_page_size == 0
        {
            return Err(invalid("workers page sizes must be greater than 0"));
        }
        if self.forwards_poll_interval_in_secs == 0
            || self.payments_poll_interval_in_secs == 0
            || self.in_flight_check_interval_in_secs == 0
            || self.balance_tick_in_secs == 0
            || self.liveness_interval_in_secs == 0
        {
            return Err(invalid("workers intervals must be greater than 0"));
        }
        if self.balance_full_refresh_ticks == 0 {
            return Err(invalid("workers.balance_full_refresh_ticks must be greater than 0"));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MaintenanceConfig {
    #[serde(default = "default_maintenance_interval")]
    pub interval_in_secs: u64,

    /// Block details service endpoint; the loop idles when unset
    #[serde(default)]
    pub block_details_url: Option<String>,

    /// Spacing between two block detail queries
    #[serde(default = "default_query_spacing")]
    pub query_spacing_in_ms: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_in_ms: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval_in_secs: default_maintenance_interval(),
            block_details_url: None,
            query_spacing_in_ms: default_query_spacing(),
            request_timeout_in_ms: default_request_timeout(),
        }
    }
}

impl MaintenanceConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_in_secs)
    }

    pub fn query_spacing(&self) -> Duration {
        Duration::from_millis(self.query_spacing_in_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_in_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval_in_secs == 0 {
            return Err(invalid("maintenance.interval_in_secs must be greater than 0"));
        }
        if self.query_spacing_in_ms < 200 {
            return Err(invalid("maintenance.query_spacing_in_ms must be at least 200"));
        }
        if let Some(url) = &self.block_details_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(invalid(format!("maintenance.block_details_url is not http(s): {url}")));
            }
        }
        Ok(())
    }
}

fn default_reconnect_interval() -> u64 {
    1_000
}
fn default_poll_interval() -> u64 {
    10
}
fn default_forwards_page_size() -> u32 {
    50_000
}
fn default_page_size() -> u64 {
    1_000
}
fn default_in_flight_interval() -> u64 {
    60
}
fn default_in_flight_grace() -> u64 {
    600
}
fn default_balance_full_refresh_ticks() -> u32 {
    6
}
fn default_liveness_interval() -> u64 {
    30
}
fn default_maintenance_interval() -> u64 {
    60
}
fn default_query_spacing() -> u64 {
    200
}
fn default_request_timeout() -> u64 {
    10_000
}

use serde::Deserialize;
use serde::Serialize;

use super::invalid;
use crate::Result;

/// Low-level parameters for the per-node upstream gRPC channel
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NetworkConfig {
    /// TCP connect timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_in_ms: u64,

    /// TCP keepalive in seconds
    #[serde(default = "default_tcp_keepalive")]
    pub tcp_keepalive_in_secs: u64,

    /// HTTP2 keepalive ping interval in seconds
    #[serde(default = "default_h2_keep_alive_interval")]
    pub http2_keep_alive_interval_in_secs: u64,

    /// HTTP2 keepalive ack timeout in seconds
    #[serde(default = "default_h2_keep_alive_timeout")]
    pub http2_keep_alive_timeout_in_secs: u64,

    /// Largest decoded message; graph and history pages can be big
    #[serde(default = "default_max_decoding_message_size")]
    pub max_decoding_message_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_in_ms: default_connect_timeout(),
            tcp_keepalive_in_secs: default_tcp_keepalive(),
            http2_keep_alive_interval_in_secs: default_h2_keep_alive_interval(),
            http2_keep_alive_timeout_in_secs: default_h2_keep_alive_timeout(),
            max_decoding_message_size: default_max_decoding_message_size(),
        }
    }
}

impl NetworkConfig {
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout_in_ms == 0 {
            return Err(invalid("network.connect_timeout_in_ms must be greater than 0"));
        }
        if self.http2_keep_alive_timeout_in_secs >= self.http2_keep_alive_interval_in_secs {
            return Err(invalid(format!(
                "network.http2_keep_alive_timeout_in_secs ({}) must be lower than the interval ({})",
                self.http2_keep_alive_timeout_in_secs, self.http2_keep_alive_interval_in_secs
            )));
        }
        if self.max_decoding_message_size < 4 * 1024 * 1024 {
            return Err(invalid("network.max_decoding_message_size must be at least 4MiB"));
        }
        Ok(())
    }
}

fn default_connect_timeout() -> u64 {
    5_000
}
fn default_tcp_keepalive() -> u64 {
    60
}
fn default_h2_keep_alive_interval() -> u64 {
    30
}
fn default_h2_keep_alive_timeout() -> u64 {
    10
}
fn default_max_decoding_message_size() -> usize {
    // 200MiB, a full ForwardingHistory page is large
    200 * 1024 * 1024
}

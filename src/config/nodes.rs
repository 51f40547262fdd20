use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use super::invalid;
use crate::Chain;
use crate::Network;
use crate::Result;

/// Ping integrations a node may report to, as a bitmask.
pub const PING_SYSTEM_AMBOSS: u8 = 1;
pub const PING_SYSTEM_VECTOR: u8 = 1 << 1;

/// Connection details and feature flags of one local node.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct NodeConnectionConfig {
    pub name: String,

    /// Identity key the daemon must report, 33-byte hex
    pub public_key: String,

    /// e.g. "https://127.0.0.1:10009"
    pub grpc_address: String,

    pub tls_cert_path: PathBuf,

    pub macaroon_path: PathBuf,

    #[serde(default)]
    pub chain: Chain,

    #[serde(default)]
    pub network: Network,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub streams: StreamFlags,

    #[serde(default)]
    pub import_historic_forwards: bool,

    #[serde(default)]
    pub ping_system: u8,
}

impl NodeConnectionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(invalid("node name cannot be empty"));
        }
        if self.public_key.len() != 66 || hex::decode(&self.public_key).is_err() {
            return Err(invalid(format!(
                "node {}: public_key must be 33 bytes of hex",
                self.name
            )));
        }
        if !(self.grpc_address.starts_with("http://") || self.grpc_address.starts_with("https://"))
        {
            return Err(invalid(format!(
                "node {}: grpc_address must start with http:// or https://",
                self.name
            )));
        }
        Ok(())
    }

    pub fn pings(
        &self,
        system: u8,
    ) -> bool {
        self.ping_system & system != 0
    }
}

/// Optional streams; channel events, graph and balance coordination always run.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct StreamFlags {
    #[serde(default = "default_true")]
    pub htlc_events: bool,
    #[serde(default = "default_true")]
    pub forwards: bool,
    #[serde(default = "default_true")]
    pub payments: bool,
    #[serde(default = "default_true")]
    pub in_flight_payments: bool,
    #[serde(default = "default_true")]
    pub invoices: bool,
    #[serde(default = "default_true")]
    pub transactions: bool,
    #[serde(default = "default_true")]
    pub peer_events: bool,
}

impl Default for StreamFlags {
    fn default() -> Self {
        Self {
            htlc_events: true,
            forwards: true,
            payments: true,
            in_flight_payments: true,
            invoices: true,
            transactions: true,
            peer_events: true,
        }
    }
}

fn default_true() -> bool {
    true
}

//! Domain model shared by every component of the plane.

mod channel;
mod events;
mod policy;
mod records;
mod requests;
mod service;
mod short_channel_id;
mod state;

pub use channel::*;
pub use events::*;
pub use policy::*;
pub use records::*;
pub use requests::*;
pub use service::*;
pub use short_channel_id::*;
pub use state::*;

#[cfg(test)]
mod short_channel_id_test;

use serde::Deserialize;
use serde::Serialize;

/// Dense node identifier assigned by the store on first sight.
pub type NodeId = u32;
/// Dense channel identifier assigned by the store; stable across status changes.
pub type ChannelId = u32;
pub type TagId = u32;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    #[default]
    Bitcoin,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Mainnet,
    Testnet,
    Signet,
    Simnet,
    Regtest,
}

impl Network {
    /// Parses the network name reported by the daemon.
    pub fn from_daemon(name: &str) -> Option<Self> {
        match name {
            "mainnet" => Some(Network::Mainnet),
            "testnet" | "testnet3" => Some(Network::Testnet),
            "signet" => Some(Network::Signet),
            "simnet" => Some(Network::Simnet),
            "regtest" => Some(Network::Regtest),
            _ => None,
        }
    }
}

/// Node identity as held by the store and the node cache.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Node {
    pub node_id: NodeId,
    pub public_key: String,
    pub chain: Chain,
    pub network: Network,
}

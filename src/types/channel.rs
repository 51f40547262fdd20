use std::fmt;
use std::str::FromStr;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use super::ChannelId;
use super::NodeId;
use crate::Result;
use crate::ValidationError;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChannelStatus {
    #[default]
    Opening,
    Open,
    ClosingCooperative,
    ClosingLocalForce,
    ClosingRemoteForce,
    ClosingBreach,
    FundingCancelled,
    Abandoned,
}

impl ChannelStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, ChannelStatus::Open)
    }

    pub fn is_closed(&self) -> bool {
        !matches!(self, ChannelStatus::Opening | ChannelStatus::Open)
    }

    /// Channels that never reached the chain have no block details to backfill.
    pub fn has_chain_footprint(&self) -> bool {
        !matches!(
            self,
            ChannelStatus::Opening | ChannelStatus::FundingCancelled | ChannelStatus::Abandoned
        )
    }
}

/// Funding outpoint `txid:index`, the natural key of a channel.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelPoint {
    pub funding_transaction_hash: String,
    pub funding_output_index: u32,
}

impl ChannelPoint {
    pub fn new(
        funding_transaction_hash: impl Into<String>,
        funding_output_index: u32,
    ) -> Self {
        Self {
            funding_transaction_hash: funding_transaction_hash.into(),
            funding_output_index,
        }
    }

    /// Builds the point from the raw txid bytes carried by daemon messages,
    /// which are in internal (reversed) byte order.
    pub fn from_txid_bytes(
        txid: &[u8],
        funding_output_index: u32,
    ) -> Result<Self> {
        if txid.len() != 32 {
            return Err(ValidationError::InvalidChannelPoint(hex::encode(txid)).into());
        }
        let mut reversed = txid.to_vec();
        reversed.reverse();
        Ok(Self::new(hex::encode(reversed), funding_output_index))
    }
}

impl fmt::Display for ChannelPoint {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}:{}", self.funding_transaction_hash, self.funding_output_index)
    }
}

impl FromStr for ChannelPoint {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (hash, index) = s
            .split_once(':')
            .ok_or_else(|| ValidationError::InvalidChannelPoint(s.to_string()))?;
        if hash.len() != 64 || hex::decode(hash).is_err() {
            return Err(ValidationError::InvalidChannelPoint(s.to_string()).into());
        }
        let index = index
            .parse::<u32>()
            .map_err(|_| ValidationError::InvalidChannelPoint(s.to_string()))?;
        Ok(ChannelPoint::new(hash.to_lowercase(), index))
    }
}

/// Durable channel identity row.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Channel {
    pub channel_id: ChannelId,
    pub channel_point: ChannelPoint,
    /// BOLT text form `HxTxO`, absent until the funding confirms
    pub short_channel_id: Option<String>,
    pub lnd_short_channel_id: Option<u64>,
    pub first_node_id: NodeId,
    pub second_node_id: NodeId,
    pub status: ChannelStatus,
    pub capacity_sat: i64,
    pub closing_transaction_hash: Option<String>,
    pub funding_block_height: Option<u32>,
    pub funded_on: Option<DateTime<Utc>>,
    pub closing_block_height: Option<u32>,
    pub closed_on: Option<DateTime<Utc>>,
    pub created_on: DateTime<Utc>,
    pub updated_on: DateTime<Utc>,
}

impl Channel {
    /// The endpoint of the channel that is not `node_id`.
    pub fn peer_of(
        &self,
        node_id: NodeId,
    ) -> NodeId {
        if self.first_node_id == node_id {
            self.second_node_id
        } else {
            self.first_node_id
        }
    }

    pub fn involves(
        &self,
        node_id: NodeId,
    ) -> bool {
        self.first_node_id == node_id || self.second_node_id == node_id
    }

    pub fn needs_block_details(&self) -> bool {
        if !self.status.has_chain_footprint() {
            return false;
        }
        let funding_missing = self.funding_block_height.is_none() || self.funded_on.is_none();
        let closing_missing = self.closing_transaction_hash.is_some()
            && (self.closing_block_height.is_none() || self.closed_on.is_none());
        funding_missing || closing_missing
    }
}

/// Kind of a recorded channel lifecycle event.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelEventType {
    OpenChannel,
    ClosedChannel,
    ActiveChannel,
    InactiveChannel,
    PendingOpenChannel,
    FullyResolvedChannel,
}

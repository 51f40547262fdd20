use serde::Deserialize;
use serde::Serialize;

use super::ChannelId;
use super::NodeId;
use super::RoutingPolicy;

/// Pending HTLC on one channel, matched by `htlc_index`.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct Htlc {
    pub incoming: bool,
    pub amount_msat: u64,
    pub htlc_index: u64,
    pub expiration_height: u32,
    pub forwarding_channel: u64,
    pub forwarding_htlc_index: u64,
}

/// Live view of one channel from the perspective of one local node.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct ChannelState {
    pub node_id: NodeId,
    pub channel_id: ChannelId,
    pub remote_node_id: NodeId,
    pub lnd_short_channel_id: u64,
    pub active: bool,
    pub capacity: i64,
    pub local_balance: i64,
    pub remote_balance: i64,
    pub commit_fee: i64,
    pub local_policy: RoutingPolicy,
    pub remote_policy: RoutingPolicy,
    pub pending_htlcs: Vec<Htlc>,
    /// Sum of pending HTLC amounts, in sat
    pub unsettled_balance: i64,
    pub peer: PeerAggregate,
}

impl ChannelState {
    pub fn recompute_unsettled(&mut self) {
        let msat: u64 = self.pending_htlcs.iter().map(|h| h.amount_msat).sum();
        self.unsettled_balance = (msat / 1_000) as i64;
    }

    pub fn local_balance_ratio(&self) -> Option<f64> {
        ratio(self.local_balance, self.capacity)
    }

    /// Balance and liveness fields differ; policy or pending list changes are
    /// not balance events.
    pub fn balance_differs(
        &self,
        other: &ChannelState,
    ) -> bool {
        self.local_balance != other.local_balance
            || self.remote_balance != other.remote_balance
            || self.capacity != other.capacity
            || self.active != other.active
    }
}

/// Totals across every channel of one local node towards the same peer.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub struct PeerAggregate {
    pub channel_count: u32,
    pub capacity: i64,
    pub local_balance: i64,
}

impl PeerAggregate {
    pub fn local_balance_ratio(&self) -> Option<f64> {
        ratio(self.local_balance, self.capacity)
    }
}

/// Zero denominators yield no ratio rather than NaN or infinity.
pub fn ratio(
    numerator: i64,
    denominator: i64,
) -> Option<f64> {
    if denominator == 0 {
        None
    } else {
        Some(numerator as f64 / denominator as f64)
    }
}

/// Normalised HTLC stream update with channels already resolved to ids.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct HtlcUpdate {
    pub kind: HtlcUpdateKind,
    pub incoming_channel_id: ChannelId,
    pub outgoing_channel_id: ChannelId,
    pub incoming_htlc_id: u64,
    pub outgoing_htlc_id: u64,
    pub incoming_amt_msat: u64,
    pub outgoing_amt_msat: u64,
    pub incoming_timelock: u32,
    pub outgoing_timelock: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HtlcUpdateKind {
    Forward,
    ForwardFail,
    LinkFail,
    Settle,
}

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use super::ChannelId;
use super::NodeId;

/// Directional fee and HTLC-size parameters advertised for a channel.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub struct RoutingPolicy {
    pub disabled: bool,
    pub time_lock_delta: u32,
    pub min_htlc_msat: i64,
    pub max_htlc_msat: u64,
    pub fee_base_msat: i64,
    pub fee_rate_milli_msat: i64,
}

impl RoutingPolicy {
    /// Fields in which `self` differs from `other`.
    pub fn changed_fields(
        &self,
        other: &RoutingPolicy,
    ) -> Vec<PolicyField> {
        let mut fields = Vec::new();
        if self.disabled != other.disabled {
            fields.push(PolicyField::Disabled);
        }
        if self.time_lock_delta != other.time_lock_delta {
            fields.push(PolicyField::TimeLockDelta);
        }
        if self.min_htlc_msat != other.min_htlc_msat {
            fields.push(PolicyField::MinHtlcMsat);
        }
        if self.max_htlc_msat != other.max_htlc_msat {
            fields.push(PolicyField::MaxHtlcMsat);
        }
        if self.fee_base_msat != other.fee_base_msat {
            fields.push(PolicyField::FeeBaseMsat);
        }
        if self.fee_rate_milli_msat != other.fee_rate_milli_msat {
            fields.push(PolicyField::FeeRateMilliMsat);
        }
        fields
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyField {
    Disabled,
    TimeLockDelta,
    MinHtlcMsat,
    MaxHtlcMsat,
    FeeBaseMsat,
    FeeRateMilliMsat,
}

impl PolicyField {
    pub fn name(&self) -> &'static str {
        match self {
            PolicyField::Disabled => "disabled",
            PolicyField::TimeLockDelta => "timeLockDelta",
            PolicyField::MinHtlcMsat => "minHtlcMsat",
            PolicyField::MaxHtlcMsat => "maxHtlcMsat",
            PolicyField::FeeBaseMsat => "feeBaseMsat",
            PolicyField::FeeRateMilliMsat => "feeRateMilliMsat",
        }
    }
}

/// One row of routing policy history as seen on the graph.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RoutingPolicyRecord {
    pub node_id: NodeId,
    pub channel_id: ChannelId,
    pub announcing_node_id: NodeId,
    /// Set iff the announcing node is one of ours
    pub outbound: bool,
    pub policy: RoutingPolicy,
    pub ts: DateTime<Utc>,
}

//! Durable side of the plane.
//!
//! The [`Store`] trait is the only way components persist history; every
//! event row insert is idempotent on the row's natural key so at-least-once
//! ingestion never duplicates rows.

mod sled_store;
pub use sled_store::*;


use chrono::DateTime;
use chrono::Utc;
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use serde::Serialize;

use crate::Chain;
use crate::Channel;
use crate::ChannelEventRecord;
use crate::ChannelId;
use crate::ChannelPoint;
use crate::ForwardRecord;
use crate::HtlcEventRecord;
use crate::InvoiceRecord;
use crate::Network;
use crate::Node;
use crate::NodeEventRecord;
use crate::NodeId;
use crate::PaymentFailureReason;
use crate::PaymentRecord;
use crate::PaymentStatus;
use crate::PeerEventRecord;
use crate::RebalanceRequest;
use crate::RebalanceResult;
use crate::Result;
use crate::RoutingPolicyRecord;
use crate::TagAssignment;
use crate::TransactionRecord;

/// One finished rebalance attempt as persisted.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RebalanceLog {
    pub id: u64,
    pub request: RebalanceRequest,
    pub result: RebalanceResult,
}

#[cfg_attr(test, automock)]
pub trait Store: Send + Sync + 'static {
    /// Returns the existing node for the key or creates it with the next id.
    fn add_node(
        &self,
        public_key: &str,
        chain: Chain,
        network: Network,
    ) -> Result<Node>;

    fn get_node(
        &self,
        node_id: NodeId,
    ) -> Result<Option<Node>>;

    fn all_nodes(&self) -> Result<Vec<Node>>;

    /// Inserts the channel unless its funding outpoint is known; either way
    /// the id owning the outpoint is returned.
    fn add_channel(
        &self,
        channel: &Channel,
    ) -> Result<ChannelId>;

    fn update_channel(
        &self,
        channel: &Channel,
    ) -> Result<()>;

    fn get_channel(
        &self,
        channel_id: ChannelId,
    ) -> Result<Option<Channel>>;

    fn get_channel_id(
        &self,
        channel_point: &ChannelPoint,
    ) -> Result<Option<ChannelId>>;

    fn all_channels(&self) -> Result<Vec<Channel>>;

    fn add_channel_event(
        &self,
        event: &ChannelEventRecord,
    ) -> Result<()>;

    fn channel_events(
        &self,
        channel_id: ChannelId,
    ) -> Result<Vec<ChannelEventRecord>>;

    fn latest_routing_policy(
        &self,
        channel_id: ChannelId,
        announcing_node_id: NodeId,
    ) -> Result<Option<RoutingPolicyRecord>>;

    fn add_routing_policy(
        &self,
        record: &RoutingPolicyRecord,
    ) -> Result<()>;

    /// Policy history of one direction of a channel, oldest first.
    fn routing_policies_since(
        &self,
        channel_id: ChannelId,
        announcing_node_id: NodeId,
        since: DateTime<Utc>,
    ) -> Result<Vec<RoutingPolicyRecord>>;

    fn add_node_event(
        &self,
        event: &NodeEventRecord,
    ) -> Result<()>;

    fn add_htlc_event(
        &self,
        event: &HtlcEventRecord,
    ) -> Result<()>;

    /// 0 when nothing is stored.
    fn last_forward_time_ns(
        &self,
        node_id: NodeId,
    ) -> Result<u64>;

    /// Returns how many rows were new.
    fn add_forwards(
        &self,
        forwards: &[ForwardRecord],
    ) -> Result<usize>;

    fn forwards(
        &self,
        node_id: NodeId,
    ) -> Result<Vec<ForwardRecord>>;

    fn last_payment_index(
        &self,
        node_id: NodeId,
    ) -> Result<u64>;

    /// False when the payment index is already stored.
    fn add_payment(
        &self,
        payment: &PaymentRecord,
    ) -> Result<bool>;

    fn get_payment(
        &self,
        node_id: NodeId,
        payment_index: u64,
    ) -> Result<Option<PaymentRecord>>;

    fn in_flight_payments(
        &self,
        node_id: NodeId,
    ) -> Result<Vec<PaymentRecord>>;

    fn update_payment_status(
        &self,
        node_id: NodeId,
        payment_index: u64,
        status: PaymentStatus,
        failure_reason: PaymentFailureReason,
    ) -> Result<()>;

    /// `(add_index, settle_index)` high-water marks.
    fn last_invoice_indexes(
        &self,
        node_id: NodeId,
    ) -> Result<(u64, u64)>;

    fn upsert_invoice(
        &self,
        invoice: &InvoiceRecord,
    ) -> Result<()>;

    fn last_transaction_height(
        &self,
        node_id: NodeId,
    ) -> Result<i32>;

    /// Confirmations update an existing row; returns true for a new hash.
    fn add_transaction(
        &self,
        transaction: &TransactionRecord,
    ) -> Result<bool>;

    fn add_peer_event(
        &self,
        event: &PeerEventRecord,
    ) -> Result<()>;

    fn all_tags(&self) -> Result<Vec<TagAssignment>>;

    fn add_tag(
        &self,
        assignment: &TagAssignment,
    ) -> Result<()>;

    fn remove_tag(
        &self,
        assignment: &TagAssignment,
    ) -> Result<()>;

    fn add_rebalance_log(
        &self,
        request: &RebalanceRequest,
        result: &RebalanceResult,
    ) -> Result<u64>;

    fn rebalance_logs(&self) -> Result<Vec<RebalanceLog>>;
}

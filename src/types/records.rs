//! Rows persisted by stream workers. Each carries the natural key the store
//! uses for idempotent inserts.

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use super::ChannelEventType;
use super::ChannelId;
use super::NodeId;
use super::TagId;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ChannelEventRecord {
    pub node_id: NodeId,
    pub channel_id: ChannelId,
    pub event_type: ChannelEventType,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct NodeEventRecord {
    pub node_id: NodeId,
    pub event_node_id: NodeId,
    pub alias: String,
    pub color: String,
    pub addresses: Vec<String>,
    pub ts: DateTime<Utc>,
}

/// Keyed by `(node_id, time_ns)`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ForwardRecord {
    pub node_id: NodeId,
    pub time: DateTime<Utc>,
    pub time_ns: u64,
    pub incoming_channel_id: ChannelId,
    pub outgoing_channel_id: ChannelId,
    pub fee_msat: u64,
    pub incoming_amount_msat: u64,
    pub outgoing_amount_msat: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaymentStatus {
    Unknown,
    Initiated,
    InFlight,
    Succeeded,
    Failed,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaymentFailureReason {
    None,
    Timeout,
    NoRoute,
    Error,
    IncorrectPaymentDetails,
    InsufficientBalance,
    /// The daemon no longer returns the payment
    DetailsUnavailable,
}

/// Keyed by `(node_id, payment_index)`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PaymentRecord {
    pub node_id: NodeId,
    pub payment_index: u64,
    pub payment_hash: String,
    pub payment_request: String,
    pub creation_time: DateTime<Utc>,
    pub value_msat: i64,
    pub fee_msat: i64,
    pub status: PaymentStatus,
    pub failure_reason: PaymentFailureReason,
    pub incoming_channel_id: Option<ChannelId>,
    pub outgoing_channel_id: Option<ChannelId>,
    /// Set when both endpoints of the route are local channels
    pub rebalance_amount_msat: Option<i64>,
    /// Invoice expiry decoded from the payment request, in seconds
    pub expiry_secs: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvoiceState {
    Open,
    Settled,
    Canceled,
    Accepted,
}

/// Keyed by `(node_id, add_index)`; settle updates rewrite the row.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct InvoiceRecord {
    pub node_id: NodeId,
    pub add_index: u64,
    pub settle_index: u64,
    pub r_hash: String,
    pub memo: String,
    pub payment_request: String,
    pub value_msat: i64,
    pub amt_paid_msat: i64,
    pub state: InvoiceState,
    pub creation_date: DateTime<Utc>,
    pub settle_date: Option<DateTime<Utc>>,
    pub expiry_secs: i64,
    pub is_keysend: bool,
    /// Payee key from the decoded payment request
    pub destination_pub_key: Option<String>,
}

/// Keyed by `(node_id, tx_hash)`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    pub node_id: NodeId,
    pub tx_hash: String,
    pub amount: i64,
    pub num_confirmations: i32,
    pub block_height: i32,
    pub time_stamp: DateTime<Utc>,
    pub total_fees: i64,
    pub dest_addresses: Vec<String>,
    pub label: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerEventType {
    Online,
    Offline,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PeerEventRecord {
    pub node_id: NodeId,
    pub event_node_id: NodeId,
    pub event_type: PeerEventType,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HtlcEventRecord {
    pub node_id: NodeId,
    pub kind: super::HtlcUpdateKind,
    pub incoming_channel_id: Option<ChannelId>,
    pub outgoing_channel_id: Option<ChannelId>,
    pub incoming_htlc_id: u64,
    pub outgoing_htlc_id: u64,
    pub incoming_amt_msat: u64,
    pub outgoing_amt_msat: u64,
    pub failure: Option<String>,
    pub ts: DateTime<Utc>,
}

/// Target of a tag assignment.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagTarget {
    Node(NodeId),
    Channel(ChannelId),
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TagAssignment {
    pub tag_id: TagId,
    pub target: TagTarget,
}

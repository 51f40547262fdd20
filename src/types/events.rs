//! Event envelope published on the in-process bus.

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use super::ChannelEventType;
use super::ChannelId;
use super::ChannelStatus;
use super::ForwardRecord;
use super::HtlcEventRecord;
use super::InvoiceRecord;
use super::NodeId;
use super::PaymentRecord;
use super::PeerEventRecord;
use super::RoutingPolicy;
use super::ServiceScope;
use super::ServiceStatus;
use super::ServiceType;
use super::TransactionRecord;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Channel,
    Graph,
    Balance,
    Transaction,
    Forward,
    Htlc,
    Payment,
    Invoice,
    Peer,
    Service,
}

impl EventKind {
    pub const ALL: [EventKind; 10] = [
        EventKind::Channel,
        EventKind::Graph,
        EventKind::Balance,
        EventKind::Transaction,
        EventKind::Forward,
        EventKind::Htlc,
        EventKind::Payment,
        EventKind::Invoice,
        EventKind::Peer,
        EventKind::Service,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Channel => "channel",
            EventKind::Graph => "graph",
            EventKind::Balance => "balance",
            EventKind::Transaction => "transaction",
            EventKind::Forward => "forward",
            EventKind::Htlc => "htlc",
            EventKind::Payment => "payment",
            EventKind::Invoice => "invoice",
            EventKind::Peer => "peer",
            EventKind::Service => "service",
        }
    }
}

/// `event_time` is stamped by the bus at publish from the host clock.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Event {
    pub event_time: DateTime<Utc>,
    pub node_id: NodeId,
    pub payload: EventPayload,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum EventPayload {
    Channel(ChannelEvent),
    Graph(GraphEvent),
    Balance(BalanceEvent),
    Transaction(TransactionRecord),
    Forward(ForwardRecord),
    Htlc(HtlcEventRecord),
    Payment(PaymentRecord),
    Invoice(InvoiceRecord),
    Peer(PeerEventRecord),
    Service(ServiceEvent),
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Channel(_) => EventKind::Channel,
            EventPayload::Graph(_) => EventKind::Graph,
            EventPayload::Balance(_) => EventKind::Balance,
            EventPayload::Transaction(_) => EventKind::Transaction,
            EventPayload::Forward(_) => EventKind::Forward,
            EventPayload::Htlc(_) => EventKind::Htlc,
            EventPayload::Payment(_) => EventKind::Payment,
            EventPayload::Invoice(_) => EventKind::Invoice,
            EventPayload::Peer(_) => EventKind::Peer,
            EventPayload::Service(_) => EventKind::Service,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ChannelEvent {
    pub channel_id: ChannelId,
    pub event_type: ChannelEventType,
    pub status: ChannelStatus,
    pub remote_node_id: NodeId,
    pub capacity: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum GraphEvent {
    Node {
        event_node_id: NodeId,
        alias: String,
        color: String,
    },
    Channel {
        channel_id: ChannelId,
        announcing_node_id: NodeId,
        outbound: bool,
        policy: RoutingPolicy,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum BalanceUpdateOrigin {
    /// Local side moved (sent or settled)
    Local,
    /// Remote side moved
    Remote,
    /// Seeded or refreshed from the daemon
    Refresh,
}

/// Ratios are `None` when their denominator is zero.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BalanceEvent {
    pub channel_id: ChannelId,
    pub remote_node_id: NodeId,
    pub origin: BalanceUpdateOrigin,
    pub capacity: i64,
    pub local_balance: i64,
    pub remote_balance: i64,
    pub local_balance_ratio: Option<f64>,
    pub previous_local_balance: i64,
    pub peer_channel_count: u32,
    pub peer_capacity: i64,
    pub peer_local_balance: i64,
    pub peer_local_balance_ratio: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ServiceEvent {
    pub scope: ServiceScope,
    pub service_type: ServiceType,
    pub status: ServiceStatus,
    pub previous_status: ServiceStatus,
}

use std::fmt;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use super::NodeId;
use crate::StreamFlags;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ServiceStatus {
    #[default]
    Inactive,
    Pending,
    Initializing,
    Active,
}

/// Where a service runs: once per process or once per local node.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ServiceScope {
    Process,
    Node(NodeId),
}

impl ServiceScope {
    pub fn node_id(&self) -> Option<NodeId> {
        match self {
            ServiceScope::Process => None,
            ServiceScope::Node(id) => Some(*id),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ServiceType {
    // process
    EventBus,
    Maintenance,
    LightningCommunication,
    Rebalance,
    // per node
    LndService,
    ChannelEventStream,
    GraphEventStream,
    HtlcEventStream,
    ForwardStream,
    PaymentStream,
    InFlightPaymentStream,
    InvoiceStream,
    TransactionStream,
    PeerEventStream,
    ChannelBalanceCacheStream,
}

/// Shutdown happens tier by tier, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShutdownTier {
    Streams = 0,
    Importer = 1,
    Process = 2,
    Infrastructure = 3,
}

impl ServiceType {
    pub const PROCESS_SERVICES: [ServiceType; 3] = [
        ServiceType::Maintenance,
        ServiceType::LightningCommunication,
        ServiceType::Rebalance,
    ];

    pub const NODE_STREAMS: [ServiceType; 10] = [
        ServiceType::ChannelEventStream,
        ServiceType::GraphEventStream,
        ServiceType::HtlcEventStream,
        ServiceType::ForwardStream,
        ServiceType::PaymentStream,
        ServiceType::InFlightPaymentStream,
        ServiceType::InvoiceStream,
        ServiceType::TransactionStream,
        ServiceType::PeerEventStream,
        ServiceType::ChannelBalanceCacheStream,
    ];

    pub fn is_node_service(&self) -> bool {
        matches!(self, ServiceType::LndService) || self.is_node_stream()
    }

    /// Per-node services gated on the node's connection being Active.
    pub fn is_node_stream(&self) -> bool {
        Self::NODE_STREAMS.contains(self)
    }

    /// The bus is owned by the plane itself, not restarted by the supervisor.
    pub fn is_supervised(&self) -> bool {
        !matches!(self, ServiceType::EventBus)
    }

    pub fn shutdown_tier(&self) -> ShutdownTier {
        match self {
            t if t.is_node_stream() => ShutdownTier::Streams,
            ServiceType::LndService => ShutdownTier::Importer,
            ServiceType::EventBus => ShutdownTier::Infrastructure,
            _ => ShutdownTier::Process,
        }
    }

    /// Whether the node's flags ask for this stream. Core streams always run.
    pub fn enabled_by(
        &self,
        flags: &StreamFlags,
    ) -> bool {
        match self {
            ServiceType::HtlcEventStream => flags.htlc_events,
            ServiceType::ForwardStream => flags.forwards,
            ServiceType::PaymentStream => flags.payments,
            ServiceType::InFlightPaymentStream => flags.payments && flags.in_flight_payments,
            ServiceType::InvoiceStream => flags.invoices,
            ServiceType::TransactionStream => flags.transactions,
            ServiceType::PeerEventStream => flags.peer_events,
            _ => true,
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Copy of one service-state entry, without its cancellation handle.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ServiceStateView {
    pub scope: ServiceScope,
    pub service_type: ServiceType,
    pub desired: ServiceStatus,
    pub current: ServiceStatus,
    pub pending_since: Option<DateTime<Utc>>,
    pub initializing_since: Option<DateTime<Utc>>,
    pub active_since: Option<DateTime<Utc>>,
    pub inactive_since: Option<DateTime<Utc>>,
    /// Set iff the last transition to Inactive was caused by an error
    pub failure_time: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub cancel_requested: bool,
}

impl ServiceStateView {
    pub fn new(
        scope: ServiceScope,
        service_type: ServiceType,
    ) -> Self {
        Self {
            scope,
            service_type,
            desired: ServiceStatus::Inactive,
            current: ServiceStatus::Inactive,
            pending_since: None,
            initializing_since: None,
            active_since: None,
            inactive_since: None,
            failure_time: None,
            consecutive_failures: 0,
            cancel_requested: false,
        }
    }
}

//! Per-node workers started by the supervisor.
//!
//! Streams share [`run_stream`]: open, bootstrap, consume, reconnect.
//! Polled sources share [`run_poller`]. Both report their state through the
//! service-state cache and return when their token fires.

mod balance;
mod channel_events;
mod forwards;
mod graph;
mod htlc;
mod in_flight;
mod invoices;
mod lnd_service;
mod payments;
mod peer_events;
mod poller;
mod stream;
mod transactions;

pub use balance::*;
pub use channel_events::*;
pub use forwards::*;
pub use graph::*;
pub use htlc::*;
pub use in_flight::*;
pub use invoices::*;
pub use lnd_service::*;
pub use payments::*;
pub use peer_events::*;
pub use poller::*;
pub use stream::*;
pub use transactions::*;

#[cfg(test)]
mod balance_test;
#[cfg(test)]
mod forwards_test;
#[cfg(test)]
mod graph_test;
#[cfg(test)]
mod invoices_test;
#[cfg(test)]
mod lnd_service_test;
#[cfg(test)]
mod payments_test;
#[cfg(test)]
mod peer_events_test;

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::LightningClient;
use crate::Node;
use crate::NodeId;
use crate::Plane;
use crate::Result;
use crate::ServiceFuture;
use crate::ServiceScope;
use crate::ServiceStatus;
use crate::ServiceType;
use crate::ValidationError;
use crate::WORKER_RECONNECTS;

/// Everything one worker run needs.
#[derive(Clone)]
pub struct WorkerContext {
    pub plane: Plane,
    pub node_id: NodeId,
    pub service_type: ServiceType,
    pub token: CancellationToken,
}

impl WorkerContext {
    pub fn new(
        plane: Plane,
        node_id: NodeId,
        service_type: ServiceType,
        token: CancellationToken,
    ) -> Self {
        Self {
            plane,
            node_id,
            service_type,
            token,
        }
    }

    pub async fn mark(
        &self,
        status: ServiceStatus,
    ) -> Result<()> {
        self.plane
            .caches
            .services
            .set_current(ServiceScope::Node(self.node_id), self.service_type, status, false)
            .await
    }

    pub fn client(&self) -> Result<Arc<dyn LightningClient>> {
        self.plane.client(self.node_id)
    }

    pub async fn local_node(&self) -> Result<Node> {
        self.plane
            .caches
            .nodes
            .node(self.node_id)
            .await?
            .ok_or_else(|| ValidationError::UnknownNode(self.node_id).into())
    }

    /// Sleeps unless cancelled first; false when cancelled.
    pub(crate) async fn pause(
        &self,
        duration: Duration,
    ) -> bool {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => false,
            _ = sleep(duration) => true,
        }
    }

    pub(crate) fn count_reconnect(&self) {
        WORKER_RECONNECTS
            .with_label_values(&[&self.node_id.to_string(), &self.service_type.to_string()])
            .inc();
    }
}

/// Worker future of one node service; `None` for process services.
pub fn node_worker(
    plane: &Plane,
    node_id: NodeId,
    service_type: ServiceType,
    token: CancellationToken,
) -> Option<ServiceFuture> {
    let workers = plane.settings.workers.clone();
    let ctx = WorkerContext::new(plane.clone(), node_id, service_type, token);
    let secs = Duration::from_secs;
    let worker = match service_type {
        ServiceType::LndService => run_lnd_service(ctx).boxed(),
        ServiceType::ChannelEventStream => run_stream(ctx, ChannelEventProcessor).boxed(),
        ServiceType::GraphEventStream => run_stream(ctx, GraphProcessor::default()).boxed(),
        ServiceType::HtlcEventStream => run_stream(ctx, HtlcProcessor).boxed(),
        ServiceType::ForwardStream => run_poller(
            ctx,
            ForwardsPoller::new(workers.forwards_page_size),
            secs(workers.forwards_poll_interval_in_secs),
        )
        .boxed(),
        ServiceType::PaymentStream => run_poller(
            ctx,
            PaymentsPoller::new(workers.payments_page_size),
            secs(workers.payments_poll_interval_in_secs),
        )
        .boxed(),
        ServiceType::InFlightPaymentStream => run_poller(
            ctx,
            InFlightPoller::new(secs(workers.in_flight_grace_in_secs)),
            secs(workers.in_flight_check_interval_in_secs),
        )
        .boxed(),
        ServiceType::InvoiceStream => {
            run_stream(ctx, InvoiceProcessor::new(workers.invoices_page_size)).boxed()
        }
        ServiceType::TransactionStream => run_stream(ctx, TransactionProcessor).boxed(),
        ServiceType::PeerEventStream => run_stream(ctx, PeerEventProcessor::default()).boxed(),
        ServiceType::ChannelBalanceCacheStream => run_poller(
            ctx,
            BalanceCoordinator::new(workers.balance_full_refresh_ticks),
            secs(workers.balance_tick_in_secs),
        )
        .boxed(),
        _ => return None,
    };
    Some(worker)
}

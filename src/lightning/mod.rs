//! Upstream daemon access.
//!
//! Every component talks to a node through the [`LightningClient`] trait; the
//! messages it exchanges are the daemon's own decoded proto types. The gRPC
//! implementation lives in [`GrpcLightningClient`]; tests use the generated
//! mock.

mod connection_cache;
mod convert;
mod grpc_client;

pub(crate) use connection_cache::*;
pub use convert::*;
pub use grpc_client::*;


use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::BoxStream;
#[cfg(test)]
use mockall::automock;
use parking_lot::RwLock;
use tonic::async_trait;

use crate::proto::lnrpc;
use crate::proto::routerrpc;
use crate::NodeId;
use crate::Result;
use crate::ValidationError;

pub type UpstreamStream<T> = BoxStream<'static, Result<T>>;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait LightningClient: Send + Sync + 'static {
    async fn get_info(&self) -> Result<lnrpc::GetInfoResponse>;

    async fn wallet_balance(&self) -> Result<lnrpc::WalletBalanceResponse>;

    async fn list_channels(&self) -> Result<Vec<lnrpc::Channel>>;

    async fn closed_channels(&self) -> Result<Vec<lnrpc::ChannelCloseSummary>>;

    async fn pending_channels(&self) -> Result<lnrpc::PendingChannelsResponse>;

    /// Fails with an upstream not-found error when the edge is unknown.
    async fn get_chan_info(
        &self,
        chan_id: u64,
    ) -> Result<lnrpc::ChannelEdge>;

    async fn get_node_info(
        &self,
        pub_key: String,
    ) -> Result<lnrpc::NodeInfo>;

    async fn list_payments(
        &self,
        request: lnrpc::ListPaymentsRequest,
    ) -> Result<lnrpc::ListPaymentsResponse>;

    async fn list_invoices(
        &self,
        request: lnrpc::ListInvoiceRequest,
    ) -> Result<lnrpc::ListInvoiceResponse>;

    async fn add_invoice(
        &self,
        invoice: lnrpc::Invoice,
    ) -> Result<lnrpc::AddInvoiceResponse>;

    async fn decode_pay_req(
        &self,
        pay_req: String,
    ) -> Result<lnrpc::PayReq>;

    async fn forwarding_history(
        &self,
        request: lnrpc::ForwardingHistoryRequest,
    ) -> Result<lnrpc::ForwardingHistoryResponse>;

    async fn get_transactions(
        &self,
        start_height: i32,
    ) -> Result<Vec<lnrpc::Transaction>>;

    async fn sign_message(
        &self,
        msg: Vec<u8>,
        single_hash: bool,
    ) -> Result<String>;

    async fn verify_message(
        &self,
        msg: Vec<u8>,
        signature: String,
    ) -> Result<lnrpc::VerifyMessageResponse>;

    async fn update_channel_policy(
        &self,
        request: lnrpc::PolicyUpdateRequest,
    ) -> Result<lnrpc::PolicyUpdateResponse>;

    async fn update_chan_status(
        &self,
        request: routerrpc::UpdateChanStatusRequest,
    ) -> Result<()>;

    /// Funding outpoint of the new channel once the funding transaction is published.
    async fn open_channel(
        &self,
        request: lnrpc::OpenChannelRequest,
    ) -> Result<lnrpc::ChannelPoint>;

    /// Close progress: a pending update carrying the closing txid, then the
    /// confirmation.
    async fn close_channel(
        &self,
        request: lnrpc::CloseChannelRequest,
    ) -> Result<UpstreamStream<lnrpc::CloseStatusUpdate>>;

    /// Payment status updates until the payment reaches a terminal state.
    async fn send_payment(
        &self,
        request: routerrpc::SendPaymentRequest,
    ) -> Result<UpstreamStream<lnrpc::Payment>>;

    async fn subscribe_channel_events(&self) -> Result<UpstreamStream<lnrpc::ChannelEventUpdate>>;

    async fn subscribe_channel_graph(&self) -> Result<UpstreamStream<lnrpc::GraphTopologyUpdate>>;

    async fn subscribe_htlc_events(&self) -> Result<UpstreamStream<routerrpc::HtlcEvent>>;

    async fn subscribe_invoices(
        &self,
        add_index: u64,
        settle_index: u64,
    ) -> Result<UpstreamStream<lnrpc::Invoice>>;

    async fn subscribe_peer_events(&self) -> Result<UpstreamStream<lnrpc::PeerEvent>>;

    async fn subscribe_transactions(&self) -> Result<UpstreamStream<lnrpc::Transaction>>;
}

/// Clients of every local node, by node id.
#[derive(Default)]
pub struct LightningClients {
    clients: RwLock<HashMap<NodeId, Arc<dyn LightningClient>>>,
}

impl LightningClients {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &self,
        node_id: NodeId,
        client: Arc<dyn LightningClient>,
    ) {
        self.clients.write().insert(node_id, client);
    }

    pub fn get(
        &self,
        node_id: NodeId,
    ) -> Result<Arc<dyn LightningClient>> {
        if node_id == 0 {
            return Err(ValidationError::MissingNodeId.into());
        }
        self.clients
            .read()
            .get(&node_id)
            .cloned()
            .ok_or_else(|| ValidationError::UnknownNode(node_id).into())
    }
}

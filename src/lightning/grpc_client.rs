//! gRPC implementation of [`LightningClient`].

use std::sync::Arc;

use autometrics::autometrics;
use futures::StreamExt;
use tonic::async_trait;
use tonic::codegen::InterceptedService;
use tonic::metadata::AsciiMetadataValue;
use tonic::service::Interceptor;
use tonic::transport::Channel;
use tonic::Status;
use tracing::debug;

use super::ConnectionCache;
use super::LightningClient;
use super::NodeEndpoint;
use super::UpstreamStream;
use crate::proto::lnrpc;
use crate::proto::lnrpc::lightning_client::LightningClient as LnrpcClient;
use crate::proto::routerrpc;
use crate::proto::routerrpc::router_client::RouterClient;
use crate::Error;
use crate::NodeConnectionConfig;
use crate::NodeId;
use crate::Result;
use crate::API_SLO;

/// Attaches the hex-encoded macaroon to every call.
#[derive(Clone)]
pub(crate) struct MacaroonInterceptor {
    macaroon: AsciiMetadataValue,
}

impl Interceptor for MacaroonInterceptor {
    fn call(
        &mut self,
        mut request: tonic::Request<()>,
    ) -> std::result::Result<tonic::Request<()>, Status> {
        request.metadata_mut().insert("macaroon", self.macaroon.clone());
        Ok(request)
    }
}

type Intercepted = InterceptedService<Channel, MacaroonInterceptor>;

pub struct GrpcLightningClient {
    node_id: NodeId,
    endpoint: NodeEndpoint,
    connections: Arc<ConnectionCache>,
    max_decoding_message_size: usize,
}

impl GrpcLightningClient {
    pub(crate) fn new(
        node_id: NodeId,
        config: &NodeConnectionConfig,
        connections: Arc<ConnectionCache>,
        max_decoding_message_size: usize,
    ) -> Self {
        Self {
            node_id,
            endpoint: NodeEndpoint {
                address: config.grpc_address.clone(),
                tls_cert_path: config.tls_cert_path.clone(),
                macaroon_path: config.macaroon_path.clone(),
            },
            connections,
            max_decoding_message_size,
        }
    }

    async fn lightning(&self) -> Result<LnrpcClient<Intercepted>> {
        let (channel, macaroon) =
            self.connections.get_channel(self.node_id, &self.endpoint).await?;
        Ok(LnrpcClient::with_interceptor(channel, MacaroonInterceptor { macaroon })
            .max_decoding_message_size(self.max_decoding_message_size))
    }

    async fn router(&self) -> Result<RouterClient<Intercepted>> {
        let (channel, macaroon) =
            self.connections.get_channel(self.node_id, &self.endpoint).await?;
        Ok(RouterClient::with_interceptor(channel, MacaroonInterceptor { macaroon })
            .max_decoding_message_size(self.max_decoding_message_size))
    }
}

fn boxed<T: Send + 'static>(stream: tonic::Streaming<T>) -> UpstreamStream<T> {
    stream.map(|item| item.map_err(Error::from)).boxed()
}

#[async_trait]
impl LightningClient for GrpcLightningClient {
    #[autometrics(objective = API_SLO)]
    async fn get_info(&self) -> Result<lnrpc::GetInfoResponse> {
        let response = self.lightning().await?.get_info(lnrpc::GetInfoRequest {}).await?;
        Ok(response.into_inner())
    }

    async fn wallet_balance(&self) -> Result<lnrpc::WalletBalanceResponse> {
        let response = self
            .lightning()
            .await?
            .wallet_balance(lnrpc::WalletBalanceRequest {})
            .await?;
        Ok(response.into_inner())
    }

    async fn list_channels(&self) -> Result<Vec<lnrpc::Channel>> {
        let response = self
            .lightning()
            .await?
            .list_channels(lnrpc::ListChannelsRequest::default())
            .await?;
        Ok(response.into_inner().channels)
    }

    async fn closed_channels(&self) -> Result<Vec<lnrpc::ChannelCloseSummary>> {
        let response = self
            .lightning()
            .await?
            .closed_channels(lnrpc::ClosedChannelsRequest::default())
            .await?;
        Ok(response.into_inner().channels)
    }

    async fn pending_channels(&self) -> Result<lnrpc::PendingChannelsResponse> {
        let response = self
            .lightning()
            .await?
            .pending_channels(lnrpc::PendingChannelsRequest::default())
            .await?;
        Ok(response.into_inner())
    }

    async fn get_chan_info(
        &self,
        chan_id: u64,
    ) -> Result<lnrpc::ChannelEdge> {
        let response = self
            .lightning()
            .await?
            .get_chan_info(lnrpc::ChanInfoRequest { chan_id })
            .await?;
        Ok(response.into_inner())
    }

    async fn get_node_info(
        &self,
        pub_key: String,
    ) -> Result<lnrpc::NodeInfo> {
        let response = self
            .lightning()
            .await?
            .get_node_info(lnrpc::NodeInfoRequest {
                pub_key,
                include_channels: false,
            })
            .await?;
        Ok(response.into_inner())
    }

    async fn list_payments(
        &self,
        request: lnrpc::ListPaymentsRequest,
    ) -> Result<lnrpc::ListPaymentsResponse> {
        Ok(self.lightning().await?.list_payments(request).await?.into_inner())
    }

    async fn list_invoices(
        &self,
        request: lnrpc::ListInvoiceRequest,
    ) -> Result<lnrpc::ListInvoiceResponse> {
        Ok(self.lightning().await?.list_invoices(request).await?.into_inner())
    }

    async fn add_invoice(
        &self,
        invoice: lnrpc::Invoice,
    ) -> Result<lnrpc::AddInvoiceResponse> {
        Ok(self.lightning().await?.add_invoice(invoice).await?.into_inner())
    }

    async fn decode_pay_req(
        &self,
        pay_req: String,
    ) -> Result<lnrpc::PayReq> {
        let response = self
            .lightning()
            .await?
            .decode_pay_req(lnrpc::PayReqString { pay_req })
            .await?;
        Ok(response.into_inner())
    }

    async fn forwarding_history(
        &self,
        request: lnrpc::ForwardingHistoryRequest,
    ) -> Result<lnrpc::ForwardingHistoryResponse> {
        Ok(self.lightning().await?.forwarding_history(request).await?.into_inner())
    }

    async fn get_transactions(
        &self,
        start_height: i32,
    ) -> Result<Vec<lnrpc::Transaction>> {
        let response = self
            .lightning()
            .await?
            .get_transactions(lnrpc::GetTransactionsRequest {
                start_height,
                end_height: -1,
                account: String::new(),
            })
            .await?;
        Ok(response.into_inner().transactions)
    }

    #[autometrics(objective = API_SLO)]
    async fn sign_message(
        &self,
        msg: Vec<u8>,
        single_hash: bool,
    ) -> Result<String> {
        let response = self
            .lightning()
            .await?
            .sign_message(lnrpc::SignMessageRequest { msg, single_hash })
            .await?;
        Ok(response.into_inner().signature)
    }

    #[autometrics(objective = API_SLO)]
    async fn verify_message(
        &self,
        msg: Vec<u8>,
        signature: String,
    ) -> Result<lnrpc::VerifyMessageResponse> {
        let response = self
            .lightning()
            .await?
            .verify_message(lnrpc::VerifyMessageRequest { msg, signature })
            .await?;
        Ok(response.into_inner())
    }

    #[autometrics(objective = API_SLO)]
    async fn update_channel_policy(
        &self,
        request: lnrpc::PolicyUpdateRequest,
    ) -> Result<lnrpc::PolicyUpdateResponse> {
        debug!(node_id = self.node_id, "UpdateChannelPolicy");
        Ok(self.lightning().await?.update_channel_policy(request).await?.into_inner())
    }

    #[autometrics(objective = API_SLO)]
    async fn update_chan_status(
        &self,
        request: routerrpc::UpdateChanStatusRequest,
    ) -> Result<()> {
        debug!(node_id = self.node_id, "UpdateChanStatus");
        self.router().await?.update_chan_status(request).await?;
        Ok(())
    }

    #[autometrics(objective = API_SLO)]
    async fn open_channel(
        &self,
        request: lnrpc::OpenChannelRequest,
    ) -> Result<lnrpc::ChannelPoint> {
        debug!(node_id = self.node_id, "OpenChannelSync");
        Ok(self.lightning().await?.open_channel_sync(request).await?.into_inner())
    }

    async fn close_channel(
        &self,
        request: lnrpc::CloseChannelRequest,
    ) -> Result<UpstreamStream<lnrpc::CloseStatusUpdate>> {
        debug!(node_id = self.node_id, force = request.force, "CloseChannel");
        let stream = self.lightning().await?.close_channel(request).await?.into_inner();
        Ok(boxed(stream))
    }

    async fn send_payment(
        &self,
        request: routerrpc::SendPaymentRequest,
    ) -> Result<UpstreamStream<lnrpc::Payment>> {
        let stream = self.router().await?.send_payment_v2(request).await?.into_inner();
        Ok(boxed(stream))
    }

    async fn subscribe_channel_events(&self) -> Result<UpstreamStream<lnrpc::ChannelEventUpdate>> {
        let stream = self
            .lightning()
            .await?
            .subscribe_channel_events(lnrpc::ChannelEventSubscription {})
            .await?
            .into_inner();
        Ok(boxed(stream))
    }

    async fn subscribe_channel_graph(&self) -> Result<UpstreamStream<lnrpc::GraphTopologyUpdate>> {
        let stream = self
            .lightning()
            .await?
            .subscribe_channel_graph(lnrpc::GraphTopologySubscription {})
            .await?
            .into_inner();
        Ok(boxed(stream))
    }

    async fn subscribe_htlc_events(&self) -> Result<UpstreamStream<routerrpc::HtlcEvent>> {
        let stream = self
            .router()
            .await?
            .subscribe_htlc_events(routerrpc::SubscribeHtlcEventsRequest {})
            .await?
            .into_inner();
        Ok(boxed(stream))
    }

    async fn subscribe_invoices(
        &self,
        add_index: u64,
        settle_index: u64,
    ) -> Result<UpstreamStream<lnrpc::Invoice>> {
        let stream = self
            .lightning()
            .await?
            .subscribe_invoices(lnrpc::InvoiceSubscription {
                add_index,
                settle_index,
            })
            .await?
            .into_inner();
        Ok(boxed(stream))
    }

    async fn subscribe_peer_events(&self) -> Result<UpstreamStream<lnrpc::PeerEvent>> {
        let stream = self
            .lightning()
            .await?
            .subscribe_peer_events(lnrpc::PeerEventSubscription {})
            .await?
            .into_inner();
        Ok(boxed(stream))
    }

    async fn subscribe_transactions(&self) -> Result<UpstreamStream<lnrpc::Transaction>> {
        let stream = self
            .lightning()
            .await?
            .subscribe_transactions(lnrpc::GetTransactionsRequest::default())
            .await?
            .into_inner();
        Ok(boxed(stream))
    }
}

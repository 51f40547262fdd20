use tokio::sync::mpsc;
use tokio::sync::oneshot;

use crate::ChannelStatusRequest;
use crate::ChannelStatusResponse;
use crate::CloseChannelRequest;
use crate::CloseChannelResponse;
use crate::ImportRequest;
use crate::ImportResponse;
use crate::InformationResponse;
use crate::NodeId;
use crate::OpenChannelRequest;
use crate::OpenChannelResponse;
use crate::Result;
use crate::RoutingPolicyRequest;
use crate::RoutingPolicyResponse;
use crate::SignMessageRequest;
use crate::SignMessageResponse;
use crate::SystemError;
use crate::VerifyMessageRequest;
use crate::VerifyMessageResponse;
use crate::WalletBalanceResponse;

const ACTOR: &str = "gateway";

/// One queued control request and the channel its response goes to.
#[derive(Debug)]
pub enum GatewayRequest {
    ChannelStatus(ChannelStatusRequest, oneshot::Sender<ChannelStatusResponse>),
    RoutingPolicy(RoutingPolicyRequest, oneshot::Sender<RoutingPolicyResponse>),
    SignMessage(SignMessageRequest, oneshot::Sender<SignMessageResponse>),
    VerifyMessage(VerifyMessageRequest, oneshot::Sender<VerifyMessageResponse>),
    OpenChannel(OpenChannelRequest, oneshot::Sender<OpenChannelResponse>),
    CloseChannel(CloseChannelRequest, oneshot::Sender<CloseChannelResponse>),
    Information(NodeId, oneshot::Sender<InformationResponse>),
    WalletBalance(NodeId, oneshot::Sender<WalletBalanceResponse>),
    Import(ImportRequest, oneshot::Sender<ImportResponse>),
}

impl GatewayRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayRequest::ChannelStatus(..) => "channel_status",
            GatewayRequest::RoutingPolicy(..) => "routing_policy",
            GatewayRequest::SignMessage(..) => "sign_message",
            GatewayRequest::VerifyMessage(..) => "verify_message",
            GatewayRequest::OpenChannel(..) => "open_channel",
            GatewayRequest::CloseChannel(..) => "close_channel",
            GatewayRequest::Information(..) => "information",
            GatewayRequest::WalletBalance(..) => "wallet_balance",
            GatewayRequest::Import(..) => "import",
        }
    }
}

/// Send side of the gateway queue, handed to the admin collaborators.
#[derive(Debug, Clone)]
pub struct GatewayHandle {
    sender: mpsc::Sender<GatewayRequest>,
}

impl GatewayHandle {
    pub fn new(sender: mpsc::Sender<GatewayRequest>) -> Self {
        Self { sender }
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> GatewayRequest,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.sender
            .send(build(reply))
            .await
            .map_err(|_| SystemError::ActorGone(ACTOR))?;
        rx.await.map_err(|_| SystemError::ActorGone(ACTOR).into())
    }

    pub async fn channel_status(
        &self,
        request: ChannelStatusRequest,
    ) -> Result<ChannelStatusResponse> {
        self.call(|reply| GatewayRequest::ChannelStatus(request, reply)).await
    }

    pub async fn routing_policy(
        &self,
        request: RoutingPolicyRequest,
    ) -> Result<RoutingPolicyResponse> {
        self.call(|reply| GatewayRequest::RoutingPolicy(request, reply)).await
    }

    pub async fn sign_message(
        &self,
        request: SignMessageRequest,
    ) -> Result<SignMessageResponse> {
        self.call(|reply| GatewayRequest::SignMessage(request, reply)).await
    }

    pub async fn verify_message(
        &self,
        request: VerifyMessageRequest,
    ) -> Result<VerifyMessageResponse> {
        self.call(|reply| GatewayRequest::VerifyMessage(request, reply)).await
    }

    pub async fn open_channel(
        &self,
        request: OpenChannelRequest,
    ) -> Result<OpenChannelResponse> {
        self.call(|reply| GatewayRequest::OpenChannel(request, reply)).await
    }

    pub async fn close_channel(
        &self,
        request: CloseChannelRequest,
    ) -> Result<CloseChannelResponse> {
        self.call(|reply| GatewayRequest::CloseChannel(request, reply)).await
    }

    pub async fn information(
        &self,
        node_id: NodeId,
    ) -> Result<InformationResponse> {
        self.call(|reply| GatewayRequest::Information(node_id, reply)).await
    }

    pub async fn wallet_balance(
        &self,
        node_id: NodeId,
    ) -> Result<WalletBalanceResponse> {
        self.call(|reply| GatewayRequest::WalletBalance(node_id, reply)).await
    }

    pub async fn import(
        &self,
        request: ImportRequest,
    ) -> Result<ImportResponse> {
        self.call(|reply| GatewayRequest::Import(request, reply)).await
    }
}

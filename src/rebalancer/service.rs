//! Executes rebalance requests: self-invoice, then a constrained self-payment.
//! The daemon does the pathfinding.

use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use crate::failure_reason;
use crate::payment_status;
use crate::proto::lnrpc;
use crate::proto::routerrpc;
use crate::ErrorClass;
use crate::PaymentStatus;
use crate::Plane;
use crate::RateLimitError;
use crate::RebalanceKey;
use crate::RebalanceRequest;
use crate::RebalanceResponse;
use crate::RebalanceResult;
use crate::RebalanceStatus;
use crate::RebalancerConfig;
use crate::RequestQueue;
use crate::Result;
use crate::ServiceStatus;
use crate::SystemError;
use crate::UpstreamError;
use crate::ValidationError;
use crate::REBALANCE_ATTEMPTS;

pub type RebalanceCommand = (RebalanceRequest, oneshot::Sender<RebalanceResponse>);

/// Send side of the rebalance request queue.
#[derive(Debug, Clone)]
pub struct RebalancerHandle {
    sender: mpsc::Sender<RebalanceCommand>,
}

impl RebalancerHandle {
    pub fn new(sender: mpsc::Sender<RebalanceCommand>) -> Self {
        Self { sender }
    }

    pub async fn rebalance(
        &self,
        request: RebalanceRequest,
    ) -> Result<RebalanceResponse> {
        let (reply, rx) = oneshot::channel();
        self.sender
            .send((request, reply))
            .await
            .map_err(|_| SystemError::ActorGone("rebalancer"))?;
        rx.await.map_err(|_| SystemError::ActorGone("rebalancer").into())
    }
}

pub struct RebalanceService {
    plane: Plane,
    config: RebalancerConfig,
}

impl RebalanceService {
    pub fn new(plane: Plane) -> Self {
        let config = plane.settings.rebalancer.clone();
        Self { plane, config }
    }

    /// Serves queued requests until `token` fires; each request runs in its own task.
    pub async fn serve(
        self: Arc<Self>,
        queue: RequestQueue<RebalanceCommand>,
        token: CancellationToken,
    ) -> Result<()> {
        let mut requests = queue.lock().await;
        info!("rebalance service started");
        loop {
            let (request, reply) = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!("rebalance service stopped");
                    return Ok(());
                }
                command = requests.recv() => match command {
                    Some(command) => command,
                    None => return Ok(()),
                }
            };
            let service = self.clone();
            let token = token.child_token();
            tokio::spawn(async move {
                let response = service.rebalance(request, token).await;
                let _ = reply.send(response);
            });
        }
    }

    /// Admits, executes and records one attempt.
    #[instrument(skip(self, token), fields(node_id = request.node_id))]
    pub async fn rebalance(
        &self,
        request: RebalanceRequest,
        token: CancellationToken,
    ) -> RebalanceResponse {
        let key = match self.admit(&request, &token).await {
            Ok(key) => key,
            Err(e) => {
                warn!("rebalance rejected: {}", e);
                REBALANCE_ATTEMPTS.with_label_values(&["rejected"]).inc();
                return RebalanceResponse::failed(request, &e);
            }
        };

        let result = match self.execute(&request, &token).await {
            Ok(result) => result,
            Err(e) => RebalanceResult {
                status: RebalanceStatus::Failed,
                total_fee_msat: 0,
                payment_hash: None,
                error: Some(e.to_string()),
                at: Utc::now(),
            },
        };
        let outcome = match result.status {
            RebalanceStatus::Succeeded => "succeeded",
            RebalanceStatus::Failed => "failed",
            RebalanceStatus::Cancelled => "cancelled",
        };
        REBALANCE_ATTEMPTS.with_label_values(&[outcome]).inc();
        info!(?key, outcome, fee_msat = result.total_fee_msat, "rebalance finished");

        if let Err(e) = self.record(key, &request, &result).await {
            warn!("rebalance result not recorded: {}", e);
        }
        if let Err(e) = self.plane.rebalances.remove(key).await {
            warn!("rebalance key not released: {}", e);
        }

        match result.status {
            RebalanceStatus::Succeeded => RebalanceResponse::active(request, Some(result)),
            _ => RebalanceResponse {
                request,
                status: ServiceStatus::Inactive,
                error: result.error.clone().or_else(|| Some(outcome.to_string())),
                error_class: Some(ErrorClass::UpstreamPermanent),
                output: Some(result),
            },
        }
    }

    /// Stops the live attempt for the request's key; false when none is live.
    pub async fn cancel(
        &self,
        request: &RebalanceRequest,
    ) -> Result<bool> {
        let key = RebalanceKey::of(request)?;
        self.plane.rebalances.cancel(key).await
    }

    async fn admit(
        &self,
        request: &RebalanceRequest,
        token: &CancellationToken,
    ) -> Result<RebalanceKey> {
        if request.node_id == 0 {
            return Err(ValidationError::MissingNodeId.into());
        }
        let key = RebalanceKey::of(request)?;
        if request.amount_msat == 0 {
            return Err(ValidationError::MissingRebalanceAmount.into());
        }
        if !self.plane.rebalances.register(request.clone(), token.clone()).await? {
            return Err(RateLimitError::RebalanceAlreadyRunning.into());
        }
        Ok(key)
    }

    async fn execute(
        &self,
        request: &RebalanceRequest,
        token: &CancellationToken,
    ) -> Result<RebalanceResult> {
        let key = RebalanceKey::of(request)?;
        let caches = &self.plane.caches;
        let channel = caches
            .channels
            .get(key.focus_channel_id)
            .await?
            .filter(|c| c.involves(request.node_id) && c.status.is_open())
            .ok_or(ValidationError::UnknownChannel {
                node_id: request.node_id,
                channel_id: key.focus_channel_id,
            })?;
        let client = self.plane.client(request.node_id)?;

        let invoice = client
            .add_invoice(lnrpc::Invoice {
                memo: format!("rebalance {:?} {}", request.origin, request.origin_id),
                value_msat: request.amount_msat as i64,
                expiry: self.config.invoice_expiry_in_secs as i64,
                ..Default::default()
            })
            .await?;
        let payment_hash = hex::encode(&invoice.r_hash);

        let mut payment = routerrpc::SendPaymentRequest {
            payment_request: invoice.payment_request,
            timeout_seconds: self.config.payment_timeout_in_secs as i32,
            fee_limit_msat: request.max_fee_msat as i64,
            allow_self_payment: true,
            no_inflight_updates: true,
            ..Default::default()
        };
        if key.incoming {
            let peer = caches
                .nodes
                .node(channel.peer_of(request.node_id))
                .await?
                .ok_or(ValidationError::UnknownNode(channel.peer_of(request.node_id)))?;
            payment.last_hop_pubkey = hex::decode(&peer.public_key)
                .map_err(|e| ValidationError::InvalidRequest(e.to_string()))?;
        } else {
            let lnd_id = channel.lnd_short_channel_id.ok_or_else(|| {
                ValidationError::InvalidShortChannelId(channel.channel_point.to_string())
            })?;
            payment.outgoing_chan_ids = vec![lnd_id];
        }

        let mut updates = client.send_payment(payment).await?;
        loop {
            let update = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    return Ok(RebalanceResult {
                        status: RebalanceStatus::Cancelled,
                        total_fee_msat: 0,
                        payment_hash: Some(payment_hash),
                        error: Some("cancelled".to_string()),
                        at: Utc::now(),
                    });
                }
                update = updates.next() => update,
            };
            let update = match update {
                Some(update) => update?,
                None => return Err(UpstreamError::StreamClosed.into()),
            };
            match payment_status(update.status) {
                PaymentStatus::Succeeded => {
                    return Ok(RebalanceResult {
                        status: RebalanceStatus::Succeeded,
                        total_fee_msat: update.fee_msat,
                        payment_hash: Some(payment_hash),
                        error: None,
                        at: Utc::now(),
                    });
                }
                PaymentStatus::Failed => {
                    return Ok(RebalanceResult {
                        status: RebalanceStatus::Failed,
                        total_fee_msat: 0,
                        payment_hash: Some(payment_hash),
                        error: Some(format!("{:?}", failure_reason(update.failure_reason))),
                        at: Utc::now(),
                    });
                }
                _ => continue,
            }
        }
    }

    async fn record(
        &self,
        key: RebalanceKey,
        request: &RebalanceRequest,
        result: &RebalanceResult,
    ) -> Result<()> {
        self.plane.rebalances.append_result(key, result.clone()).await?;
        self.plane.store.add_rebalance_log(request, result)?;
        Ok(())
    }
}

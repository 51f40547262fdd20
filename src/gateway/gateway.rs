use std::sync::Arc;
use std::time::Duration;

use autometrics::autometrics;
use chrono::DateTime;
use chrono::Utc;
use futures::StreamExt;
use tokio::sync::Semaphore;
use tokio::sync::SemaphorePermit;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use super::field_changes;
use super::ChangeLedger;
use super::GatewayRequest;
use crate::channel_point_from_proto;
use crate::channel_point_to_proto;
use crate::proto::lnrpc;
use crate::proto::lnrpc::close_status_update::Update;
use crate::proto::lnrpc::policy_update_request::Scope;
use crate::proto::routerrpc;
use crate::proto::routerrpc::ChanStatusAction;
use crate::utils::async_task::with_timeout;
use crate::Channel;
use crate::ChannelId;
use crate::ChannelPoint;
use crate::ChannelState;
use crate::ChannelStatusRequest;
use crate::ChannelStatusResponse;
use crate::CloseChannelRequest;
use crate::CloseChannelResponse;
use crate::FailedPolicyUpdate;
use crate::GatewayConfig;
use crate::ImportOutcome;
use crate::ImportRequest;
use crate::ImportResponse;
use crate::InformationResponse;
use crate::Network;
use crate::NodeId;
use crate::NodeInformation;
use crate::OpenChannelRequest;
use crate::OpenChannelResponse;
use crate::Plane;
use crate::PolicyField;
use crate::RateLimitError;
use crate::RequestQueue;
use crate::Response;
use crate::Result;
use crate::RoutingPolicy;
use crate::RoutingPolicyRequest;
use crate::RoutingPolicyResponse;
use crate::ServiceStatus;
use crate::SignMessageRequest;
use crate::SignMessageResponse;
use crate::UpstreamError;
use crate::UpstreamStream;
use crate::ValidationError;
use crate::VerifyMessageRequest;
use crate::VerifyMessageResponse;
use crate::VerifyOutcome;
use crate::WalletBalance;
use crate::WalletBalanceResponse;
use crate::API_SLO;
use crate::GATEWAY_REQUESTS;

pub struct Gateway {
    plane: Plane,
    config: GatewayConfig,
    admission: Semaphore,
    changes: ChangeLedger,
}

impl Gateway {
    pub fn new(plane: Plane) -> Self {
        let config = plane.settings.gateway.clone();
        Self {
            admission: Semaphore::new(config.max_concurrency),
            changes: ChangeLedger::default(),
            plane,
            config,
        }
    }

    /// Serves queued requests until `token` fires. Requests run concurrently;
    /// the admission semaphore bounds how many reach the daemon at once.
    pub async fn serve(
        self: Arc<Self>,
        queue: RequestQueue<GatewayRequest>,
        token: CancellationToken,
    ) -> Result<()> {
        let mut requests = queue.lock().await;
        info!("gateway started");
        loop {
            let request = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!("gateway stopped");
                    return Ok(());
                }
                request = requests.recv() => match request {
                    Some(request) => request,
                    None => return Ok(()),
                }
            };
            let gateway = self.clone();
            let token = token.child_token();
            tokio::spawn(async move { gateway.dispatch(request, &token).await });
        }
    }

    /// Answers one request on its reply channel. A caller that went away is ignored.
    pub async fn dispatch(
        &self,
        request: GatewayRequest,
        token: &CancellationToken,
    ) {
        match request {
            GatewayRequest::ChannelStatus(request, reply) => {
                let _ = reply.send(self.channel_status(request, token).await);
            }
            GatewayRequest::RoutingPolicy(request, reply) => {
                let _ = reply.send(self.routing_policy(request, token).await);
            }
            GatewayRequest::SignMessage(request, reply) => {
                let _ = reply.send(self.sign_message(request, token).await);
            }
            GatewayRequest::VerifyMessage(request, reply) => {
                let _ = reply.send(self.verify_message(request, token).await);
            }
            GatewayRequest::OpenChannel(request, reply) => {
                let _ = reply.send(self.open_channel(request, token).await);
            }
            GatewayRequest::CloseChannel(request, reply) => {
                let _ = reply.send(self.close_channel(request, token).await);
            }
            GatewayRequest::Information(node_id, reply) => {
                let _ = reply.send(self.information(node_id, token).await);
            }
            GatewayRequest::WalletBalance(node_id, reply) => {
                let _ = reply.send(self.wallet_balance(node_id, token).await);
            }
            GatewayRequest::Import(request, reply) => {
                let _ = reply.send(self.import(request, token).await);
            }
        }
    }

    #[autometrics(objective = API_SLO)]
    #[instrument(skip(self, token), fields(node_id = request.node_id, channel_id = request.channel_id))]
    pub async fn channel_status(
        &self,
        request: ChannelStatusRequest,
        token: &CancellationToken,
    ) -> ChannelStatusResponse {
        let result = self.apply_channel_status(&request, token).await;
        finish("channel_status", request, result.map(|_| None))
    }

    #[autometrics(objective = API_SLO)]
    #[instrument(skip(self, token), fields(node_id = request.node_id, channel_id = request.channel_id))]
    pub async fn routing_policy(
        &self,
        request: RoutingPolicyRequest,
        token: &CancellationToken,
    ) -> RoutingPolicyResponse {
        let result = self.apply_routing_policy(&request, token).await;
        finish("routing_policy", request, result)
    }

    #[autometrics(objective = API_SLO)]
    pub async fn sign_message(
        &self,
        request: SignMessageRequest,
        token: &CancellationToken,
    ) -> SignMessageResponse {
        let result: Result<Option<String>> = async {
            let client = self.plane.client(request.node_id)?;
            let _permit = self.admit(token).await?;
            with_timeout(
                self.config.control_timeout(),
                client.sign_message(request.message.clone(), request.single_hash),
            )
            .await
            .map(Some)
        }
        .await;
        finish("sign_message", request, result)
    }

    #[autometrics(objective = API_SLO)]
    pub async fn verify_message(
        &self,
        request: VerifyMessageRequest,
        token: &CancellationToken,
    ) -> VerifyMessageResponse {
        let result: Result<Option<VerifyOutcome>> = async {
            let client = self.plane.client(request.node_id)?;
            let _permit = self.admit(token).await?;
            let response = with_timeout(
                self.config.control_timeout(),
                client.verify_message(request.message.clone(), request.signature.clone()),
            )
            .await?;
            Ok(Some(VerifyOutcome {
                valid: response.valid,
                public_key: response.pubkey,
            }))
        }
        .await;
        finish("verify_message", request, result)
    }

    #[autometrics(objective = API_SLO)]
    #[instrument(skip(self, token), fields(node_id = request.node_id))]
    pub async fn open_channel(
        &self,
        request: OpenChannelRequest,
        token: &CancellationToken,
    ) -> OpenChannelResponse {
        let result: Result<Option<ChannelPoint>> = async {
            let node_pubkey = hex::decode(&request.remote_public_key)
                .ok()
                .filter(|key| key.len() == 33)
                .ok_or_else(|| {
                    ValidationError::InvalidRequest(format!(
                        "remote public key {} is not a 33-byte hex key",
                        request.remote_public_key
                    ))
                })?;
            if request.local_funding_sat <= 0 {
                return Err(ValidationError::InvalidRequest(
                    "local funding amount must be positive".to_string(),
                )
                .into());
            }
            let client = self.plane.client(request.node_id)?;
            let _permit = self.admit(token).await?;
            let point = with_timeout(
                self.config.control_timeout(),
                client.open_channel(lnrpc::OpenChannelRequest {
                    node_pubkey,
                    local_funding_amount: request.local_funding_sat,
                    push_sat: request.push_sat,
                    private: request.private,
                    sat_per_vbyte: request.sat_per_vbyte.unwrap_or(0),
                    ..Default::default()
                }),
            )
            .await?;
            let point = channel_point_from_proto(&point)?;
            info!(%point, "channel funding published");
            Ok(Some(point))
        }
        .await;
        finish("open_channel", request, result)
    }

    /// Answers once the daemon reports the closing transaction; confirmation is
    /// observed later through the channel event stream.
    #[autometrics(objective = API_SLO)]
    #[instrument(skip(self, token), fields(node_id = request.node_id, channel_id = request.channel_id))]
    pub async fn close_channel(
        &self,
        request: CloseChannelRequest,
        token: &CancellationToken,
    ) -> CloseChannelResponse {
        let result: Result<Option<String>> = async {
            validate_ids(request.node_id, request.channel_id)?;
            let (channel, _) = self.channel_with_state(request.node_id, request.channel_id).await?;
            let client = self.plane.client(request.node_id)?;
            let _permit = self.admit(token).await?;
            let closing_txid = with_timeout(self.config.control_timeout(), async {
                let mut updates = client
                    .close_channel(lnrpc::CloseChannelRequest {
                        channel_point: Some(channel_point_to_proto(&channel.channel_point)),
                        force: request.force,
                        sat_per_vbyte: request.sat_per_vbyte.unwrap_or(0),
                        ..Default::default()
                    })
                    .await?;
                closing_txid(&mut updates).await
            })
            .await?;
            info!(force = request.force, %closing_txid, "channel close published");
            Ok(Some(closing_txid))
        }
        .await;
        finish("close_channel", request, result)
    }

    #[autometrics(objective = API_SLO)]
    pub async fn information(
        &self,
        node_id: NodeId,
        token: &CancellationToken,
    ) -> InformationResponse {
        let result: Result<Option<NodeInformation>> = async {
            let client = self.plane.client(node_id)?;
            let _permit = self.admit(token).await?;
            let info = with_timeout(self.config.control_timeout(), client.get_info()).await?;
            Ok(Some(node_information(info)))
        }
        .await;
        finish("information", node_id, result)
    }

    #[autometrics(objective = API_SLO)]
    pub async fn wallet_balance(
        &self,
        node_id: NodeId,
        token: &CancellationToken,
    ) -> WalletBalanceResponse {
        let result: Result<Option<WalletBalance>> = async {
            let client = self.plane.client(node_id)?;
            let _permit = self.admit(token).await?;
            let balance =
                with_timeout(self.config.control_timeout(), client.wallet_balance()).await?;
            Ok(Some(WalletBalance {
                total_balance: balance.total_balance,
                confirmed_balance: balance.confirmed_balance,
                unconfirmed_balance: balance.unconfirmed_balance,
                locked_balance: balance.locked_balance,
            }))
        }
        .await;
        finish("wallet_balance", node_id, result)
    }

    #[autometrics(objective = API_SLO)]
    #[instrument(skip(self, token), fields(node_id = request.node_id))]
    pub async fn import(
        &self,
        request: ImportRequest,
        token: &CancellationToken,
    ) -> ImportResponse {
        let result: Result<Option<ImportOutcome>> = async {
            self.plane.client(request.node_id)?;
            let _permit = self.admit(token).await?;
            let outcome: ImportOutcome = with_timeout(
                self.config.import_timeout(),
                self.plane.importer.import(
                    &self.plane,
                    request.node_id,
                    request.import_type,
                    request.force,
                ),
            )
            .await?;
            Ok(Some(outcome))
        }
        .await;
        finish("import", request, result)
    }

    async fn admit(
        &self,
        token: &CancellationToken,
    ) -> Result<SemaphorePermit<'_>> {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(RateLimitError::AdmissionCancelled.into()),
            permit = self.admission.acquire() => {
                permit.map_err(|_| RateLimitError::AdmissionCancelled.into())
            }
        }
    }

    async fn apply_channel_status(
        &self,
        request: &ChannelStatusRequest,
        token: &CancellationToken,
    ) -> Result<()> {
        validate_ids(request.node_id, request.channel_id)?;
        let enable = match request.status {
            ServiceStatus::Active => true,
            ServiceStatus::Inactive => false,
            other => return Err(ValidationError::IllegalChannelStatus(format!("{other:?}")).into()),
        };
        let (channel, state) = self.channel_with_state(request.node_id, request.channel_id).await?;
        if state.local_policy.disabled != enable {
            debug!(enable, "channel status already matches");
            return Ok(());
        }

        let window = self.config.status_flap_window();
        let since = window_start(window);
        let fields = vec![PolicyField::Disabled];
        let persisted =
            self.persisted_changes(request.node_id, request.channel_id, &fields, since)?;
        let reservation = self
            .changes
            .reserve(
                request.node_id,
                request.channel_id,
                fields,
                &persisted,
                since,
                self.config.status_flap_limit + 1,
            )
            .map_err(|(_, flips)| RateLimitError::ChannelStatusFlap { flips, window })?;

        let client = self.plane.client(request.node_id)?;
        let action = if enable {
            ChanStatusAction::Enable
        } else {
            ChanStatusAction::Disable
        };
        let _permit = self.admit(token).await?;
        with_timeout(
            self.config.control_timeout(),
            client.update_chan_status(routerrpc::UpdateChanStatusRequest {
                chan_point: Some(channel_point_to_proto(&channel.channel_point)),
                action: action as i32,
            }),
        )
        .await?;

        let policy = RoutingPolicy {
            disabled: !enable,
            ..state.local_policy
        };
        self.plane
            .caches
            .channel_states
            .write_routing_policy(request.node_id, request.channel_id, true, policy)
            .await?;
        reservation.keep();
        info!(enable, "channel status updated");
        Ok(())
    }

    async fn apply_routing_policy(
        &self,
        request: &RoutingPolicyRequest,
        token: &CancellationToken,
    ) -> Result<Option<Vec<FailedPolicyUpdate>>> {
        validate_ids(request.node_id, request.channel_id)?;
        if let Some(delta) = request.time_lock_delta {
            if delta < self.config.min_time_lock_delta {
                return Err(ValidationError::TimeLockDeltaTooLow {
                    minimum: self.config.min_time_lock_delta,
                }
                .into());
            }
        }
        if request.is_empty() {
            debug!("routing policy request sets nothing");
            return Ok(None);
        }

        let (channel, state) = self.channel_with_state(request.node_id, request.channel_id).await?;
        let current = state.local_policy;
        let target = RoutingPolicy {
            disabled: current.disabled,
            time_lock_delta: request.time_lock_delta.unwrap_or(current.time_lock_delta),
            min_htlc_msat: request.min_htlc_msat.unwrap_or(current.min_htlc_msat),
            max_htlc_msat: request.max_htlc_msat.unwrap_or(current.max_htlc_msat),
            fee_base_msat: request.fee_base_msat.unwrap_or(current.fee_base_msat),
            fee_rate_milli_msat: request.fee_rate_milli_msat.unwrap_or(current.fee_rate_milli_msat),
        };
        let changed = target.changed_fields(&current);
        if changed.is_empty() {
            debug!("routing policy already matches");
            return Ok(None);
        }
        let fee_rate_ppm = u32::try_from(target.fee_rate_milli_msat).map_err(|_| {
            ValidationError::InvalidRequest(format!(
                "fee_rate_milli_msat {} is out of range",
                target.fee_rate_milli_msat
            ))
        })?;
        let min_htlc_msat = u64::try_from(target.min_htlc_msat).map_err(|_| {
            ValidationError::InvalidRequest(format!(
                "min_htlc_msat {} is out of range",
                target.min_htlc_msat
            ))
        })?;

        let window = request
            .rate_limit_seconds
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(self.config.policy_rate_limit_window_in_secs));
        let limit =
            request.rate_limit_count.unwrap_or(self.config.policy_rate_limit_count) as usize;
        let since = window_start(window);
        let persisted =
            self.persisted_changes(request.node_id, request.channel_id, &changed, since)?;
        let reservation = self
            .changes
            .reserve(request.node_id, request.channel_id, changed, &persisted, since, limit)
            .map_err(|(field, count)| RateLimitError::RoutingPolicy {
                field: field.name(),
                count,
                window,
            })?;

        let client = self.plane.client(request.node_id)?;
        let _permit = self.admit(token).await?;
        let response = with_timeout(
            self.config.control_timeout(),
            client.update_channel_policy(lnrpc::PolicyUpdateRequest {
                scope: Some(Scope::ChanPoint(channel_point_to_proto(&channel.channel_point))),
                base_fee_msat: target.fee_base_msat,
                fee_rate_ppm,
                time_lock_delta: target.time_lock_delta,
                max_htlc_msat: target.max_htlc_msat,
                min_htlc_msat,
                min_htlc_msat_specified: request.min_htlc_msat.is_some(),
                ..Default::default()
            }),
        )
        .await?;

        let failed: Vec<FailedPolicyUpdate> =
            response.failed_updates.iter().map(failed_update).collect();
        if failed.is_empty() {
            self.plane
                .caches
                .channel_states
                .write_routing_policy(request.node_id, request.channel_id, true, target)
                .await?;
            reservation.keep();
            info!("routing policy updated");
        } else {
            warn!(failed = failed.len(), "routing policy update partially failed");
        }
        Ok(Some(failed))
    }

    /// Channel owned by `node_id` plus its live state, regardless of readiness.
    async fn channel_with_state(
        &self,
        node_id: NodeId,
        channel_id: ChannelId,
    ) -> Result<(Channel, ChannelState)> {
        let unknown = || ValidationError::UnknownChannel { node_id, channel_id };
        let caches = &self.plane.caches;
        let channel = caches
            .channels
            .get(channel_id)
            .await?
            .filter(|c| c.involves(node_id))
            .ok_or_else(unknown)?;
        let state = caches
            .channel_states
            .channel_state(node_id, channel_id, true)
            .await?
            .ok_or_else(unknown)?;
        Ok((channel, state))
    }

    /// Per field, how often the local direction of the channel changed in
    /// the stored graph history since `since`.
    fn persisted_changes(
        &self,
        node_id: NodeId,
        channel_id: ChannelId,
        fields: &[PolicyField],
        since: DateTime<Utc>,
    ) -> Result<Vec<usize>> {
        let history = self.plane.store.routing_policies_since(channel_id, node_id, since)?;
        let persisted = field_changes(&history);
        Ok(fields.iter().map(|field| persisted.get(field).copied().unwrap_or(0)).collect())
    }
}

fn window_start(window: Duration) -> DateTime<Utc> {
    Utc::now() - chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::zero())
}

fn validate_ids(
    node_id: NodeId,
    channel_id: ChannelId,
) -> Result<()> {
    if node_id == 0 {
        return Err(ValidationError::MissingNodeId.into());
    }
    if channel_id == 0 {
        return Err(ValidationError::MissingChannelId.into());
    }
    Ok(())
}

fn finish<R, T>(
    kind: &'static str,
    request: R,
    result: Result<Option<T>>,
) -> Response<R, T> {
    let response = Response::from_result(request, result);
    let outcome = match response.error_class {
        None => "active".to_string(),
        Some(class) => format!("{class:?}").to_lowercase(),
    };
    if let Some(error) = &response.error {
        warn!(kind, "request failed: {}", error);
    }
    GATEWAY_REQUESTS.with_label_values(&[kind, &outcome]).inc();
    response
}

/// Hash of the closing transaction from the first update that carries one.
async fn closing_txid(updates: &mut UpstreamStream<lnrpc::CloseStatusUpdate>) -> Result<String> {
    while let Some(update) = updates.next().await {
        let txid = match update?.update {
            Some(Update::ClosePending(pending)) => pending.txid,
            Some(Update::ChanClose(close)) => close.closing_txid,
            None => continue,
        };
        return Ok(ChannelPoint::from_txid_bytes(&txid, 0)?.funding_transaction_hash);
    }
    Err(UpstreamError::StreamClosed.into())
}

fn failed_update(update: &lnrpc::FailedUpdate) -> FailedPolicyUpdate {
    let (funding_transaction_hash, funding_output_index) = update
        .outpoint
        .as_ref()
        .map(|o| (o.txid_str.clone(), o.output_index))
        .unwrap_or_default();
    FailedPolicyUpdate {
        funding_transaction_hash,
        funding_output_index,
        reason: lnrpc::UpdateFailure::try_from(update.reason)
            .map(|r| r.as_str_name().to_string())
            .unwrap_or_else(|_| update.reason.to_string()),
        update_error: update.update_error.clone(),
    }
}

fn node_information(info: lnrpc::GetInfoResponse) -> NodeInformation {
    let network = info
        .chains
        .first()
        .and_then(|c| Network::from_daemon(&c.network))
        .unwrap_or_default();
    NodeInformation {
        identity_pubkey: info.identity_pubkey,
        alias: info.alias,
        version: info.version,
        block_height: info.block_height,
        synced_to_chain: info.synced_to_chain,
        synced_to_graph: info.synced_to_graph,
        num_active_channels: info.num_active_channels,
        num_inactive_channels: info.num_inactive_channels,
        num_pending_channels: info.num_pending_channels,
        num_peers: info.num_peers,
        chain: Default::default(),
        network,
    }
}

//! Control requests accepted by the gateway and the rebalancer, and the
//! status envelope every one of them is answered with.

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use super::Chain;
use super::ChannelId;
use super::ChannelPoint;
use super::Network;
use super::NodeId;
use super::ServiceStatus;
use crate::Error;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ChannelStatusRequest {
    pub node_id: NodeId,
    pub channel_id: ChannelId,
    /// Only Active (enable) and Inactive (disable) are legal
    pub status: ServiceStatus,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct RoutingPolicyRequest {
    pub node_id: NodeId,
    pub channel_id: ChannelId,
    pub fee_rate_milli_msat: Option<i64>,
    pub fee_base_msat: Option<i64>,
    pub max_htlc_msat: Option<u64>,
    pub min_htlc_msat: Option<i64>,
    pub time_lock_delta: Option<u32>,
    /// Overrides the configured rate-limit window for this call
    pub rate_limit_seconds: Option<u64>,
    /// Overrides the configured per-field change budget for this call
    pub rate_limit_count: Option<u32>,
}

impl RoutingPolicyRequest {
    pub fn is_empty(&self) -> bool {
        self.fee_rate_milli_msat.is_none()
            && self.fee_base_msat.is_none()
            && self.max_htlc_msat.is_none()
            && self.min_htlc_msat.is_none()
            && self.time_lock_delta.is_none()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SignMessageRequest {
    pub node_id: NodeId,
    pub message: Vec<u8>,
    pub single_hash: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct VerifyMessageRequest {
    pub node_id: NodeId,
    pub message: Vec<u8>,
    pub signature: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct OpenChannelRequest {
    pub node_id: NodeId,
    /// 33-byte compressed key of the remote peer, hex encoded
    pub remote_public_key: String,
    pub local_funding_sat: i64,
    pub push_sat: i64,
    pub private: bool,
    pub sat_per_vbyte: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct CloseChannelRequest {
    pub node_id: NodeId,
    pub channel_id: ChannelId,
    pub force: bool,
    pub sat_per_vbyte: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImportType {
    AllChannels,
    PendingChannelsOnly,
    ChannelRoutingPolicies,
    NodeInformation,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct ImportRequest {
    pub node_id: NodeId,
    pub import_type: ImportType,
    pub force: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct FailedPolicyUpdate {
    pub funding_transaction_hash: String,
    pub funding_output_index: u32,
    pub reason: String,
    pub update_error: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct VerifyOutcome {
    pub valid: bool,
    pub public_key: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct NodeInformation {
    pub identity_pubkey: String,
    pub alias: String,
    pub version: String,
    pub block_height: u32,
    pub synced_to_chain: bool,
    pub synced_to_graph: bool,
    pub num_active_channels: u32,
    pub num_inactive_channels: u32,
    pub num_pending_channels: u32,
    pub num_peers: u32,
    pub chain: Chain,
    pub network: Network,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct WalletBalance {
    pub total_balance: i64,
    pub confirmed_balance: i64,
    pub unconfirmed_balance: i64,
    pub locked_balance: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct ImportOutcome {
    /// A recent successful run made this one unnecessary
    pub skipped: bool,
}

/// Error class reported alongside a failed response so callers can decide
/// whether to back off, fix the request, or retry.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Validation,
    RateLimited,
    UpstreamTransient,
    UpstreamPermanent,
    Internal,
}

impl ErrorClass {
    pub fn of(error: &Error) -> Self {
        match error {
            Error::Validation(_) => ErrorClass::Validation,
            Error::RateLimited(_) => ErrorClass::RateLimited,
            Error::Upstream(e) if e.is_transient() => ErrorClass::UpstreamTransient,
            Error::Upstream(_) => ErrorClass::UpstreamPermanent,
            _ => ErrorClass::Internal,
        }
    }
}

/// Status envelope returned for every control request.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Response<R, T> {
    pub request: R,
    /// Active on success, Inactive otherwise
    pub status: ServiceStatus,
    pub error: Option<String>,
    pub error_class: Option<ErrorClass>,
    pub output: Option<T>,
}

impl<R, T> Response<R, T> {
    pub fn active(
        request: R,
        output: Option<T>,
    ) -> Self {
        Self {
            request,
            status: ServiceStatus::Active,
            error: None,
            error_class: None,
            output,
        }
    }

    pub fn failed(
        request: R,
        error: &Error,
    ) -> Self {
        Self {
            request,
            status: ServiceStatus::Inactive,
            error: Some(error.to_string()),
            error_class: Some(ErrorClass::of(error)),
            output: None,
        }
    }

    pub fn from_result(
        request: R,
        result: crate::Result<Option<T>>,
    ) -> Self {
        match result {
            Ok(output) => Self::active(request, output),
            Err(e) => Self::failed(request, &e),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ServiceStatus::Active
    }
}

pub type ChannelStatusResponse = Response<ChannelStatusRequest, ()>;
pub type RoutingPolicyResponse = Response<RoutingPolicyRequest, Vec<FailedPolicyUpdate>>;
pub type SignMessageResponse = Response<SignMessageRequest, String>;
/// Carries the funding outpoint of the new channel.
pub type OpenChannelResponse = Response<OpenChannelRequest, ChannelPoint>;
/// Carries the closing transaction hash.
pub type CloseChannelResponse = Response<CloseChannelRequest, String>;
pub type VerifyMessageResponse = Response<VerifyMessageRequest, VerifyOutcome>;
pub type InformationResponse = Response<NodeId, NodeInformation>;
pub type WalletBalanceResponse = Response<NodeId, WalletBalance>;
pub type ImportResponse = Response<ImportRequest, ImportOutcome>;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RebalanceOrigin {
    Manual,
    Workflow,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RebalanceRequest {
    pub origin: RebalanceOrigin,
    pub origin_id: u32,
    pub node_id: NodeId,
    /// Exactly one of incoming and outgoing is nonzero
    pub incoming_channel_id: ChannelId,
    pub outgoing_channel_id: ChannelId,
    pub amount_msat: u64,
    pub max_fee_msat: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RebalanceStatus {
    Succeeded,
    Failed,
    Cancelled,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RebalanceResult {
    pub status: RebalanceStatus,
    pub total_fee_msat: i64,
    pub payment_hash: Option<String>,
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

pub type RebalanceResponse = Response<RebalanceRequest, RebalanceResult>;

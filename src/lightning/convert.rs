//! Mapping of daemon messages onto the plane's domain types.

use chrono::DateTime;
use chrono::TimeZone;
use chrono::Utc;

use crate::proto::lnrpc;
use crate::proto::lnrpc::channel_close_summary::ClosureType;
use crate::proto::lnrpc::channel_point::FundingTxid;
use crate::proto::lnrpc::invoice::InvoiceState as LndInvoiceState;
use crate::proto::lnrpc::payment::PaymentStatus as LndPaymentStatus;
use crate::proto::lnrpc::PaymentFailureReason as LndFailureReason;
use crate::ChannelPoint;
use crate::ChannelStatus;
use crate::Htlc;
use crate::InvoiceState;
use crate::PaymentFailureReason;
use crate::PaymentStatus;
use crate::Result;
use crate::RoutingPolicy;
use crate::UpstreamError;

pub fn channel_point_from_proto(point: &lnrpc::ChannelPoint) -> Result<ChannelPoint> {
    match &point.funding_txid {
        Some(FundingTxid::FundingTxidStr(txid)) => {
            format!("{}:{}", txid, point.output_index).parse()
        }
        Some(FundingTxid::FundingTxidBytes(bytes)) => {
            ChannelPoint::from_txid_bytes(bytes, point.output_index)
        }
        None => Err(UpstreamError::Malformed("channel point without txid".to_string()).into()),
    }
}

pub fn channel_point_to_proto(point: &ChannelPoint) -> lnrpc::ChannelPoint {
    lnrpc::ChannelPoint {
        funding_txid: Some(FundingTxid::FundingTxidStr(
            point.funding_transaction_hash.clone(),
        )),
        output_index: point.funding_output_index,
    }
}

pub fn closure_status(close_type: i32) -> ChannelStatus {
    match ClosureType::try_from(close_type) {
        Ok(ClosureType::CooperativeClose) => ChannelStatus::ClosingCooperative,
        Ok(ClosureType::LocalForceClose) => ChannelStatus::ClosingLocalForce,
        Ok(ClosureType::RemoteForceClose) => ChannelStatus::ClosingRemoteForce,
        Ok(ClosureType::BreachClose) => ChannelStatus::ClosingBreach,
        Ok(ClosureType::FundingCanceled) => ChannelStatus::FundingCancelled,
        Ok(ClosureType::Abandoned) => ChannelStatus::Abandoned,
        Err(_) => ChannelStatus::ClosingCooperative,
    }
}

pub fn routing_policy_from_proto(policy: &lnrpc::RoutingPolicy) -> RoutingPolicy {
    RoutingPolicy {
        disabled: policy.disabled,
        time_lock_delta: policy.time_lock_delta,
        min_htlc_msat: policy.min_htlc,
        max_htlc_msat: policy.max_htlc_msat,
        fee_base_msat: policy.fee_base_msat,
        fee_rate_milli_msat: policy.fee_rate_milli_msat,
    }
}

pub fn htlc_from_proto(htlc: &lnrpc::Htlc) -> Htlc {
    Htlc {
        incoming: htlc.incoming,
        amount_msat: htlc.amount.max(0) as u64 * 1_000,
        htlc_index: htlc.htlc_index,
        expiration_height: htlc.expiration_height,
        forwarding_channel: htlc.forwarding_channel,
        forwarding_htlc_index: htlc.forwarding_htlc_index,
    }
}

pub fn payment_status(status: i32) -> PaymentStatus {
    match LndPaymentStatus::try_from(status) {
        Ok(LndPaymentStatus::InFlight) => PaymentStatus::InFlight,
        Ok(LndPaymentStatus::Succeeded) => PaymentStatus::Succeeded,
        Ok(LndPaymentStatus::Failed) => PaymentStatus::Failed,
        Ok(LndPaymentStatus::Initiated) => PaymentStatus::Initiated,
        _ => PaymentStatus::Unknown,
    }
}

pub fn failure_reason(reason: i32) -> PaymentFailureReason {
    match LndFailureReason::try_from(reason) {
        Ok(LndFailureReason::FailureReasonTimeout) => PaymentFailureReason::Timeout,
        Ok(LndFailureReason::FailureReasonNoRoute) => PaymentFailureReason::NoRoute,
        Ok(LndFailureReason::FailureReasonError) => PaymentFailureReason::Error,
        Ok(LndFailureReason::FailureReasonIncorrectPaymentDetails) => {
            PaymentFailureReason::IncorrectPaymentDetails
        }
        Ok(LndFailureReason::FailureReasonInsufficientBalance) => {
            PaymentFailureReason::InsufficientBalance
        }
        _ => PaymentFailureReason::None,
    }
}

pub fn invoice_state(state: i32) -> InvoiceState {
    match LndInvoiceState::try_from(state) {
        Ok(LndInvoiceState::Settled) => InvoiceState::Settled,
        Ok(LndInvoiceState::Canceled) => InvoiceState::Canceled,
        Ok(LndInvoiceState::Accepted) => InvoiceState::Accepted,
        _ => InvoiceState::Open,
    }
}

pub fn time_from_secs(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

pub fn time_from_nanos(nanos: u64) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(nanos.min(i64::MAX as u64) as i64)
}

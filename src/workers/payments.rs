use tonic::async_trait;
use tracing::debug;

use super::Poller;
use super::WorkerContext;
use crate::failure_reason;
use crate::payment_status;
use crate::proto::lnrpc;
use crate::time_from_nanos;
use crate::time_from_secs;
use crate::ChannelId;
use crate::EventPayload;
use crate::LightningClient;
use crate::PaymentRecord;
use crate::PaymentStatus;
use crate::Result;

/// Payments past the highest stored payment index.
pub struct PaymentsPoller {
    page_size: u64,
    local_key: Option<String>,
}

impl PaymentsPoller {
    pub fn new(page_size: u64) -> Self {
        Self {
            page_size,
            local_key: None,
        }
    }
}

#[async_trait]
impl Poller for PaymentsPoller {
    async fn poll(
        &mut self,
        ctx: &WorkerContext,
    ) -> Result<()> {
        let local_key = match &self.local_key {
            Some(key) => key.clone(),
            None => {
                let key = ctx.local_node().await?.public_key;
                self.local_key = Some(key.clone());
                key
            }
        };
        let client = ctx.client()?;
        let mut index_offset = ctx.plane.store.last_payment_index(ctx.node_id)?;
        loop {
            let page = client
                .list_payments(lnrpc::ListPaymentsRequest {
                    include_incomplete: true,
                    index_offset,
                    max_payments: self.page_size,
                    ..Default::default()
                })
                .await?;
            if page.payments.is_empty() {
                break;
            }
            let fetched = page.payments.len();
            for payment in &page.payments {
                let record = payment_record(ctx, client.as_ref(), &local_key, payment).await?;
                if ctx.plane.store.add_payment(&record)? {
                    debug!(
                        payment_index = record.payment_index,
                        status = ?record.status,
                        "payment stored"
                    );
                    ctx.plane.bus.publish(ctx.node_id, EventPayload::Payment(record));
                }
            }
            let next = page
                .last_index_offset
                .max(page.payments.iter().map(|p| p.payment_index).max().unwrap_or(0));
            if next <= index_offset || (fetched as u64) < self.page_size {
                break;
            }
            index_offset = next;
        }
        Ok(())
    }
}

/// Maps a listed payment. Channels come from the route of the first HTLC
/// attempt: the first hop leaves on the outgoing channel, a last hop back to
/// the local node arrives on the incoming one.
async fn payment_record(
    ctx: &WorkerContext,
    client: &dyn LightningClient,
    local_key: &str,
    payment: &lnrpc::Payment,
) -> Result<PaymentRecord> {
    let hops = payment
        .htlcs
        .first()
        .and_then(|attempt| attempt.route.as_ref())
        .map(|route| route.hops.as_slice())
        .unwrap_or_default();
    let outgoing_channel_id = match hops.first() {
        Some(hop) => local_channel(ctx, hop.chan_id).await?,
        None => None,
    };
    let incoming_channel_id = match hops.last() {
        Some(hop) if hops.len() > 1 && hop.pub_key.eq_ignore_ascii_case(local_key) => {
            local_channel(ctx, hop.chan_id).await?
        }
        _ => None,
    };
    let rebalance_amount_msat = match (incoming_channel_id, outgoing_channel_id) {
        (Some(_), Some(_)) => Some(payment.value_msat),
        _ => None,
    };

    let status = payment_status(payment.status);
    let decodable = status == PaymentStatus::InFlight && !payment.payment_request.is_empty();
    let expiry_secs = if decodable {
        match client.decode_pay_req(payment.payment_request.clone()).await {
            Ok(decoded) => Some(decoded.expiry),
            Err(e) => {
                let payment_index = payment.payment_index;
                debug!(payment_index, "payment request not decoded: {}", e);
                None
            }
        }
    } else {
        None
    };

    let creation_time = if payment.creation_time_ns > 0 {
        time_from_nanos(payment.creation_time_ns as u64)
    } else {
        time_from_secs(payment.creation_date)
    };
    Ok(PaymentRecord {
        node_id: ctx.node_id,
        payment_index: payment.payment_index,
        payment_hash: payment.payment_hash.clone(),
        payment_request: payment.payment_request.clone(),
        creation_time,
        value_msat: payment.value_msat,
        fee_msat: payment.fee_msat,
        status,
        failure_reason: failure_reason(payment.failure_reason),
        incoming_channel_id,
        outgoing_channel_id,
        rebalance_amount_msat,
        expiry_secs,
    })
}

async fn local_channel(
    ctx: &WorkerContext,
    lnd_short_channel_id: u64,
) -> Result<Option<ChannelId>> {
    let channels = &ctx.plane.caches.channels;
    let Some(channel_id) = channels.by_lnd_short_channel_id(lnd_short_channel_id).await? else {
        return Ok(None);
    };
    Ok(channels
        .get(channel_id)
        .await?
        .filter(|c| c.involves(ctx.node_id))
        .map(|c| c.channel_id))
}

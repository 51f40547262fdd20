use tonic::async_trait;
use tracing::trace;

use super::StreamProcessor;
use super::WorkerContext;
use crate::proto::routerrpc;
use crate::proto::routerrpc::htlc_event::Event as HtlcKind;
use crate::time_from_nanos;
use crate::ChannelId;
use crate::EventPayload;
use crate::HtlcEventRecord;
use crate::HtlcUpdate;
use crate::HtlcUpdateKind;
use crate::Result;
use crate::UpstreamStream;

/// HTLC lifecycle events: pending HTLC bookkeeping on the channel states and
/// one event row each.
pub struct HtlcProcessor;

#[async_trait]
impl StreamProcessor for HtlcProcessor {
    type Item = routerrpc::HtlcEvent;

    async fn open(
        &mut self,
        ctx: &WorkerContext,
    ) -> Result<UpstreamStream<Self::Item>> {
        ctx.client()?.subscribe_htlc_events().await
    }

    async fn process(
        &mut self,
        ctx: &WorkerContext,
        event: Self::Item,
    ) -> Result<()> {
        let (kind, info, failure) = match &event.event {
            Some(HtlcKind::ForwardEvent(forward)) => {
                (HtlcUpdateKind::Forward, forward.info.clone(), None)
            }
            Some(HtlcKind::ForwardFailEvent(_)) => (HtlcUpdateKind::ForwardFail, None, None),
            Some(HtlcKind::SettleEvent(_)) => (HtlcUpdateKind::Settle, None, None),
            Some(HtlcKind::LinkFailEvent(fail)) => (
                HtlcUpdateKind::LinkFail,
                fail.info.clone(),
                Some(fail.failure_string.clone()).filter(|s| !s.is_empty()),
            ),
            _ => {
                trace!("htlc event without state change");
                return Ok(());
            }
        };
        let info = info.unwrap_or_default();
        let incoming = resolve(ctx, event.incoming_channel_id).await?;
        let outgoing = resolve(ctx, event.outgoing_channel_id).await?;

        ctx.plane
            .caches
            .channel_states
            .update_htlc_event(
                ctx.node_id,
                HtlcUpdate {
                    kind,
                    incoming_channel_id: incoming.unwrap_or(0),
                    outgoing_channel_id: outgoing.unwrap_or(0),
                    incoming_htlc_id: event.incoming_htlc_id,
                    outgoing_htlc_id: event.outgoing_htlc_id,
                    incoming_amt_msat: info.incoming_amt_msat,
                    outgoing_amt_msat: info.outgoing_amt_msat,
                    incoming_timelock: info.incoming_timelock,
                    outgoing_timelock: info.outgoing_timelock,
                },
            )
            .await?;

        let record = HtlcEventRecord {
            node_id: ctx.node_id,
            kind,
            incoming_channel_id: incoming,
            outgoing_channel_id: outgoing,
            incoming_htlc_id: event.incoming_htlc_id,
            outgoing_htlc_id: event.outgoing_htlc_id,
            incoming_amt_msat: info.incoming_amt_msat,
            outgoing_amt_msat: info.outgoing_amt_msat,
            failure,
            ts: time_from_nanos(event.timestamp_ns),
        };
        ctx.plane.store.add_htlc_event(&record)?;
        ctx.plane.bus.publish(ctx.node_id, EventPayload::Htlc(record));
        Ok(())
    }
}

async fn resolve(
    ctx: &WorkerContext,
    lnd_short_channel_id: u64,
) -> Result<Option<ChannelId>> {
    if lnd_short_channel_id == 0 {
        return Ok(None);
    }
    ctx.plane.caches.channels.by_lnd_short_channel_id(lnd_short_channel_id).await
}

use chrono::Utc;
use tonic::async_trait;
use tracing::debug;
use tracing::info;

use super::StreamProcessor;
use super::WorkerContext;
use crate::channel_point_from_proto;
use crate::closure_status;
use crate::importer::ensure_peer;
use crate::importer::observed_channel;
use crate::importer::open_channel_state;
use crate::importer::upsert_channel;
use crate::proto::lnrpc;
use crate::proto::lnrpc::channel_event_update::Channel as Update;
use crate::Channel;
use crate::ChannelEvent;
use crate::ChannelEventRecord;
use crate::ChannelEventType;
use crate::ChannelPoint;
use crate::ChannelStatus;
use crate::EventPayload;
use crate::Result;
use crate::UpstreamError;
use crate::UpstreamStream;

/// Channel lifecycle updates: identity rows, live state, event rows.
pub struct ChannelEventProcessor;

#[async_trait]
impl StreamProcessor for ChannelEventProcessor {
    type Item = lnrpc::ChannelEventUpdate;

    async fn open(
        &mut self,
        ctx: &WorkerContext,
    ) -> Result<UpstreamStream<Self::Item>> {
        ctx.client()?.subscribe_channel_events().await
    }

    async fn process(
        &mut self,
        ctx: &WorkerContext,
        update: Self::Item,
    ) -> Result<()> {
        let Some(update) = update.channel else {
            let reason = "channel event without channel".to_string();
            return Err(UpstreamError::Malformed(reason).into());
        };
        let (channel, event_type) = match update {
            Update::OpenChannel(open) => (opened(ctx, &open).await?, ChannelEventType::OpenChannel),
            Update::ClosedChannel(summary) => {
                (closed(ctx, &summary).await?, ChannelEventType::ClosedChannel)
            }
            Update::ActiveChannel(point) => {
                let Some(channel) = toggled(ctx, &point, true).await? else {
                    return Ok(());
                };
                (channel, ChannelEventType::ActiveChannel)
            }
            Update::InactiveChannel(point) => {
                let Some(channel) = toggled(ctx, &point, false).await? else {
                    return Ok(());
                };
                (channel, ChannelEventType::InactiveChannel)
            }
            Update::PendingOpenChannel(pending) => {
                let point = ChannelPoint::from_txid_bytes(&pending.txid, pending.output_index)?;
                let Some(channel) = pending_open(ctx, point).await? else {
                    return Ok(());
                };
                (channel, ChannelEventType::PendingOpenChannel)
            }
            Update::FullyResolvedChannel(point) => {
                let point = channel_point_from_proto(&point)?;
                let Some(channel) = known(ctx, &point).await? else {
                    debug!(%point, "resolved channel unknown");
                    return Ok(());
                };
                (channel, ChannelEventType::FullyResolvedChannel)
            }
        };
        record(ctx, &channel, event_type)
    }
}

async fn opened(
    ctx: &WorkerContext,
    open: &lnrpc::Channel,
) -> Result<Channel> {
    let plane = &ctx.plane;
    let point: ChannelPoint = open.channel_point.parse()?;
    let peer = ensure_peer(plane, ctx.node_id, &open.remote_pubkey).await?;
    let row = upsert_channel(
        plane,
        observed_channel(
            ctx.node_id,
            peer.node_id,
            point,
            open.capacity,
            open.chan_id,
            ChannelStatus::Open,
        ),
    )
    .await?;
    let state = open_channel_state(plane, ctx.node_id, &row, open)?;
    plane.caches.channel_states.add_channel_state(state).await?;
    info!(channel_id = row.channel_id, "channel opened");
    Ok(row)
}

async fn closed(
    ctx: &WorkerContext,
    summary: &lnrpc::ChannelCloseSummary,
) -> Result<Channel> {
    let plane = &ctx.plane;
    let point: ChannelPoint = summary.channel_point.parse()?;
    let peer = ensure_peer(plane, ctx.node_id, &summary.remote_pubkey).await?;
    let mut observed = observed_channel(
        ctx.node_id,
        peer.node_id,
        point,
        summary.capacity,
        summary.chan_id,
        closure_status(summary.close_type),
    );
    observed.closing_transaction_hash =
        Some(summary.closing_tx_hash.clone()).filter(|hash| !hash.is_empty());
    observed.closing_block_height = Some(summary.close_height).filter(|height| *height > 0);
    let row = upsert_channel(plane, observed).await?;
    plane.caches.channel_states.remove_channel_state(ctx.node_id, row.channel_id).await?;
    info!(channel_id = row.channel_id, status = ?row.status, "channel closed");
    Ok(row)
}

async fn toggled(
    ctx: &WorkerContext,
    point: &lnrpc::ChannelPoint,
    active: bool,
) -> Result<Option<Channel>> {
    let point = channel_point_from_proto(point)?;
    let Some(channel) = known(ctx, &point).await? else {
        debug!(%point, active, "status of unknown channel");
        return Ok(None);
    };
    ctx.plane
        .caches
        .channel_states
        .write_channel_status(ctx.node_id, channel.channel_id, active)
        .await?;
    Ok(Some(channel))
}

/// The update only names the funding outpoint; the peer and capacity come
/// from the daemon's pending list.
async fn pending_open(
    ctx: &WorkerContext,
    point: ChannelPoint,
) -> Result<Option<Channel>> {
    let pending = ctx.client()?.pending_channels().await?;
    let wanted = point.to_string();
    let Some(listed) = pending
        .pending_open_channels
        .iter()
        .filter_map(|p| p.channel.as_ref())
        .find(|c| c.channel_point == wanted)
    else {
        debug!(%point, "pending channel not listed");
        return Ok(None);
    };
    let peer = ensure_peer(&ctx.plane, ctx.node_id, &listed.remote_node_pub).await?;
    let row = upsert_channel(
        &ctx.plane,
        observed_channel(
            ctx.node_id,
            peer.node_id,
            point,
            listed.capacity,
            0,
            ChannelStatus::Opening,
        ),
    )
    .await?;
    Ok(Some(row))
}

async fn known(
    ctx: &WorkerContext,
    point: &ChannelPoint,
) -> Result<Option<Channel>> {
    let channel_id = match ctx.plane.caches.channels.by_channel_point(point).await? {
        Some(id) => Some(id),
        None => ctx.plane.store.get_channel_id(point)?,
    };
    match channel_id {
        Some(id) => ctx.plane.store.get_channel(id),
        None => Ok(None),
    }
}

fn record(
    ctx: &WorkerContext,
    channel: &Channel,
    event_type: ChannelEventType,
) -> Result<()> {
    ctx.plane.store.add_channel_event(&ChannelEventRecord {
        node_id: ctx.node_id,
        channel_id: channel.channel_id,
        event_type,
        ts: Utc::now(),
    })?;
    ctx.plane.bus.publish(
        ctx.node_id,
        EventPayload::Channel(ChannelEvent {
            channel_id: channel.channel_id,
            event_type,
            status: channel.status,
            remote_node_id: channel.peer_of(ctx.node_id),
            capacity: channel.capacity_sat,
        }),
    );
    Ok(())
}

use chrono::Utc;
use tonic::async_trait;
use tracing::trace;

use super::StreamProcessor;
use super::WorkerContext;
use crate::channel_point_from_proto;
use crate::importer::record_node_announcement;
use crate::importer::record_routing_policy;
use crate::proto::lnrpc;
use crate::routing_policy_from_proto;
use crate::Channel;
use crate::Node;
use crate::NodeEventRecord;
use crate::Result;
use crate::RoutingPolicyRecord;
use crate::UpstreamStream;

/// Graph topology updates filtered to the node's channels and known peers.
#[derive(Default)]
pub struct GraphProcessor {
    local: Option<Node>,
}

#[async_trait]
impl StreamProcessor for GraphProcessor {
    type Item = lnrpc::GraphTopologyUpdate;

    async fn open(
        &mut self,
        ctx: &WorkerContext,
    ) -> Result<UpstreamStream<Self::Item>> {
        self.local = Some(ctx.local_node().await?);
        ctx.client()?.subscribe_channel_graph().await
    }

    async fn process(
        &mut self,
        ctx: &WorkerContext,
        update: Self::Item,
    ) -> Result<()> {
        let local = match &self.local {
            Some(local) => local.clone(),
            None => ctx.local_node().await?,
        };
        for edge in &update.channel_updates {
            self.channel_update(ctx, &local, edge).await?;
        }
        for announcement in update.node_updates {
            let Some(event_node_id) = ctx
                .plane
                .caches
                .nodes
                .node_id(&announcement.identity_key, local.chain, local.network)
                .await?
            else {
                continue;
            };
            record_node_announcement(
                &ctx.plane,
                NodeEventRecord {
                    node_id: ctx.node_id,
                    event_node_id,
                    alias: announcement.alias,
                    color: announcement.color,
                    addresses: announcement.node_addresses.into_iter().map(|a| a.addr).collect(),
                    ts: Utc::now(),
                },
            )
            .await?;
        }
        Ok(())
    }
}

impl GraphProcessor {
    async fn channel_update(
        &self,
        ctx: &WorkerContext,
        local: &Node,
        edge: &lnrpc::ChannelEdgeUpdate,
    ) -> Result<()> {
        let Some(policy) = &edge.routing_policy else {
            return Ok(());
        };
        let Some(channel) = own_channel(ctx, edge).await? else {
            trace!(chan_id = edge.chan_id, "update for a foreign channel");
            return Ok(());
        };
        let outbound = edge.advertising_node.eq_ignore_ascii_case(&local.public_key);
        let record = RoutingPolicyRecord {
            node_id: ctx.node_id,
            channel_id: channel.channel_id,
            announcing_node_id: if outbound {
                ctx.node_id
            } else {
                channel.peer_of(ctx.node_id)
            },
            outbound,
            policy: routing_policy_from_proto(policy),
            ts: Utc::now(),
        };
        record_routing_policy(&ctx.plane, record).await?;
        Ok(())
    }
}

/// The channel the edge describes, when it belongs to the worker's node.
async fn own_channel(
    ctx: &WorkerContext,
    edge: &lnrpc::ChannelEdgeUpdate,
) -> Result<Option<Channel>> {
    let channels = &ctx.plane.caches.channels;
    let mut channel_id = channels.by_lnd_short_channel_id(edge.chan_id).await?;
    if channel_id.is_none() {
        if let Some(point) = &edge.chan_point {
            channel_id = channels.by_channel_point(&channel_point_from_proto(point)?).await?;
        }
    }
    let Some(channel_id) = channel_id else {
        return Ok(None);
    };
    Ok(channels.get(channel_id).await?.filter(|c| c.involves(ctx.node_id)))
}

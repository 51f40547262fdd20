use chrono::Utc;
use tonic::async_trait;
use tracing::trace;

use super::StreamProcessor;
use super::WorkerContext;
use crate::proto::lnrpc;
use crate::proto::lnrpc::peer_event::EventType;
use crate::EventPayload;
use crate::Node;
use crate::PeerEventRecord;
use crate::PeerEventType;
use crate::Result;
use crate::UpstreamStream;

/// Peer online/offline events; peers without a stored node id are dropped.
#[derive(Default)]
pub struct PeerEventProcessor {
    local: Option<Node>,
}

#[async_trait]
impl StreamProcessor for PeerEventProcessor {
    type Item = lnrpc::PeerEvent;

    async fn open(
        &mut self,
        ctx: &WorkerContext,
    ) -> Result<UpstreamStream<Self::Item>> {
        self.local = Some(ctx.local_node().await?);
        ctx.client()?.subscribe_peer_events().await
    }

    async fn process(
        &mut self,
        ctx: &WorkerContext,
        event: Self::Item,
    ) -> Result<()> {
        let local = match &self.local {
            Some(local) => local.clone(),
            None => ctx.local_node().await?,
        };
        let Some(event_node_id) = ctx
            .plane
            .caches
            .nodes
            .node_id(&event.pub_key, local.chain, local.network)
            .await?
        else {
            trace!(pub_key = %event.pub_key, "event of an unknown peer");
            return Ok(());
        };
        let event_type = match EventType::try_from(event.r#type) {
            Ok(EventType::PeerOffline) => PeerEventType::Offline,
            _ => PeerEventType::Online,
        };
        let record = PeerEventRecord {
            node_id: ctx.node_id,
            event_node_id,
            event_type,
            ts: Utc::now(),
        };
        ctx.plane.store.add_peer_event(&record)?;
        ctx.plane.bus.publish(ctx.node_id, EventPayload::Peer(record));
        Ok(())
    }
}

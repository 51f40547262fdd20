//! Shared upserts of node and channel identity, used by the importer and the
//! channel event stream.

use chrono::Utc;
use tracing::debug;

use crate::htlc_from_proto;
use crate::lnd_to_short_channel_id;
use crate::proto::lnrpc;
use crate::Channel;
use crate::ChannelPoint;
use crate::ChannelState;
use crate::ChannelStatus;
use crate::EventPayload;
use crate::GraphEvent;
use crate::Node;
use crate::NodeEventRecord;
use crate::NodeId;
use crate::NodeRole;
use crate::Plane;
use crate::Result;
use crate::RoutingPolicyRecord;
use crate::ValidationError;

/// Stores the remote endpoint of a channel of `local_node_id`, on the local
/// node's chain and network, and registers it as a channel peer.
pub(crate) async fn ensure_peer(
    plane: &Plane,
    local_node_id: NodeId,
    public_key: &str,
) -> Result<Node> {
    let local = plane
        .caches
        .nodes
        .node(local_node_id)
        .await?
        .ok_or(ValidationError::UnknownNode(local_node_id))?;
    let peer = plane.store.add_node(public_key, local.chain, local.network)?;
    plane.caches.nodes.add(peer.clone(), NodeRole::ChannelPeer).await?;
    Ok(peer)
}

/// Inserts `observed` or folds it into the row already owning its funding
/// outpoint, then refreshes the channel cache. Returns the stored row.
pub(crate) async fn upsert_channel(
    plane: &Plane,
    observed: Channel,
) -> Result<Channel> {
    let channel_id = plane.store.add_channel(&observed)?;
    let stored = plane.store.get_channel(channel_id)?;
    let row = match stored {
        Some(existing) => {
            let merged = merge_channel(&existing, &observed);
            if merged != existing {
                debug!(channel_id, status = ?merged.status, "channel row updated");
                plane.store.update_channel(&merged)?;
            }
            merged
        }
        None => Channel {
            channel_id,
            ..observed
        },
    };
    plane.caches.channels.add(row.clone()).await?;
    Ok(row)
}

/// Fields the observation knows better than the row; block details found by
/// maintenance are never cleared.
pub(crate) fn merge_channel(
    existing: &Channel,
    observed: &Channel,
) -> Channel {
    let mut merged = existing.clone();
    merged.status = observed.status;
    if observed.lnd_short_channel_id.is_some() {
        merged.lnd_short_channel_id = observed.lnd_short_channel_id;
        merged.short_channel_id = observed.short_channel_id.clone();
    }
    if observed.capacity_sat > 0 {
        merged.capacity_sat = observed.capacity_sat;
    }
    if observed.closing_transaction_hash.is_some() {
        merged.closing_transaction_hash = observed.closing_transaction_hash.clone();
    }
    if observed.closing_block_height.is_some() {
        merged.closing_block_height = observed.closing_block_height;
    }
    if merged != *existing {
        merged.updated_on = Utc::now();
    }
    merged
}

/// Live state of an open channel as listed by the daemon. Policies are left
/// for the caller to fill.
pub(crate) fn channel_state_from_proto(
    node_id: NodeId,
    channel: &Channel,
    listed: &lnrpc::Channel,
) -> ChannelState {
    let mut state = ChannelState {
        node_id,
        channel_id: channel.channel_id,
        remote_node_id: channel.peer_of(node_id),
        lnd_short_channel_id: listed.chan_id,
        active: listed.active,
        capacity: listed.capacity,
        local_balance: listed.local_balance,
        remote_balance: listed.remote_balance,
        commit_fee: listed.commit_fee,
        pending_htlcs: listed.pending_htlcs.iter().map(htlc_from_proto).collect(),
        ..Default::default()
    };
    state.recompute_unsettled();
    state
}

/// Live state of an open channel with the latest stored policy of each
/// direction.
pub(crate) fn open_channel_state(
    plane: &Plane,
    node_id: NodeId,
    row: &Channel,
    listed: &lnrpc::Channel,
) -> Result<ChannelState> {
    let mut state = channel_state_from_proto(node_id, row, listed);
    if let Some(local) = plane.store.latest_routing_policy(row.channel_id, node_id)? {
        state.local_policy = local.policy;
    }
    let peer_id = row.peer_of(node_id);
    if let Some(remote) = plane.store.latest_routing_policy(row.channel_id, peer_id)? {
        state.remote_policy = remote.policy;
    }
    Ok(state)
}

/// Row for a channel seen by `node_id`, not yet stored. A zero numeric short
/// channel id means the funding has not confirmed.
pub(crate) fn observed_channel(
    node_id: NodeId,
    peer_id: NodeId,
    channel_point: ChannelPoint,
    capacity_sat: i64,
    lnd_short_channel_id: u64,
    status: ChannelStatus,
) -> Channel {
    let now = Utc::now();
    let lnd_short_channel_id = Some(lnd_short_channel_id).filter(|id| *id != 0);
    Channel {
        channel_id: 0,
        channel_point,
        short_channel_id: lnd_short_channel_id.map(lnd_to_short_channel_id),
        lnd_short_channel_id,
        first_node_id: node_id,
        second_node_id: peer_id,
        status,
        capacity_sat,
        closing_transaction_hash: None,
        funding_block_height: None,
        funded_on: None,
        closing_block_height: None,
        closed_on: None,
        created_on: now,
        updated_on: now,
    }
}

/// Mirrors the policy into the channel state of `record.node_id` and stores it
/// unless it equals the latest stored row of the same direction. Returns
/// whether a row was written.
pub(crate) async fn record_routing_policy(
    plane: &Plane,
    record: RoutingPolicyRecord,
) -> Result<bool> {
    plane
        .caches
        .channel_states
        .write_routing_policy(record.node_id, record.channel_id, record.outbound, record.policy)
        .await?;
    let unchanged = plane
        .store
        .latest_routing_policy(record.channel_id, record.announcing_node_id)?
        .map(|latest| latest.policy.changed_fields(&record.policy).is_empty())
        .unwrap_or(false);
    if unchanged {
        return Ok(false);
    }
    plane.store.add_routing_policy(&record)?;
    plane.bus.publish(
        record.node_id,
        EventPayload::Graph(GraphEvent::Channel {
            channel_id: record.channel_id,
            announcing_node_id: record.announcing_node_id,
            outbound: record.outbound,
            policy: record.policy,
        }),
    );
    Ok(true)
}

/// Stores announced node details, refreshes the alias cache and publishes a
/// graph event.
pub(crate) async fn record_node_announcement(
    plane: &Plane,
    record: NodeEventRecord,
) -> Result<()> {
    plane.store.add_node_event(&record)?;
    plane.caches.aliases.set(record.event_node_id, record.alias.clone()).await?;
    plane.bus.publish(
        record.node_id,
        EventPayload::Graph(GraphEvent::Node {
            event_node_id: record.event_node_id,
            alias: record.alias,
            color: record.color,
        }),
    );
    Ok(())
}

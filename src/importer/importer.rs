use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use super::ensure_peer;
use super::observed_channel;
use super::open_channel_state;
use super::record_node_announcement;
use super::record_routing_policy;
use super::upsert_channel;
use crate::closure_status;
use crate::proto::lnrpc;
use crate::routing_policy_from_proto;
use crate::ChannelPoint;
use crate::ChannelStatus;
use crate::ImportOutcome;
use crate::ImportType;
use crate::LightningClient;
use crate::NodeEventRecord;
use crate::NodeId;
use crate::Plane;
use crate::Result;
use crate::RoutingPolicyRecord;
use crate::ValidationError;

/// Order in which a full bootstrap runs its modes.
pub const BOOTSTRAP_SEQUENCE: [ImportType; 3] = [
    ImportType::AllChannels,
    ImportType::ChannelRoutingPolicies,
    ImportType::NodeInformation,
];

pub struct Importer {
    freshness_window: Duration,
    last_success: Mutex<HashMap<(NodeId, ImportType), Instant>>,
    node_locks: DashMap<NodeId, Arc<tokio::sync::Mutex<()>>>,
}

impl Importer {
    pub fn new(freshness_window: Duration) -> Self {
        Self {
            freshness_window,
            last_success: Mutex::new(HashMap::new()),
            node_locks: DashMap::new(),
        }
    }

    /// Whether `import_type` succeeded for the node within the freshness window.
    pub fn is_fresh(
        &self,
        node_id: NodeId,
        import_type: ImportType,
    ) -> bool {
        self.last_success
            .lock()
            .get(&(node_id, import_type))
            .map(|at| at.elapsed() <= self.freshness_window)
            .unwrap_or(false)
    }

    /// Runs every bootstrap mode in order; the first failure aborts the rest.
    pub async fn import_all(
        &self,
        plane: &Plane,
        node_id: NodeId,
        force: bool,
    ) -> Result<()> {
        for import_type in BOOTSTRAP_SEQUENCE {
            self.import(plane, node_id, import_type, force).await?;
        }
        Ok(())
    }

    #[instrument(skip(self, plane))]
    pub async fn import(
        &self,
        plane: &Plane,
        node_id: NodeId,
        import_type: ImportType,
        force: bool,
    ) -> Result<ImportOutcome> {
        if node_id == 0 {
            return Err(ValidationError::MissingNodeId.into());
        }
        let lock = self.node_locks.entry(node_id).or_default().clone();
        let _guard = lock.lock().await;
        if !force && self.is_fresh(node_id, import_type) {
            debug!("import is fresh, skipping");
            return Ok(ImportOutcome { skipped: true });
        }

        let client = plane.client(node_id)?;
        let started = Instant::now();
        let count = match import_type {
            ImportType::AllChannels => import_all_channels(plane, node_id, client.as_ref()).await?,
            ImportType::PendingChannelsOnly => {
                import_pending_channels(plane, node_id, client.as_ref()).await?
            }
            ImportType::ChannelRoutingPolicies => {
                import_routing_policies(plane, node_id, client.as_ref()).await?
            }
            ImportType::NodeInformation => {
                import_node_information(plane, node_id, client.as_ref()).await?
            }
        };
        self.last_success.lock().insert((node_id, import_type), Instant::now());
        info!(count, elapsed = ?started.elapsed(), "import done");
        Ok(ImportOutcome { skipped: false })
    }
}

/// Open, pending and closed channels into the store and identity caches, then
/// reseeds the node's channel states from the open ones.
async fn import_all_channels(
    plane: &Plane,
    node_id: NodeId,
    client: &dyn LightningClient,
) -> Result<usize> {
    let listed = client.list_channels().await?;
    let mut states = Vec::with_capacity(listed.len());
    for open in &listed {
        let channel_point: ChannelPoint = open.channel_point.parse()?;
        let peer = ensure_peer(plane, node_id, &open.remote_pubkey).await?;
        let row = upsert_channel(
            plane,
            observed_channel(
                node_id,
                peer.node_id,
                channel_point,
                open.capacity,
                open.chan_id,
                ChannelStatus::Open,
            ),
        )
        .await?;

        states.push(open_channel_state(plane, node_id, &row, open)?);
    }

    let pending = import_pending_channels(plane, node_id, client).await?;

    let closed = client.closed_channels().await?;
    for summary in &closed {
        let channel_point: ChannelPoint = summary.channel_point.parse()?;
        let peer = ensure_peer(plane, node_id, &summary.remote_pubkey).await?;
        let mut observed = observed_channel(
            node_id,
            peer.node_id,
            channel_point,
            summary.capacity,
            summary.chan_id,
            closure_status(summary.close_type),
        );
        observed.closing_transaction_hash =
            Some(summary.closing_tx_hash.clone()).filter(|hash| !hash.is_empty());
        observed.closing_block_height = Some(summary.close_height).filter(|height| *height > 0);
        upsert_channel(plane, observed).await?;
    }

    let open = states.len();
    plane.caches.channel_states.initial_channel_states(node_id, states).await?;
    Ok(open + pending + closed.len())
}

/// Channels waiting for their funding to confirm. Closing channels only learn
/// their closing transaction here; their final status comes from the close.
async fn import_pending_channels(
    plane: &Plane,
    node_id: NodeId,
    client: &dyn LightningClient,
) -> Result<usize> {
    let pending = client.pending_channels().await?;
    let mut count = 0;
    for opening in &pending.pending_open_channels {
        let Some(channel) = &opening.channel else {
            continue;
        };
        let channel_point: ChannelPoint = channel.channel_point.parse()?;
        let peer = ensure_peer(plane, node_id, &channel.remote_node_pub).await?;
        upsert_channel(
            plane,
            observed_channel(
                node_id,
                peer.node_id,
                channel_point,
                channel.capacity,
                0,
                ChannelStatus::Opening,
            ),
        )
        .await?;
        count += 1;
    }

    let closing = pending
        .waiting_close_channels
        .iter()
        .map(|c| (&c.channel, &c.closing_txid))
        .chain(pending.pending_force_closing_channels.iter().map(|c| (&c.channel, &c.closing_txid)));
    for (channel, closing_txid) in closing {
        let Some(channel) = channel else {
            continue;
        };
        if closing_txid.is_empty() {
            continue;
        }
        let channel_point: ChannelPoint = channel.channel_point.parse()?;
        let Some(channel_id) = plane.store.get_channel_id(&channel_point)? else {
            continue;
        };
        if let Some(mut row) = plane.store.get_channel(channel_id)? {
            if row.closing_transaction_hash.as_deref() != Some(closing_txid.as_str()) {
                row.closing_transaction_hash = Some(closing_txid.clone());
                row.updated_on = Utc::now();
                plane.store.update_channel(&row)?;
                plane.caches.channels.add(row).await?;
                count += 1;
            }
        }
    }
    Ok(count)
}

/// Both directions of every open channel of the node. Edges the daemon does
/// not know are skipped.
async fn import_routing_policies(
    plane: &Plane,
    node_id: NodeId,
    client: &dyn LightningClient,
) -> Result<usize> {
    let local_key = plane
        .caches
        .nodes
        .node(node_id)
        .await?
        .ok_or(ValidationError::UnknownNode(node_id))?
        .public_key;
    let mut written = 0;
    for channel in plane.caches.channels.for_node(node_id).await? {
        if !channel.status.is_open() {
            continue;
        }
        let Some(lnd_short_channel_id) = channel.lnd_short_channel_id else {
            continue;
        };
        let edge = match client.get_chan_info(lnd_short_channel_id).await {
            Ok(edge) => edge,
            Err(e) if e.is_not_found() => {
                debug!(channel_id = channel.channel_id, "edge unknown to daemon, skipping");
                continue;
            }
            Err(e) => return Err(e),
        };
        let sides: [(&str, &Option<lnrpc::RoutingPolicy>); 2] = [
            (edge.node1_pub.as_str(), &edge.node1_policy),
            (edge.node2_pub.as_str(), &edge.node2_policy),
        ];
        for (announcer, policy) in sides {
            let Some(policy) = policy else {
                continue;
            };
            let outbound = announcer.eq_ignore_ascii_case(&local_key);
            let record = RoutingPolicyRecord {
                node_id,
                channel_id: channel.channel_id,
                announcing_node_id: if outbound {
                    node_id
                } else {
                    channel.peer_of(node_id)
                },
                outbound,
                policy: routing_policy_from_proto(policy),
                ts: Utc::now(),
            };
            if record_routing_policy(plane, record).await? {
                written += 1;
            }
        }
    }
    Ok(written)
}

/// Announced details of every peer the node shares a channel with.
async fn import_node_information(
    plane: &Plane,
    node_id: NodeId,
    client: &dyn LightningClient,
) -> Result<usize> {
    let peer_ids: HashSet<NodeId> = plane
        .caches
        .channels
        .for_node(node_id)
        .await?
        .iter()
        .map(|c| c.peer_of(node_id))
        .collect();
    let peers = plane.caches.nodes.channel_peers().await?;

    let mut imported = 0;
    for peer in peers.into_iter().filter(|p| peer_ids.contains(&p.node_id)) {
        let peer_id = peer.node_id;
        let info = match client.get_node_info(peer.public_key.clone()).await {
            Ok(info) => info,
            Err(e) if e.is_not_found() => {
                debug!(peer_id, "node unknown to daemon, skipping");
                continue;
            }
            Err(e) => return Err(e),
        };
        let Some(announced) = info.node else {
            warn!(peer_id, "node info without announcement");
            continue;
        };
        record_node_announcement(
            plane,
            NodeEventRecord {
                node_id,
                event_node_id: peer_id,
                alias: announced.alias,
                color: announced.color,
                addresses: announced.addresses.into_iter().map(|a| a.addr).collect(),
                ts: Utc::now(),
            },
        )
        .await?;
        imported += 1;
    }
    Ok(imported)
}

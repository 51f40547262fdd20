//! Live channel state per local node.
//!
//! Balances, policies and pending HTLCs are only ever mutated here, one op at
//! a time, so the per-peer aggregates and the balance events derived from a
//! write are computed atomically with it.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use super::ask;
use super::tell;
use crate::BalanceEvent;
use crate::BalanceUpdateOrigin;
use crate::ChannelId;
use crate::ChannelState;
use crate::EventBusHandle;
use crate::EventPayload;
use crate::Htlc;
use crate::HtlcUpdate;
use crate::HtlcUpdateKind;
use crate::NodeId;
use crate::PeerAggregate;
use crate::Result;
use crate::RoutingPolicy;
use crate::ServiceStatus;

const ACTOR: &str = "channel_state_cache";

/// Absolute balances as reported by the daemon.
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceSnapshot {
    pub channel_id: ChannelId,
    pub active: bool,
    pub local_balance: i64,
    pub remote_balance: i64,
    pub commit_fee: i64,
    pub pending_htlcs: Vec<Htlc>,
}

#[derive(Debug)]
pub enum ChannelStateOp {
    /// Replaces every state of the node in one step
    InitialChannelStates {
        node_id: NodeId,
        states: Vec<ChannelState>,
    },
    SetNodeStatus {
        node_id: NodeId,
        status: ServiceStatus,
    },
    AddChannelState(Box<ChannelState>),
    RemoveChannelState {
        node_id: NodeId,
        channel_id: ChannelId,
    },
    WriteChannelStatus {
        node_id: NodeId,
        channel_id: ChannelId,
        active: bool,
    },
    WriteRoutingPolicy {
        node_id: NodeId,
        channel_id: ChannelId,
        /// Policy announced by the local node
        local: bool,
        policy: RoutingPolicy,
    },
    UpdateBalance {
        node_id: NodeId,
        snapshot: BalanceSnapshot,
    },
    UpdateHtlcEvent {
        node_id: NodeId,
        update: HtlcUpdate,
    },
    RecomputeAggregates {
        node_id: NodeId,
        reply: oneshot::Sender<usize>,
    },
    GetChannelState {
        node_id: NodeId,
        channel_id: ChannelId,
        force_response: bool,
        reply: oneshot::Sender<Option<ChannelState>>,
    },
    GetChannelStates {
        node_id: NodeId,
        force_response: bool,
        reply: oneshot::Sender<Vec<ChannelState>>,
    },
    IsReady {
        node_id: NodeId,
        reply: oneshot::Sender<bool>,
    },
}

#[derive(Debug, Clone, Copy)]
enum Readiness {
    Active,
    /// Was active, went away at the instant
    WentInactive(Instant),
    NeverActive,
}

pub struct ChannelStateCache {
    mailbox: mpsc::Receiver<ChannelStateOp>,
    states: HashMap<NodeId, BTreeMap<ChannelId, ChannelState>>,
    readiness: HashMap<NodeId, Readiness>,
    inactive_grace: Duration,
    bus: Option<EventBusHandle>,
}

impl ChannelStateCache {
    pub fn spawn(
        mailbox_size: usize,
        inactive_grace: Duration,
        bus: Option<EventBusHandle>,
        token: CancellationToken,
    ) -> ChannelStateCacheHandle {
        let (tx, rx) = mpsc::channel(mailbox_size);
        let actor = ChannelStateCache {
            mailbox: rx,
            states: HashMap::new(),
            readiness: HashMap::new(),
            inactive_grace,
            bus,
        };
        tokio::spawn(actor.run(token));
        ChannelStateCacheHandle { mailbox: tx }
    }

    async fn run(
        mut self,
        token: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!("channel state cache stopped");
                    return;
                }
                op = self.mailbox.recv() => match op {
                    Some(op) => self.handle(op),
                    None => return,
                }
            }
        }
    }

    fn handle(
        &mut self,
        op: ChannelStateOp,
    ) {
        match op {
            ChannelStateOp::InitialChannelStates { node_id, states } => {
                self.seed(node_id, states);
            }
            ChannelStateOp::SetNodeStatus { node_id, status } => {
                self.set_node_status(node_id, status);
            }
            ChannelStateOp::AddChannelState(state) => {
                let (node_id, channel_id, peer) =
                    (state.node_id, state.channel_id, state.remote_node_id);
                self.states
                    .entry(node_id)
                    .or_default()
                    .insert(channel_id, *state);
                self.refresh_peer(node_id, peer);
                self.publish_balance(node_id, channel_id, None, BalanceUpdateOrigin::Refresh);
            }
            ChannelStateOp::RemoveChannelState {
                node_id,
                channel_id,
            } => {
                let removed = self
                    .states
                    .get_mut(&node_id)
                    .and_then(|channels| channels.remove(&channel_id));
                if let Some(removed) = removed {
                    self.refresh_peer(node_id, removed.remote_node_id);
                }
            }
            ChannelStateOp::WriteChannelStatus {
                node_id,
                channel_id,
                active,
            } => {
                if let Some(state) = self.state_mut(node_id, channel_id) {
                    state.active = active;
                }
            }
            ChannelStateOp::WriteRoutingPolicy {
                node_id,
                channel_id,
                local,
                policy,
            } => {
                if let Some(state) = self.state_mut(node_id, channel_id) {
                    if local {
                        state.local_policy = policy;
                    } else {
                        state.remote_policy = policy;
                    }
                }
            }
            ChannelStateOp::UpdateBalance { node_id, snapshot } => {
                self.update_balance(node_id, snapshot);
            }
            ChannelStateOp::UpdateHtlcEvent { node_id, update } => {
                self.apply_htlc(node_id, update);
            }
            ChannelStateOp::RecomputeAggregates { node_id, reply } => {
                let _ = reply.send(self.recompute(node_id));
            }
            ChannelStateOp::GetChannelState {
                node_id,
                channel_id,
                force_response,
                reply,
            } => {
                let state = if force_response || self.is_ready(node_id) {
                    self.states
                        .get(&node_id)
                        .and_then(|channels| channels.get(&channel_id))
                        .cloned()
                } else {
                    None
                };
                let _ = reply.send(state);
            }
            ChannelStateOp::GetChannelStates {
                node_id,
                force_response,
                reply,
            } => {
                let states = if force_response || self.is_ready(node_id) {
                    self.states
                        .get(&node_id)
                        .map(|channels| channels.values().cloned().collect())
                        .unwrap_or_default()
                } else {
                    Vec::new()
                };
                let _ = reply.send(states);
            }
            ChannelStateOp::IsReady { node_id, reply } => {
                let _ = reply.send(self.is_ready(node_id));
            }
        }
    }

    fn state_mut(
        &mut self,
        node_id: NodeId,
        channel_id: ChannelId,
    ) -> Option<&mut ChannelState> {
        let state = self
            .states
            .get_mut(&node_id)
            .and_then(|channels| channels.get_mut(&channel_id));
        if state.is_none() {
            trace!(node_id, channel_id, "No channel state");
        }
        state
    }

    fn set_node_status(
        &mut self,
        node_id: NodeId,
        status: ServiceStatus,
    ) {
        let previous = self
            .readiness
            .get(&node_id)
            .copied()
            .unwrap_or(Readiness::NeverActive);
        let next = match (status, previous) {
            (ServiceStatus::Active, _) => Readiness::Active,
            (_, Readiness::Active) => Readiness::WentInactive(Instant::now()),
            (_, other) => other,
        };
        self.readiness.insert(node_id, next);
    }

    fn is_ready(
        &self,
        node_id: NodeId,
    ) -> bool {
        match self.readiness.get(&node_id) {
            Some(Readiness::Active) => true,
            Some(Readiness::WentInactive(at)) => at.elapsed() <= self.inactive_grace,
            _ => false,
        }
    }

    fn seed(
        &mut self,
        node_id: NodeId,
        states: Vec<ChannelState>,
    ) {
        let previous = self.states.remove(&node_id).unwrap_or_default();
        let mut channels: BTreeMap<ChannelId, ChannelState> = BTreeMap::new();
        for mut state in states {
            if state.node_id != node_id || state.channel_id == 0 {
                warn!(node_id, channel_id = state.channel_id, "Skipping foreign channel state");
                continue;
            }
            state.recompute_unsettled();
            channels.insert(state.channel_id, state);
        }

        // aggregates in one pass
        let mut aggregates: HashMap<NodeId, PeerAggregate> = HashMap::new();
        for state in channels.values() {
            let aggregate = aggregates.entry(state.remote_node_id).or_default();
            aggregate.channel_count += 1;
            aggregate.capacity += state.capacity;
            aggregate.local_balance += state.local_balance;
        }
        for state in channels.values_mut() {
            state.peer = aggregates
                .get(&state.remote_node_id)
                .copied()
                .unwrap_or_default();
        }

        let changed: Vec<(ChannelId, Option<i64>)> = channels
            .values()
            .filter_map(|state| match previous.get(&state.channel_id) {
                Some(old) if !old.balance_differs(state) => None,
                Some(old) => Some((state.channel_id, Some(old.local_balance))),
                None => Some((state.channel_id, None)),
            })
            .collect();

        debug!(node_id, channels = channels.len(), "Channel states seeded");
        self.states.insert(node_id, channels);
        for (channel_id, previous_local) in changed {
            self.publish_balance(node_id, channel_id, previous_local, BalanceUpdateOrigin::Refresh);
        }
    }

    fn update_balance(
        &mut self,
        node_id: NodeId,
        snapshot: BalanceSnapshot,
    ) {
        let channel_id = snapshot.channel_id;
        let Some(state) = self.state_mut(node_id, channel_id) else {
            return;
        };
        let before = state.clone();
        state.active = snapshot.active;
        state.local_balance = snapshot.local_balance;
        state.remote_balance = snapshot.remote_balance;
        state.commit_fee = snapshot.commit_fee;
        state.pending_htlcs = snapshot.pending_htlcs;
        state.recompute_unsettled();
        let peer = state.remote_node_id;
        let differs = state.balance_differs(&before);

        self.refresh_peer(node_id, peer);
        if differs {
            self.publish_balance(
                node_id,
                channel_id,
                Some(before.local_balance),
                BalanceUpdateOrigin::Refresh,
            );
        }
    }

    fn apply_htlc(
        &mut self,
        node_id: NodeId,
        update: HtlcUpdate,
    ) {
        let incoming =
            (update.incoming_channel_id, update.incoming_htlc_id, update.incoming_amt_msat);
        let outgoing =
            (update.outgoing_channel_id, update.outgoing_htlc_id, update.outgoing_amt_msat);

        match update.kind {
            HtlcUpdateKind::Forward => {
                self.add_htlc(node_id, incoming, true, update.incoming_timelock);
                self.add_htlc(node_id, outgoing, false, update.outgoing_timelock);
            }
            HtlcUpdateKind::Settle => {
                // incoming resolves to us, outgoing to the peer
                self.resolve_htlc(node_id, incoming, true, true);
                self.resolve_htlc(node_id, outgoing, false, false);
            }
            HtlcUpdateKind::ForwardFail | HtlcUpdateKind::LinkFail => {
                // amounts return to whoever offered them
                self.resolve_htlc(node_id, incoming, true, false);
                self.resolve_htlc(node_id, outgoing, false, true);
            }
        }
    }

    fn add_htlc(
        &mut self,
        node_id: NodeId,
        (channel_id, htlc_index, amount_msat): (ChannelId, u64, u64),
        incoming: bool,
        expiration_height: u32,
    ) {
        if channel_id == 0 {
            return;
        }
        let Some(state) = self.state_mut(node_id, channel_id) else {
            return;
        };
        if state
            .pending_htlcs
            .iter()
            .any(|h| h.incoming == incoming && h.htlc_index == htlc_index)
        {
            return;
        }
        let before_local = state.local_balance;
        let amount_sat = (amount_msat / 1_000) as i64;
        state.pending_htlcs.push(Htlc {
            incoming,
            amount_msat,
            htlc_index,
            expiration_height,
            forwarding_channel: 0,
            forwarding_htlc_index: 0,
        });
        state.recompute_unsettled();
        let origin = if incoming {
            state.remote_balance = (state.remote_balance - amount_sat).max(0);
            BalanceUpdateOrigin::Remote
        } else {
            state.local_balance = (state.local_balance - amount_sat).max(0);
            BalanceUpdateOrigin::Local
        };
        let peer = state.remote_node_id;
        self.refresh_peer(node_id, peer);
        self.publish_balance(node_id, channel_id, Some(before_local), origin);
    }

    /// Removes the HTLC if known and credits its amount to the local side when
    /// `to_local`, otherwise to the remote side.
    fn resolve_htlc(
        &mut self,
        node_id: NodeId,
        (channel_id, htlc_index, _): (ChannelId, u64, u64),
        incoming: bool,
        to_local: bool,
    ) {
        if channel_id == 0 {
            return;
        }
        let Some(state) = self.state_mut(node_id, channel_id) else {
            return;
        };
        let Some(position) = state
            .pending_htlcs
            .iter()
            .position(|h| h.incoming == incoming && h.htlc_index == htlc_index)
        else {
            return;
        };
        let htlc = state.pending_htlcs.remove(position);
        state.recompute_unsettled();
        let before_local = state.local_balance;
        let amount_sat = (htlc.amount_msat / 1_000) as i64;
        let room = (state.capacity - state.local_balance - state.remote_balance).max(0);
        let credit = amount_sat.min(room);
        let origin = if to_local {
            state.local_balance += credit;
            BalanceUpdateOrigin::Local
        } else {
            state.remote_balance += credit;
            BalanceUpdateOrigin::Remote
        };
        let peer = state.remote_node_id;
        self.refresh_peer(node_id, peer);
        self.publish_balance(node_id, channel_id, Some(before_local), origin);
    }

    /// Rewrites the aggregate of `peer` on every channel of `node_id` to it.
    fn refresh_peer(
        &mut self,
        node_id: NodeId,
        peer: NodeId,
    ) -> bool {
        let Some(channels) = self.states.get_mut(&node_id) else {
            return false;
        };
        let mut aggregate = PeerAggregate::default();
        for state in channels.values().filter(|s| s.remote_node_id == peer) {
            aggregate.channel_count += 1;
            aggregate.capacity += state.capacity;
            aggregate.local_balance += state.local_balance;
        }
        let mut changed = false;
        for state in channels.values_mut().filter(|s| s.remote_node_id == peer) {
            if state.peer != aggregate {
                state.peer = aggregate;
                changed = true;
            }
        }
        changed
    }

    /// Recomputes every peer of the node; republishes channels whose aggregate moved.
    fn recompute(
        &mut self,
        node_id: NodeId,
    ) -> usize {
        let Some(channels) = self.states.get(&node_id) else {
            return 0;
        };
        let before: HashMap<ChannelId, PeerAggregate> =
            channels.values().map(|s| (s.channel_id, s.peer)).collect();
        let mut peers: Vec<NodeId> = channels.values().map(|s| s.remote_node_id).collect();
        peers.sort_unstable();
        peers.dedup();
        for peer in peers {
            self.refresh_peer(node_id, peer);
        }
        let changed: Vec<ChannelId> = self
            .states
            .get(&node_id)
            .map(|channels| {
                channels
                    .values()
                    .filter(|s| before.get(&s.channel_id) != Some(&s.peer))
                    .map(|s| s.channel_id)
                    .collect()
            })
            .unwrap_or_default();
        for channel_id in &changed {
            self.publish_balance(node_id, *channel_id, None, BalanceUpdateOrigin::Refresh);
        }
        changed.len()
    }

    fn publish_balance(
        &self,
        node_id: NodeId,
        channel_id: ChannelId,
        previous_local_balance: Option<i64>,
        origin: BalanceUpdateOrigin,
    ) {
        let Some(bus) = &self.bus else {
            return;
        };
        let Some(state) = self
            .states
            .get(&node_id)
            .and_then(|channels| channels.get(&channel_id))
        else {
            return;
        };
        let event = BalanceEvent {
            channel_id,
            remote_node_id: state.remote_node_id,
            origin,
            capacity: state.capacity,
            local_balance: state.local_balance,
            remote_balance: state.remote_balance,
            local_balance_ratio: state.local_balance_ratio(),
            previous_local_balance: previous_local_balance.unwrap_or(state.local_balance),
            peer_channel_count: state.peer.channel_count,
            peer_capacity: state.peer.capacity,
            peer_local_balance: state.peer.local_balance,
            peer_local_balance_ratio: state.peer.local_balance_ratio(),
        };
        bus.publish(node_id, EventPayload::Balance(event));
    }
}

#[derive(Debug, Clone)]
pub struct ChannelStateCacheHandle {
    mailbox: mpsc::Sender<ChannelStateOp>,
}

impl ChannelStateCacheHandle {
    pub async fn initial_channel_states(
        &self,
        node_id: NodeId,
        states: Vec<ChannelState>,
    ) -> Result<()> {
        tell(&self.mailbox, ACTOR, ChannelStateOp::InitialChannelStates { node_id, states }).await
    }

    pub async fn set_node_status(
        &self,
        node_id: NodeId,
        status: ServiceStatus,
    ) -> Result<()> {
        tell(&self.mailbox, ACTOR, ChannelStateOp::SetNodeStatus { node_id, status }).await
    }

    pub async fn add_channel_state(
        &self,
        state: ChannelState,
    ) -> Result<()> {
        tell(&self.mailbox, ACTOR, ChannelStateOp::AddChannelState(Box::new(state))).await
    }

    pub async fn remove_channel_state(
        &self,
        node_id: NodeId,
        channel_id: ChannelId,
    ) -> Result<()> {
        tell(
            &self.mailbox,
            ACTOR,
            ChannelStateOp::RemoveChannelState {
                node_id,
                channel_id,
            },
        )
        .await
    }

    pub async fn write_channel_status(
        &self,
        node_id: NodeId,
        channel_id: ChannelId,
        active: bool,
    ) -> Result<()> {
        tell(
            &self.mailbox,
            ACTOR,
            ChannelStateOp::WriteChannelStatus {
                node_id,
                channel_id,
                active,
            },
        )
        .await
    }

    pub async fn write_routing_policy(
        &self,
        node_id: NodeId,
        channel_id: ChannelId,
        local: bool,
        policy: RoutingPolicy,
    ) -> Result<()> {
        tell(
            &self.mailbox,
            ACTOR,
            ChannelStateOp::WriteRoutingPolicy {
                node_id,
                channel_id,
                local,
                policy,
            },
        )
        .await
    }

    pub async fn update_balance(
        &self,
        node_id: NodeId,
        snapshot: BalanceSnapshot,
    ) -> Result<()> {
        tell(&self.mailbox, ACTOR, ChannelStateOp::UpdateBalance { node_id, snapshot }).await
    }

    pub async fn update_htlc_event(
        &self,
        node_id: NodeId,
        update: HtlcUpdate,
    ) -> Result<()> {
        tell(&self.mailbox, ACTOR, ChannelStateOp::UpdateHtlcEvent { node_id, update }).await
    }

    /// Returns how many channels got a new aggregate.
    pub async fn recompute_aggregates(
        &self,
        node_id: NodeId,
    ) -> Result<usize> {
        ask(&self.mailbox, ACTOR, |reply| ChannelStateOp::RecomputeAggregates { node_id, reply })
            .await
    }

    pub async fn channel_state(
        &self,
        node_id: NodeId,
        channel_id: ChannelId,
        force_response: bool,
    ) -> Result<Option<ChannelState>> {
        ask(&self.mailbox, ACTOR, |reply| ChannelStateOp::GetChannelState {
            node_id,
            channel_id,
            force_response,
            reply,
        })
        .await
    }

    pub async fn channel_states(
        &self,
        node_id: NodeId,
        force_response: bool,
    ) -> Result<Vec<ChannelState>> {
        ask(&self.mailbox, ACTOR, |reply| ChannelStateOp::GetChannelStates {
            node_id,
            force_response,
            reply,
        })
        .await
    }

    pub async fn is_ready(
        &self,
        node_id: NodeId,
    ) -> Result<bool> {
        ask(&self.mailbox, ACTOR, |reply| ChannelStateOp::IsReady { node_id, reply }).await
    }
}

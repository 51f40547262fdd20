use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use super::ask;
use super::tell;
use crate::Chain;
use crate::Network;
use crate::Node;
use crate::NodeId;
use crate::Result;

const ACTOR: &str = "node_cache";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    /// One of ours; credentials are held
    Local,
    /// A remote peer we share a channel with
    ChannelPeer,
}

#[derive(Debug)]
pub enum NodeOp {
    Add {
        node: Node,
        role: NodeRole,
    },
    SetActive {
        node_id: NodeId,
        active: bool,
    },
    GetNodeId {
        public_key: String,
        chain: Chain,
        network: Network,
        reply: oneshot::Sender<Option<NodeId>>,
    },
    GetNode {
        node_id: NodeId,
        reply: oneshot::Sender<Option<Node>>,
    },
    GetAll {
        reply: oneshot::Sender<Vec<Node>>,
    },
    GetLocal {
        active_only: bool,
        reply: oneshot::Sender<Vec<Node>>,
    },
    GetChannelPeers {
        reply: oneshot::Sender<Vec<Node>>,
    },
}

#[derive(Debug, Clone)]
struct NodeEntry {
    node: Node,
    local: bool,
    channel_peer: bool,
    active: bool,
}

/// Node identity: all nodes, local (optionally active only) and channel peers.
pub struct NodeCache {
    mailbox: mpsc::Receiver<NodeOp>,
    by_id: HashMap<NodeId, NodeEntry>,
    by_key: HashMap<(String, Chain, Network), NodeId>,
}

impl NodeCache {
    pub fn spawn(
        mailbox_size: usize,
        token: CancellationToken,
    ) -> NodeCacheHandle {
        let (tx, rx) = mpsc::channel(mailbox_size);
        let actor = NodeCache {
            mailbox: rx,
            by_id: HashMap::new(),
            by_key: HashMap::new(),
        };
        tokio::spawn(actor.run(token));
        NodeCacheHandle { mailbox: tx }
    }

    async fn run(
        mut self,
        token: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!("node cache stopped");
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
        op: NodeOp,
    ) {
        match op {
            NodeOp::Add { node, role } => {
                if node.node_id == 0 {
                    warn!(public_key = %node.public_key, "Ignoring node without id");
                    return;
                }
                let key = (node.public_key.to_lowercase(), node.chain, node.network);
                self.by_key.insert(key, node.node_id);
                let entry = self.by_id.entry(node.node_id).or_insert_with(|| NodeEntry {
                    node: node.clone(),
                    local: false,
                    channel_peer: false,
                    active: false,
                });
                match role {
                    NodeRole::Local => entry.local = true,
                    NodeRole::ChannelPeer => entry.channel_peer = true,
                }
            }
            NodeOp::SetActive { node_id, active } => {
                if let Some(entry) = self.by_id.get_mut(&node_id) {
                    entry.active = active;
                }
            }
            NodeOp::GetNodeId {
                public_key,
                chain,
                network,
                reply,
            } => {
                let id = self.by_key.get(&(public_key.to_lowercase(), chain, network)).copied();
                let _ = reply.send(id);
            }
            NodeOp::GetNode { node_id, reply } => {
                let _ = reply.send(self.by_id.get(&node_id).map(|e| e.node.clone()));
            }
            NodeOp::GetAll { reply } => {
                let _ = reply.send(self.collect(|_| true));
            }
            NodeOp::GetLocal { active_only, reply } => {
                let _ = reply.send(self.collect(|e| e.local && (!active_only || e.active)));
            }
            NodeOp::GetChannelPeers { reply } => {
                let _ = reply.send(self.collect(|e| e.channel_peer));
            }
        }
    }

    fn collect(
        &self,
        filter: impl Fn(&NodeEntry) -> bool,
    ) -> Vec<Node> {
        let mut nodes: Vec<Node> = self
            .by_id
            .values()
            .filter(|e| filter(e))
            .map(|e| e.node.clone())
            .collect();
        nodes.sort_by_key(|n| n.node_id);
        nodes
    }
}

#[derive(Debug, Clone)]
pub struct NodeCacheHandle {
    mailbox: mpsc::Sender<NodeOp>,
}

impl NodeCacheHandle {
    pub async fn add(
        &self,
        node: Node,
        role: NodeRole,
    ) -> Result<()> {
        tell(&self.mailbox, ACTOR, NodeOp::Add { node, role }).await
    }

    pub async fn set_active(
        &self,
        node_id: NodeId,
        active: bool,
    ) -> Result<()> {
        tell(&self.mailbox, ACTOR, NodeOp::SetActive { node_id, active }).await
    }

    pub async fn node_id(
        &self,
        public_key: &str,
        chain: Chain,
        network: Network,
    ) -> Result<Option<NodeId>> {
        let public_key = public_key.to_string();
        ask(&self.mailbox, ACTOR, |reply| NodeOp::GetNodeId {
            public_key,
            chain,
            network,
            reply,
        })
        .await
    }

    pub async fn node(
        &self,
        node_id: NodeId,
    ) -> Result<Option<Node>> {
        ask(&self.mailbox, ACTOR, |reply| NodeOp::GetNode { node_id, reply }).await
    }

    pub async fn all(&self) -> Result<Vec<Node>> {
        ask(&self.mailbox, ACTOR, |reply| NodeOp::GetAll { reply }).await
    }

    pub async fn local(
        &self,
        active_only: bool,
    ) -> Result<Vec<Node>> {
        ask(&self.mailbox, ACTOR, |reply| NodeOp::GetLocal { active_only, reply }).await
    }

    /// Remote nodes sharing a channel with any local node, by node id.
    pub async fn channel_peers(&self) -> Result<Vec<Node>> {
        ask(&self.mailbox, ACTOR, |reply| NodeOp::GetChannelPeers { reply }).await
    }
}

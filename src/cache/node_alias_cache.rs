use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::ask;
use super::tell;
use crate::NodeId;
use crate::Result;

const ACTOR: &str = "node_alias_cache";

#[derive(Debug)]
pub enum NodeAliasOp {
    Set {
        node_id: NodeId,
        alias: String,
    },
    Get {
        node_id: NodeId,
        reply: oneshot::Sender<Option<String>>,
    },
    GetAll {
        reply: oneshot::Sender<HashMap<NodeId, String>>,
    },
}

/// Latest announced alias per node, fed by graph node updates and imports.
pub struct NodeAliasCache {
    mailbox: mpsc::Receiver<NodeAliasOp>,
    aliases: HashMap<NodeId, String>,
}

impl NodeAliasCache {
    pub fn spawn(
        mailbox_size: usize,
        token: CancellationToken,
    ) -> NodeAliasCacheHandle {
        let (tx, rx) = mpsc::channel(mailbox_size);
        let actor = NodeAliasCache {
            mailbox: rx,
            aliases: HashMap::new(),
        };
        tokio::spawn(actor.run(token));
        NodeAliasCacheHandle { mailbox: tx }
    }

    async fn run(
        mut self,
        token: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!("node alias cache stopped");
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
        op: NodeAliasOp,
    ) {
        match op {
            NodeAliasOp::Set { node_id, alias } => {
                if alias.is_empty() {
                    self.aliases.remove(&node_id);
                } else {
                    self.aliases.insert(node_id, alias);
                }
            }
            NodeAliasOp::Get { node_id, reply } => {
                let _ = reply.send(self.aliases.get(&node_id).cloned());
            }
            NodeAliasOp::GetAll { reply } => {
                let _ = reply.send(self.aliases.clone());
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeAliasCacheHandle {
    mailbox: mpsc::Sender<NodeAliasOp>,
}

impl NodeAliasCacheHandle {
    /// An empty alias clears the entry.
    pub async fn set(
        &self,
        node_id: NodeId,
        alias: String,
    ) -> Result<()> {
        tell(&self.mailbox, ACTOR, NodeAliasOp::Set { node_id, alias }).await
    }

    pub async fn get(
        &self,
        node_id: NodeId,
    ) -> Result<Option<String>> {
        ask(&self.mailbox, ACTOR, |reply| NodeAliasOp::Get { node_id, reply }).await
    }

    pub async fn all(&self) -> Result<HashMap<NodeId, String>> {
        ask(&self.mailbox, ACTOR, |reply| NodeAliasOp::GetAll { reply }).await
    }
}

use std::collections::BTreeSet;
use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::ask;
use super::tell;
use crate::ChannelId;
use crate::NodeId;
use crate::Result;
use crate::TagAssignment;
use crate::TagId;
use crate::TagTarget;

const ACTOR: &str = "tag_cache";

#[derive(Debug)]
pub enum TagOp {
    /// Replaces every assignment
    Initialize(Vec<TagAssignment>),
    Add(TagAssignment),
    Remove(TagAssignment),
    GetForNode {
        node_id: NodeId,
        reply: oneshot::Sender<Vec<TagId>>,
    },
    GetForChannel {
        channel_id: ChannelId,
        reply: oneshot::Sender<Vec<TagId>>,
    },
}

/// Channel groups: tag ids by node and by channel.
pub struct TagCache {
    mailbox: mpsc::Receiver<TagOp>,
    tags: HashMap<TagTarget, BTreeSet<TagId>>,
}

impl TagCache {
    pub fn spawn(
        mailbox_size: usize,
        token: CancellationToken,
    ) -> TagCacheHandle {
        let (tx, rx) = mpsc::channel(mailbox_size);
        let actor = TagCache {
            mailbox: rx,
            tags: HashMap::new(),
        };
        tokio::spawn(actor.run(token));
        TagCacheHandle { mailbox: tx }
    }

    async fn run(
        mut self,
        token: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!("tag cache stopped");
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
        op: TagOp,
    ) {
        match op {
            TagOp::Initialize(assignments) => {
                self.tags.clear();
                for assignment in assignments {
                    self.add(assignment);
                }
            }
            TagOp::Add(assignment) => self.add(assignment),
            TagOp::Remove(assignment) => {
                if let Some(set) = self.tags.get_mut(&assignment.target) {
                    set.remove(&assignment.tag_id);
                    if set.is_empty() {
                        self.tags.remove(&assignment.target);
                    }
                }
            }
            TagOp::GetForNode { node_id, reply } => {
                let _ = reply.send(self.collect(&[TagTarget::Node(node_id)]));
            }
            TagOp::GetForChannel { channel_id, reply } => {
                let _ = reply.send(self.collect(&[TagTarget::Channel(channel_id)]));
            }
        }
    }

    fn add(
        &mut self,
        assignment: TagAssignment,
    ) {
        self.tags
            .entry(assignment.target)
            .or_default()
            .insert(assignment.tag_id);
    }

    fn collect(
        &self,
        targets: &[TagTarget],
    ) -> Vec<TagId> {
        let union: BTreeSet<TagId> = targets
            .iter()
            .filter_map(|target| self.tags.get(target))
            .flatten()
            .copied()
            .collect();
        union.into_iter().collect()
    }
}

#[derive(Debug, Clone)]
pub struct TagCacheHandle {
    mailbox: mpsc::Sender<TagOp>,
}

impl TagCacheHandle {
    pub async fn initialize(
        &self,
        assignments: Vec<TagAssignment>,
    ) -> Result<()> {
        tell(&self.mailbox, ACTOR, TagOp::Initialize(assignments)).await
    }

    pub async fn add(
        &self,
        assignment: TagAssignment,
    ) -> Result<()> {
        tell(&self.mailbox, ACTOR, TagOp::Add(assignment)).await
    }

    pub async fn remove(
        &self,
        assignment: TagAssignment,
    ) -> Result<()> {
        tell(&self.mailbox, ACTOR, TagOp::Remove(assignment)).await
    }

    pub async fn for_node(
        &self,
        node_id: NodeId,
    ) -> Result<Vec<TagId>> {
        ask(&self.mailbox, ACTOR, |reply| TagOp::GetForNode { node_id, reply }).await
    }

    pub async fn for_channel(
        &self,
        channel_id: ChannelId,
    ) -> Result<Vec<TagId>> {
        ask(&self.mailbox, ACTOR, |reply| TagOp::GetForChannel { channel_id, reply }).await
    }
}

use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use super::ask;
use super::tell;
use crate::Channel;
use crate::ChannelId;
use crate::ChannelPoint;
use crate::NodeId;
use crate::Result;

const ACTOR: &str = "channel_cache";

#[derive(Debug)]
pub enum ChannelOp {
    /// Full replacement of the row, re-indexing its keys
    Add(Box<Channel>),
    GetByChannelPoint {
        channel_point: ChannelPoint,
        reply: oneshot::Sender<Option<ChannelId>>,
    },
    GetByLndShortChannelId {
        lnd_short_channel_id: u64,
        reply: oneshot::Sender<Option<ChannelId>>,
    },
    Get {
        channel_id: ChannelId,
        reply: oneshot::Sender<Option<Channel>>,
    },
    GetAll {
        reply: oneshot::Sender<Vec<Channel>>,
    },
    GetForNode {
        node_id: NodeId,
        reply: oneshot::Sender<Vec<Channel>>,
    },
}

/// Channel identity by natural key, by packed short id and by channel id.
pub struct ChannelCache {
    mailbox: mpsc::Receiver<ChannelOp>,
    by_id: HashMap<ChannelId, Channel>,
    by_point: HashMap<ChannelPoint, ChannelId>,
    by_lnd_short_id: HashMap<u64, ChannelId>,
}

impl ChannelCache {
    pub fn spawn(
        mailbox_size: usize,
        token: CancellationToken,
    ) -> ChannelCacheHandle {
        let (tx, rx) = mpsc::channel(mailbox_size);
        let actor = ChannelCache {
            mailbox: rx,
            by_id: HashMap::new(),
            by_point: HashMap::new(),
            by_lnd_short_id: HashMap::new(),
        };
        tokio::spawn(actor.run(token));
        ChannelCacheHandle { mailbox: tx }
    }

    async fn run(
        mut self,
        token: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!("channel cache stopped");
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
        op: ChannelOp,
    ) {
        match op {
            ChannelOp::Add(channel) => {
                if channel.channel_id == 0 {
                    warn!(channel_point = %channel.channel_point, "Ignoring channel without id");
                    return;
                }
                if let Some(previous) = self.by_id.get(&channel.channel_id) {
                    if let Some(old) = previous.lnd_short_channel_id {
                        self.by_lnd_short_id.remove(&old);
                    }
                }
                self.by_point.insert(channel.channel_point.clone(), channel.channel_id);
                if let Some(short) = channel.lnd_short_channel_id {
                    self.by_lnd_short_id.insert(short, channel.channel_id);
                }
                self.by_id.insert(channel.channel_id, *channel);
            }
            ChannelOp::GetByChannelPoint {
                channel_point,
                reply,
            } => {
                let _ = reply.send(self.by_point.get(&channel_point).copied());
            }
            ChannelOp::GetByLndShortChannelId {
                lnd_short_channel_id,
                reply,
            } => {
                let _ = reply.send(self.by_lnd_short_id.get(&lnd_short_channel_id).copied());
            }
            ChannelOp::Get { channel_id, reply } => {
                let _ = reply.send(self.by_id.get(&channel_id).cloned());
            }
            ChannelOp::GetAll { reply } => {
                let _ = reply.send(self.collect(|_| true));
            }
            ChannelOp::GetForNode { node_id, reply } => {
                let _ = reply.send(self.collect(|c| c.involves(node_id)));
            }
        }
    }

    fn collect(
        &self,
        filter: impl Fn(&Channel) -> bool,
    ) -> Vec<Channel> {
        let mut channels: Vec<Channel> =
            self.by_id.values().filter(|c| filter(c)).cloned().collect();
        channels.sort_by_key(|c| c.channel_id);
        channels
    }
}

#[derive(Debug, Clone)]
pub struct ChannelCacheHandle {
    mailbox: mpsc::Sender<ChannelOp>,
}

impl ChannelCacheHandle {
    pub async fn add(
        &self,
        channel: Channel,
    ) -> Result<()> {
        tell(&self.mailbox, ACTOR, ChannelOp::Add(Box::new(channel))).await
    }

    pub async fn by_channel_point(
        &self,
        channel_point: &ChannelPoint,
    ) -> Result<Option<ChannelId>> {
        let channel_point = channel_point.clone();
        ask(&self.mailbox, ACTOR, |reply| ChannelOp::GetByChannelPoint {
            channel_point,
            reply,
        })
        .await
    }

    pub async fn by_lnd_short_channel_id(
        &self,
        lnd_short_channel_id: u64,
    ) -> Result<Option<ChannelId>> {
        ask(&self.mailbox, ACTOR, |reply| ChannelOp::GetByLndShortChannelId {
            lnd_short_channel_id,
            reply,
        })
        .await
    }

    pub async fn get(
        &self,
        channel_id: ChannelId,
    ) -> Result<Option<Channel>> {
        ask(&self.mailbox, ACTOR, |reply| ChannelOp::Get { channel_id, reply }).await
    }

    pub async fn all(&self) -> Result<Vec<Channel>> {
        ask(&self.mailbox, ACTOR, |reply| ChannelOp::GetAll { reply }).await
    }

    pub async fn for_node(
        &self,
        node_id: NodeId,
    ) -> Result<Vec<Channel>> {
        ask(&self.mailbox, ACTOR, |reply| ChannelOp::GetForNode { node_id, reply }).await
    }
}

//! Registry of live rebalance attempts.
//!
//! Attempts are keyed by origin, origin id and focus channel. A key admits
//! one live attempt at a time and holds its cancellation token until the
//! attempt is removed; finished attempts leave their result in a per-key
//! history that is pruned every `history_prune_every` appends.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;

use crate::cache::ask;
use crate::cache::tell;
use crate::ChannelId;
use crate::RebalanceOrigin;
use crate::RebalanceRequest;
use crate::RebalanceResult;
use crate::RebalanceStatus;
use crate::RebalancerConfig;
use crate::Result;
use crate::ValidationError;

const ACTOR: &str = "rebalancer_registry";

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RebalanceKey {
    pub origin: RebalanceOrigin,
    pub origin_id: u32,
    pub focus_channel_id: ChannelId,
    /// Whether the focus channel is the incoming side
    pub incoming: bool,
}

impl RebalanceKey {
    /// Fails unless exactly one of the request's channels is set.
    pub fn of(request: &RebalanceRequest) -> Result<Self> {
        let (focus_channel_id, incoming) =
            match (request.incoming_channel_id, request.outgoing_channel_id) {
                (0, 0) => return Err(ValidationError::AmbiguousRebalanceFocus.into()),
                (incoming, 0) => (incoming, true),
                (0, outgoing) => (outgoing, false),
                _ => return Err(ValidationError::AmbiguousRebalanceFocus.into()),
            };
        Ok(Self {
            origin: request.origin,
            origin_id: request.origin_id,
            focus_channel_id,
            incoming,
        })
    }
}

#[derive(Debug)]
pub enum RegistryOp {
    Register {
        key: RebalanceKey,
        request: Box<RebalanceRequest>,
        token: CancellationToken,
        reply: oneshot::Sender<bool>,
    },
    Lookup {
        key: RebalanceKey,
        reply: oneshot::Sender<Option<RebalanceRequest>>,
    },
    AppendResult {
        key: RebalanceKey,
        result: RebalanceResult,
    },
    LatestResult {
        key: RebalanceKey,
        status: RebalanceStatus,
        reply: oneshot::Sender<Option<RebalanceResult>>,
    },
    History {
        key: RebalanceKey,
        reply: oneshot::Sender<Vec<RebalanceResult>>,
    },
    Cancel {
        key: RebalanceKey,
        reply: oneshot::Sender<bool>,
    },
    Remove {
        key: RebalanceKey,
    },
}

struct LiveAttempt {
    request: RebalanceRequest,
    token: CancellationToken,
}

pub struct RebalancerRegistry {
    mailbox: mpsc::Receiver<RegistryOp>,
    live: HashMap<RebalanceKey, LiveAttempt>,
    history: HashMap<RebalanceKey, Vec<RebalanceResult>>,
    prune_every: usize,
    retention: Duration,
}

impl RebalancerRegistry {
    pub fn spawn(
        config: &RebalancerConfig,
        token: CancellationToken,
    ) -> RebalancerRegistryHandle {
        let (tx, rx) = mpsc::channel(config.queue_size);
        let actor = RebalancerRegistry {
            mailbox: rx,
            live: HashMap::new(),
            history: HashMap::new(),
            prune_every: config.history_prune_every,
            retention: config.history_retention(),
        };
        tokio::spawn(actor.run(token));
        RebalancerRegistryHandle { mailbox: tx }
    }

    async fn run(
        mut self,
        token: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!("rebalancer registry stopped");
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
        op: RegistryOp,
    ) {
        match op {
            RegistryOp::Register {
                key,
                request,
                token,
                reply,
            } => {
                let admitted = !self.live.contains_key(&key);
                if admitted {
                    self.live.insert(
                        key,
                        LiveAttempt {
                            request: *request,
                            token,
                        },
                    );
                }
                let _ = reply.send(admitted);
            }
            RegistryOp::Lookup { key, reply } => {
                let _ = reply.send(self.live.get(&key).map(|live| live.request.clone()));
            }
            RegistryOp::AppendResult { key, result } => {
                let history = self.history.entry(key).or_default();
                history.push(result);
                if self.prune_every > 0 && history.len() % self.prune_every == 0 {
                    let cutoff = Utc::now()
                        - chrono::Duration::from_std(self.retention)
                            .unwrap_or_else(|_| chrono::Duration::zero());
                    let before = history.len();
                    history.retain(|r| r.at >= cutoff);
                    trace!(?key, pruned = before - history.len(), "History pruned");
                }
            }
            RegistryOp::LatestResult { key, status, reply } => {
                let latest = self
                    .history
                    .get(&key)
                    .and_then(|h| h.iter().rev().find(|r| r.status == status))
                    .cloned();
                let _ = reply.send(latest);
            }
            RegistryOp::History { key, reply } => {
                let _ = reply.send(self.history.get(&key).cloned().unwrap_or_default());
            }
            RegistryOp::Cancel { key, reply } => {
                let cancelled = match self.live.get(&key) {
                    Some(live) => {
                        debug!(?key, "cancelling live rebalance");
                        live.token.cancel();
                        true
                    }
                    None => false,
                };
                let _ = reply.send(cancelled);
            }
            RegistryOp::Remove { key } => {
                self.live.remove(&key);
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RebalancerRegistryHandle {
    mailbox: mpsc::Sender<RegistryOp>,
}

impl RebalancerRegistryHandle {
    /// False when an attempt is already live for the key. `token` stops the
    /// attempt when the key is cancelled.
    pub async fn register(
        &self,
        request: RebalanceRequest,
        token: CancellationToken,
    ) -> Result<bool> {
        let key = RebalanceKey::of(&request)?;
        ask(&self.mailbox, ACTOR, |reply| RegistryOp::Register {
            key,
            request: Box::new(request),
            token,
            reply,
        })
        .await
    }

    pub async fn lookup(
        &self,
        key: RebalanceKey,
    ) -> Result<Option<RebalanceRequest>> {
        ask(&self.mailbox, ACTOR, |reply| RegistryOp::Lookup { key, reply }).await
    }

    pub async fn append_result(
        &self,
        key: RebalanceKey,
        result: RebalanceResult,
    ) -> Result<()> {
        tell(&self.mailbox, ACTOR, RegistryOp::AppendResult { key, result }).await
    }

    /// Newest result of the key with `status`.
    pub async fn latest_result(
        &self,
        key: RebalanceKey,
        status: RebalanceStatus,
    ) -> Result<Option<RebalanceResult>> {
        ask(&self.mailbox, ACTOR, |reply| RegistryOp::LatestResult { key, status, reply }).await
    }

    pub async fn history(
        &self,
        key: RebalanceKey,
    ) -> Result<Vec<RebalanceResult>> {
        ask(&self.mailbox, ACTOR, |reply| RegistryOp::History { key, reply }).await
    }

    /// Fires the token of the live attempt; false when none is live.
    pub async fn cancel(
        &self,
        key: RebalanceKey,
    ) -> Result<bool> {
        ask(&self.mailbox, ACTOR, |reply| RegistryOp::Cancel { key, reply }).await
    }

    pub async fn remove(
        &self,
        key: RebalanceKey,
    ) -> Result<()> {
        tell(&self.mailbox, ACTOR, RegistryOp::Remove { key }).await
    }
}

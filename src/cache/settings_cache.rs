use std::collections::BTreeMap;

use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;

use super::ask;
use super::tell;
use crate::NodeConnectionConfig;
use crate::NodeId;
use crate::Result;
use crate::StreamFlags;
use crate::TenantSettings;

const ACTOR: &str = "settings_cache";

/// Connection details of one local node, keyed by its store id.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalNodeSettings {
    pub node_id: NodeId,
    pub config: NodeConnectionConfig,
}

/// Runtime-mutable subset of a node's settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeFlags {
    pub enabled: bool,
    pub streams: StreamFlags,
    pub import_historic_forwards: bool,
    pub ping_system: u8,
}

impl From<&NodeConnectionConfig> for NodeFlags {
    fn from(config: &NodeConnectionConfig) -> Self {
        Self {
            enabled: config.enabled,
            streams: config.streams,
            import_historic_forwards: config.import_historic_forwards,
            ping_system: config.ping_system,
        }
    }
}

#[derive(Debug)]
pub enum SettingsOp {
    GetTenant {
        reply: oneshot::Sender<TenantSettings>,
    },
    UpdateTenantSettings(TenantSettings),
    AddNode(Box<LocalNodeSettings>),
    GetNode {
        node_id: NodeId,
        reply: oneshot::Sender<Option<LocalNodeSettings>>,
    },
    GetNodes {
        reply: oneshot::Sender<Vec<LocalNodeSettings>>,
    },
    SetNodeFlags {
        node_id: NodeId,
        flags: NodeFlags,
        reply: oneshot::Sender<bool>,
    },
}

pub struct SettingsCache {
    mailbox: mpsc::Receiver<SettingsOp>,
    tenant: TenantSettings,
    nodes: BTreeMap<NodeId, LocalNodeSettings>,
}

impl SettingsCache {
    pub fn spawn(
        mailbox_size: usize,
        tenant: TenantSettings,
        token: CancellationToken,
    ) -> SettingsCacheHandle {
        let (tx, rx) = mpsc::channel(mailbox_size);
        let actor = SettingsCache {
            mailbox: rx,
            tenant,
            nodes: BTreeMap::new(),
        };
        tokio::spawn(actor.run(token));
        SettingsCacheHandle { mailbox: tx }
    }

    async fn run(
        mut self,
        token: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!("settings cache stopped");
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
        op: SettingsOp,
    ) {
        match op {
            SettingsOp::GetTenant { reply } => {
                let _ = reply.send(self.tenant.clone());
            }
            SettingsOp::UpdateTenantSettings(tenant) => {
                info!(time_zone = %tenant.preferred_time_zone, "Tenant settings updated");
                self.tenant = tenant;
            }
            SettingsOp::AddNode(settings) => {
                self.nodes.insert(settings.node_id, *settings);
            }
            SettingsOp::GetNode { node_id, reply } => {
                let _ = reply.send(self.nodes.get(&node_id).cloned());
            }
            SettingsOp::GetNodes { reply } => {
                let _ = reply.send(self.nodes.values().cloned().collect());
            }
            SettingsOp::SetNodeFlags {
                node_id,
                flags,
                reply,
            } => {
                let known = match self.nodes.get_mut(&node_id) {
                    Some(settings) => {
                        settings.config.enabled = flags.enabled;
                        settings.config.streams = flags.streams;
                        settings.config.import_historic_forwards = flags.import_historic_forwards;
                        settings.config.ping_system = flags.ping_system;
                        info!(node_id, ?flags, "Node flags updated");
                        true
                    }
                    None => false,
                };
                let _ = reply.send(known);
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SettingsCacheHandle {
    mailbox: mpsc::Sender<SettingsOp>,
}

impl SettingsCacheHandle {
    pub async fn tenant(&self) -> Result<TenantSettings> {
        ask(&self.mailbox, ACTOR, |reply| SettingsOp::GetTenant { reply }).await
    }

    pub async fn update_tenant_settings(
        &self,
        tenant: TenantSettings,
    ) -> Result<()> {
        tell(&self.mailbox, ACTOR, SettingsOp::UpdateTenantSettings(tenant)).await
    }

    pub async fn add_node(
        &self,
        settings: LocalNodeSettings,
    ) -> Result<()> {
        tell(&self.mailbox, ACTOR, SettingsOp::AddNode(Box::new(settings))).await
    }

    pub async fn node(
        &self,
        node_id: NodeId,
    ) -> Result<Option<LocalNodeSettings>> {
        ask(&self.mailbox, ACTOR, |reply| SettingsOp::GetNode { node_id, reply }).await
    }

    pub async fn nodes(&self) -> Result<Vec<LocalNodeSettings>> {
        ask(&self.mailbox, ACTOR, |reply| SettingsOp::GetNodes { reply }).await
    }

    /// Returns false for an unknown node.
    pub async fn set_node_flags(
        &self,
        node_id: NodeId,
        flags: NodeFlags,
    ) -> Result<bool> {
        ask(&self.mailbox, ACTOR, |reply| SettingsOp::SetNodeFlags {
            node_id,
            flags,
            reply,
        })
        .await
    }
}

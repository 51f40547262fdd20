//! Service locator handed to every component.
//!
//! Actors are constructed once at process start by [`PlaneBuilder`]; their
//! send-side handles travel through [`Plane`] instead of global bindings.

mod builder;

pub use builder::*;

#[cfg(test)]
mod builder_test;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::ChannelCache;
use crate::ChannelCacheHandle;
use crate::ChannelStateCache;
use crate::ChannelStateCacheHandle;
use crate::EventBusHandle;
use crate::Importer;
use crate::LightningClient;
use crate::LightningClients;
use crate::NodeAliasCache;
use crate::NodeAliasCacheHandle;
use crate::NodeCache;
use crate::NodeCacheHandle;
use crate::NodeId;
use crate::RebalancerRegistry;
use crate::RebalancerRegistryHandle;
use crate::Result;
use crate::ServiceStateCache;
use crate::ServiceStateCacheHandle;
use crate::Settings;
use crate::SettingsCache;
use crate::SettingsCacheHandle;
use crate::Store;
use crate::TagCache;
use crate::TagCacheHandle;

/// Handles of every cache actor.
#[derive(Debug, Clone)]
pub struct Caches {
    pub nodes: NodeCacheHandle,
    pub channels: ChannelCacheHandle,
    pub channel_states: ChannelStateCacheHandle,
    pub aliases: NodeAliasCacheHandle,
    pub tags: TagCacheHandle,
    pub services: ServiceStateCacheHandle,
    pub settings: SettingsCacheHandle,
}

impl Caches {
    /// Spawns every cache actor; they all stop with `token`.
    pub fn spawn(
        settings: &Settings,
        bus: &EventBusHandle,
        token: &CancellationToken,
    ) -> Self {
        let size = settings.cache.mailbox_size;
        Self {
            nodes: NodeCache::spawn(size, token.clone()),
            channels: ChannelCache::spawn(size, token.clone()),
            channel_states: ChannelStateCache::spawn(
                size,
                settings.cache.inactive_grace(),
                Some(bus.clone()),
                token.clone(),
            ),
            aliases: NodeAliasCache::spawn(size, token.clone()),
            tags: TagCache::spawn(size, token.clone()),
            services: ServiceStateCache::spawn(size, Some(bus.clone()), token.clone()),
            settings: SettingsCache::spawn(size, settings.tenant.clone(), token.clone()),
        }
    }
}

#[derive(Clone)]
pub struct Plane {
    pub settings: Arc<Settings>,
    pub store: Arc<dyn Store>,
    pub clients: Arc<LightningClients>,
    pub bus: EventBusHandle,
    pub caches: Caches,
    pub importer: Arc<Importer>,
    pub rebalances: RebalancerRegistryHandle,
}

impl Plane {
    /// Wires a plane around already-built infrastructure; actors stop with `token`.
    pub fn new(
        settings: Arc<Settings>,
        store: Arc<dyn Store>,
        clients: Arc<LightningClients>,
        bus: EventBusHandle,
        token: &CancellationToken,
    ) -> Self {
        let caches = Caches::spawn(&settings, &bus, token);
        let importer = Arc::new(Importer::new(settings.importer.freshness_window()));
        let rebalances = RebalancerRegistry::spawn(&settings.rebalancer, token.clone());
        Self {
            settings,
            store,
            clients,
            bus,
            caches,
            importer,
            rebalances,
        }
    }

    pub fn client(
        &self,
        node_id: NodeId,
    ) -> Result<Arc<dyn LightningClient>> {
        self.clients.get(node_id)
    }
}

//! Assembly of a [`Plane`] and of the services the supervisor runs on it.
//!
//! [`PlaneBuilder`] opens the store, spawns the bus and the cache actors,
//! registers every configured local node and reloads known identities into
//! the caches. The resulting [`PlaneServices`] hands out the send-side handles
//! of the gateway and the rebalancer and implements [`ServiceFactory`] for
//! the supervisor.
//!
//! ## Example
//! ```ignore
//! let token = CancellationToken::new();
//! let services = PlaneBuilder::new(settings, token.clone()).build().await?;
//! let gateway = services.gateway.clone();
//! Supervisor::new(
//!     services.plane.caches.services.clone(),
//!     services.plane.caches.settings.clone(),
//!     Arc::new(services),
//!     config,
//! );
//! ```

use std::sync::Arc;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::Plane;
use crate::lightning::ConnectionCache;
use crate::node_worker;
use crate::request_queue;
use crate::BlockDetailsClient;
use crate::EventBus;
use crate::Gateway;
use crate::GatewayHandle;
use crate::GatewayRequest;
use crate::GrpcLightningClient;
use crate::HttpBlockDetailsClient;
use crate::LightningClients;
use crate::LocalNodeSettings;
use crate::Maintenance;
use crate::NodeId;
use crate::NodeRole;
use crate::RebalanceCommand;
use crate::RebalanceService;
use crate::RebalancerHandle;
use crate::RequestQueue;
use crate::Result;
use crate::ServiceFactory;
use crate::ServiceFuture;
use crate::ServiceScope;
use crate::ServiceStatus;
use crate::ServiceType;
use crate::Settings;
use crate::SledStore;
use crate::Store;

pub struct PlaneBuilder {
    settings: Arc<Settings>,
    token: CancellationToken,
    store: Option<Arc<dyn Store>>,
    clients: Option<Arc<LightningClients>>,
    block_details: Option<Arc<dyn BlockDetailsClient>>,
}

impl PlaneBuilder {
    /// Every actor built from here stops with `token`.
    pub fn new(
        settings: Settings,
        token: CancellationToken,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            token,
            store: None,
            clients: None,
            block_details: None,
        }
    }

    /// Replaces the sled store under `app.db_dir`.
    pub fn store(
        mut self,
        store: Arc<dyn Store>,
    ) -> Self {
        self.store = Some(store);
        self
    }

    /// Replaces the gRPC clients; must hold a client for every configured node.
    pub fn clients(
        mut self,
        clients: Arc<LightningClients>,
    ) -> Self {
        self.clients = Some(clients);
        self
    }

    /// Replaces the HTTP block-details client built from `maintenance.block_details_url`.
    pub fn block_details(
        mut self,
        client: Arc<dyn BlockDetailsClient>,
    ) -> Self {
        self.block_details = Some(client);
        self
    }

    pub async fn build(self) -> Result<PlaneServices> {
        let settings = self.settings;
        let store: Arc<dyn Store> = match self.store {
            Some(store) => store,
            None => Arc::new(SledStore::open(&settings.app.db_dir)?),
        };
        let grpc = self.clients.is_none();
        let clients = self.clients.unwrap_or_default();
        let bus = EventBus::spawn(&settings.bus, self.token.clone());
        let plane = Plane::new(settings.clone(), store, clients, bus, &self.token);

        let local = register_local_nodes(&plane, grpc).await?;
        reload_identities(&plane, &local).await?;

        let block_details = match self.block_details {
            Some(client) => Some(client),
            None => match &settings.maintenance.block_details_url {
                Some(url) => Some(Arc::new(HttpBlockDetailsClient::new(
                    url.clone(),
                    settings.maintenance.request_timeout(),
                )?) as Arc<dyn BlockDetailsClient>),
                None => None,
            },
        };

        let (gateway_tx, gateway_queue) = request_queue(settings.gateway.queue_size);
        let (rebalancer_tx, rebalancer_queue) = request_queue(settings.rebalancer.queue_size);
        info!(nodes = settings.nodes.len(), "plane built");
        Ok(PlaneServices {
            gateway: GatewayHandle::new(gateway_tx),
            rebalancer: RebalancerHandle::new(rebalancer_tx),
            gateway_service: Arc::new(Gateway::new(plane.clone())),
            gateway_queue,
            rebalance_service: Arc::new(RebalanceService::new(plane.clone())),
            rebalancer_queue,
            block_details,
            plane,
        })
    }
}

/// Known nodes and channels from earlier runs, so lookups work before the
/// first import completes.
async fn reload_identities(
    plane: &Plane,
    local: &[NodeId],
) -> Result<()> {
    let caches = &plane.caches;
    let nodes = plane.store.all_nodes()?;
    for node in nodes.iter().filter(|n| !local.contains(&n.node_id)) {
        caches.nodes.add(node.clone(), NodeRole::ChannelPeer).await?;
    }
    let channels = plane.store.all_channels()?;
    for channel in &channels {
        caches.channels.add(channel.clone()).await?;
    }
    caches.tags.initialize(plane.store.all_tags()?).await?;
    debug!(nodes = nodes.len(), channels = channels.len(), "identities reloaded");
    Ok(())
}

async fn register_local_nodes(
    plane: &Plane,
    grpc: bool,
) -> Result<Vec<NodeId>> {
    let mut local = Vec::with_capacity(plane.settings.nodes.len());
    let connections = Arc::new(ConnectionCache::new(plane.settings.network.clone()));
    for config in &plane.settings.nodes {
        let node = plane.store.add_node(&config.public_key, config.chain, config.network)?;
        plane.caches.nodes.add(node.clone(), NodeRole::Local).await?;
        plane
            .caches
            .settings
            .add_node(LocalNodeSettings {
                node_id: node.node_id,
                config: config.clone(),
            })
            .await?;
        if grpc {
            let client = GrpcLightningClient::new(
                node.node_id,
                config,
                connections.clone(),
                plane.settings.network.max_decoding_message_size,
            );
            plane.clients.insert(node.node_id, Arc::new(client));
        }
        if !config.enabled {
            warn!(node = %config.name, "node is disabled");
        }
        info!(node_id = node.node_id, name = %config.name, "local node registered");
        local.push(node.node_id);
    }
    Ok(local)
}

/// The assembled plane together with the long-running services it offers
/// to the supervisor.
pub struct PlaneServices {
    pub plane: Plane,
    pub gateway: GatewayHandle,
    pub rebalancer: RebalancerHandle,
    gateway_service: Arc<Gateway>,
    gateway_queue: RequestQueue<GatewayRequest>,
    rebalance_service: Arc<RebalanceService>,
    rebalancer_queue: RequestQueue<RebalanceCommand>,
    block_details: Option<Arc<dyn BlockDetailsClient>>,
}

impl PlaneServices {
    fn process_service(
        &self,
        service_type: ServiceType,
        token: CancellationToken,
    ) -> Option<ServiceFuture> {
        let service = match service_type {
            ServiceType::Maintenance => {
                let client = self.block_details.clone()?;
                Maintenance::new(self.plane.clone(), client).run(token).boxed()
            }
            ServiceType::LightningCommunication => {
                self.gateway_service.clone().serve(self.gateway_queue.clone(), token).boxed()
            }
            ServiceType::Rebalance => self
                .rebalance_service
                .clone()
                .serve(self.rebalancer_queue.clone(), token)
                .boxed(),
            _ => return None,
        };
        let services = self.plane.caches.services.clone();
        Some(
            async move {
                services
                    .set_current(ServiceScope::Process, service_type, ServiceStatus::Active, false)
                    .await?;
                service.await
            }
            .boxed(),
        )
    }
}

impl ServiceFactory for PlaneServices {
    fn create(
        &self,
        scope: ServiceScope,
        service_type: ServiceType,
        token: CancellationToken,
    ) -> Option<ServiceFuture> {
        match scope {
            ServiceScope::Process => self.process_service(service_type, token),
            ServiceScope::Node(node_id) => node_worker(&self.plane, node_id, service_type, token),
        }
    }
}

//! Fixtures shared by unit tests: a plane over a temporary store, one local
//! node wired to a mocked daemon, and helpers to seed channels.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::Chain;
use crate::Channel;
use crate::ChannelPoint;
use crate::ChannelState;
use crate::ChannelStatus;
use crate::EventBus;
use crate::LightningClient;
use crate::LightningClients;
use crate::LocalNodeSettings;
use crate::Network;
use crate::NodeConnectionConfig;
use crate::NodeId;
use crate::NodeRole;
use crate::Plane;
use crate::ServiceStatus;
use crate::Settings;
use crate::ShortChannelId;
use crate::SledStore;
use crate::Store;
use crate::StreamFlags;

pub const LOCAL_KEY: &str = "02aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
pub const PEER_KEY: &str = "03bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
pub const OTHER_PEER_KEY: &str =
    "03cccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccc";

pub fn node_config(public_key: &str) -> NodeConnectionConfig {
    NodeConnectionConfig {
        name: "alpha".to_string(),
        public_key: public_key.to_string(),
        grpc_address: "https://127.0.0.1:10009".to_string(),
        tls_cert_path: PathBuf::from("/tmp/tls.cert"),
        macaroon_path: PathBuf::from("/tmp/admin.macaroon"),
        chain: Chain::Bitcoin,
        network: Network::Regtest,
        enabled: true,
        streams: StreamFlags::default(),
        import_historic_forwards: false,
        ping_system: 0,
    }
}

/// Defaults with timers short enough for tests.
pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.workers.reconnect_interval_in_ms = 20;
    settings.nodes = vec![node_config(LOCAL_KEY)];
    settings
}

pub struct TestPlane {
    pub plane: Plane,
    pub node_id: NodeId,
    pub token: CancellationToken,
}

impl Drop for TestPlane {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Plane over a temporary store with the local node registered, active and
/// ready, served by `client`.
pub async fn test_plane(
    settings: Settings,
    client: impl LightningClient,
) -> TestPlane {
    let store: Arc<dyn Store> = Arc::new(SledStore::temporary().unwrap());
    test_plane_with_store(settings, client, store).await
}

pub async fn test_plane_with_store(
    settings: Settings,
    client: impl LightningClient,
    store: Arc<dyn Store>,
) -> TestPlane {
    let token = CancellationToken::new();
    let settings = Arc::new(settings);
    let bus = EventBus::spawn(&settings.bus, token.clone());
    let clients = Arc::new(LightningClients::new());
    let plane = Plane::new(settings.clone(), store.clone(), clients.clone(), bus, &token);

    let node = store.add_node(LOCAL_KEY, Chain::Bitcoin, Network::Regtest).unwrap();
    plane.caches.nodes.add(node.clone(), NodeRole::Local).await.unwrap();
    plane.caches.nodes.set_active(node.node_id, true).await.unwrap();
    plane
        .caches
        .settings
        .add_node(LocalNodeSettings {
            node_id: node.node_id,
            config: settings.nodes[0].clone(),
        })
        .await
        .unwrap();
    plane
        .caches
        .channel_states
        .set_node_status(node.node_id, ServiceStatus::Active)
        .await
        .unwrap();
    clients.insert(node.node_id, Arc::new(client));

    TestPlane {
        plane,
        node_id: node.node_id,
        token,
    }
}

pub fn txid(seed: u8) -> String {
    format!("{:02x}", seed).repeat(32)
}

/// Open channel between the local node and `peer_key`, in store and caches,
/// with a live state of the given balances.
pub async fn seed_channel(
    test: &TestPlane,
    peer_key: &str,
    lnd_short_channel_id: u64,
    local_balance: i64,
    remote_balance: i64,
) -> Channel {
    let plane = &test.plane;
    let peer = plane
        .store
        .add_node(peer_key, Chain::Bitcoin, Network::Regtest)
        .unwrap();
    plane.caches.nodes.add(peer.clone(), NodeRole::ChannelPeer).await.unwrap();

    let now = Utc::now();
    let mut channel = Channel {
        channel_id: 0,
        channel_point: ChannelPoint::new(txid(lnd_short_channel_id as u8), 0),
        short_channel_id: Some(ShortChannelId::from_lnd(lnd_short_channel_id).to_string()),
        lnd_short_channel_id: Some(lnd_short_channel_id),
        first_node_id: test.node_id,
        second_node_id: peer.node_id,
        status: ChannelStatus::Open,
        capacity_sat: local_balance + remote_balance,
        closing_transaction_hash: None,
        funding_block_height: None,
        funded_on: None,
        closing_block_height: None,
        closed_on: None,
        created_on: now,
        updated_on: now,
    };
    channel.channel_id = plane.store.add_channel(&channel).unwrap();
    plane.caches.channels.add(channel.clone()).await.unwrap();
    plane
        .caches
        .channel_states
        .add_channel_state(ChannelState {
            node_id: test.node_id,
            channel_id: channel.channel_id,
            remote_node_id: peer.node_id,
            lnd_short_channel_id,
            active: true,
            capacity: channel.capacity_sat,
            local_balance,
            remote_balance,
            ..Default::default()
        })
        .await
        .unwrap();
    channel
}

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::test_utils::node_config;
use crate::test_utils::test_settings;
use crate::test_utils::txid;
use crate::test_utils::LOCAL_KEY;
use crate::test_utils::PEER_KEY;
use crate::Chain;
use crate::Channel;
use crate::ServiceFactory;
use crate::ChannelPoint;
use crate::ChannelStatus;
use crate::LightningClients;
use crate::MockBlockDetailsClient;
use crate::Network;
use crate::NodeId;
use crate::ServiceScope;
use crate::ServiceStatus;
use crate::ServiceType;
use crate::SledStore;
use crate::Store;

fn stored_channel(
    first_node_id: NodeId,
    second_node_id: NodeId,
) -> Channel {
    let now = Utc::now();
    Channel {
        channel_id: 0,
        channel_point: ChannelPoint::new(txid(9), 1),
        short_channel_id: None,
        lnd_short_channel_id: Some(900),
        first_node_id,
        second_node_id,
        status: ChannelStatus::Open,
        capacity_sat: 1_000_000,
        closing_transaction_hash: None,
        funding_block_height: None,
        funded_on: None,
        closing_block_height: None,
        closed_on: None,
        created_on: now,
        updated_on: now,
    }
}

async fn wait_for_status(
    services: &PlaneServices,
    service_type: ServiceType,
    status: ServiceStatus,
) {
    for _ in 0..100 {
        let view = services
            .plane
            .caches
            .services
            .get(ServiceScope::Process, service_type)
            .await
            .unwrap();
        if view.current == status {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("{service_type:?} never reached {status:?}");
}

#[tokio::test]
async fn test_build_registers_local_nodes_and_reloads_identities() {
    let store: Arc<dyn Store> = Arc::new(SledStore::temporary().unwrap());
    let local = store.add_node(LOCAL_KEY, Chain::Bitcoin, Network::Regtest).unwrap();
    let peer = store.add_node(PEER_KEY, Chain::Bitcoin, Network::Regtest).unwrap();
    store.add_channel(&stored_channel(local.node_id, peer.node_id)).unwrap();

    let token = CancellationToken::new();
    let services = PlaneBuilder::new(test_settings(), token.clone())
        .store(store)
        .build()
        .await
        .unwrap();
    let caches = &services.plane.caches;

    let locals = caches.nodes.local(false).await.unwrap();
    assert_eq!(locals.len(), 1);
    assert_eq!(locals[0].node_id, local.node_id);
    let peers = caches.nodes.channel_peers().await.unwrap();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].node_id, peer.node_id);
    assert_eq!(caches.channels.all().await.unwrap().len(), 1);
    assert!(caches.settings.node(local.node_id).await.unwrap().is_some());
    // gRPC client created without connecting
    assert!(services.plane.client(local.node_id).is_ok());
    token.cancel();
}

#[tokio::test]
async fn test_build_keeps_given_clients() {
    let mut settings = test_settings();
    settings.nodes.push(node_config(PEER_KEY));
    let token = CancellationToken::new();
    let services = PlaneBuilder::new(settings, token.clone())
        .store(Arc::new(SledStore::temporary().unwrap()))
        .clients(Arc::new(LightningClients::new()))
        .build()
        .await
        .unwrap();

    let locals = services.plane.caches.nodes.local(false).await.unwrap();
    assert_eq!(locals.len(), 2);
    for node in locals {
        assert!(services.plane.client(node.node_id).is_err());
    }
    token.cancel();
}

#[tokio::test]
async fn test_maintenance_is_not_offered_without_block_details() {
    let token = CancellationToken::new();
    let services = PlaneBuilder::new(test_settings(), token.clone())
        .store(Arc::new(SledStore::temporary().unwrap()))
        .build()
        .await
        .unwrap();

    assert!(services
        .create(ServiceScope::Process, ServiceType::Maintenance, token.child_token())
        .is_none());
    assert!(services
        .create(ServiceScope::Process, ServiceType::EventBus, token.child_token())
        .is_none());
    token.cancel();
}

#[tokio::test]
async fn test_maintenance_is_offered_with_block_details() {
    let token = CancellationToken::new();
    let services = PlaneBuilder::new(test_settings(), token.clone())
        .store(Arc::new(SledStore::temporary().unwrap()))
        .block_details(Arc::new(MockBlockDetailsClient::new()))
        .build()
        .await
        .unwrap();

    let worker = services
        .create(ServiceScope::Process, ServiceType::Maintenance, token.child_token())
        .unwrap();
    let handle = tokio::spawn(worker);
    wait_for_status(&services, ServiceType::Maintenance, ServiceStatus::Active).await;
    token.cancel();
    assert!(handle.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_process_services_are_marked_active_and_stop_on_cancel() {
    let token = CancellationToken::new();
    let services = PlaneBuilder::new(test_settings(), token.clone())
        .store(Arc::new(SledStore::temporary().unwrap()))
        .clients(Arc::new(LightningClients::new()))
        .build()
        .await
        .unwrap();

    let stop = token.child_token();
    let gateway = services
        .create(ServiceScope::Process, ServiceType::LightningCommunication, stop.clone())
        .unwrap();
    let rebalance = services
        .create(ServiceScope::Process, ServiceType::Rebalance, stop.clone())
        .unwrap();
    let gateway = tokio::spawn(gateway);
    let rebalance = tokio::spawn(rebalance);
    wait_for_status(&services, ServiceType::LightningCommunication, ServiceStatus::Active).await;
    wait_for_status(&services, ServiceType::Rebalance, ServiceStatus::Active).await;

    stop.cancel();
    assert!(gateway.await.unwrap().is_ok());
    assert!(rebalance.await.unwrap().is_ok());
    token.cancel();
}

#[tokio::test]
async fn test_node_scope_builds_node_workers_only() {
    let token = CancellationToken::new();
    let services = PlaneBuilder::new(test_settings(), token.clone())
        .store(Arc::new(SledStore::temporary().unwrap()))
        .clients(Arc::new(LightningClients::new()))
        .build()
        .await
        .unwrap();

    let node = ServiceScope::Node(1);
    assert!(services.create(node, ServiceType::LndService, token.child_token()).is_some());
    assert!(services.create(node, ServiceType::Rebalance, token.child_token()).is_none());
    token.cancel();
}

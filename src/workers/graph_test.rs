use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures::stream;
use futures::StreamExt;
use tokio::time::timeout;

use super::*;
use crate::proto::lnrpc;
use crate::test_utils::seed_channel;
use crate::test_utils::test_plane;
use crate::test_utils::test_settings;
use crate::test_utils::TestPlane;
use crate::test_utils::LOCAL_KEY;
use crate::test_utils::OTHER_PEER_KEY;
use crate::test_utils::PEER_KEY;
use crate::Chain;
use crate::EventKind;
use crate::EventPayload;
use crate::GraphEvent;
use crate::MockLightningClient;
use crate::Network;
use crate::ServiceStatus;
use crate::ServiceType;

fn edge(
    chan_id: u64,
    advertising_node: &str,
    fee_rate: i64,
) -> lnrpc::ChannelEdgeUpdate {
    lnrpc::ChannelEdgeUpdate {
        chan_id,
        advertising_node: advertising_node.to_string(),
        routing_policy: Some(lnrpc::RoutingPolicy {
            time_lock_delta: 40,
            min_htlc: 1_000,
            fee_base_msat: 1_000,
            fee_rate_milli_msat: fee_rate,
            max_htlc_msat: 99_000_000,
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn ctx(test: &TestPlane) -> WorkerContext {
    WorkerContext::new(
        test.plane.clone(),
        test.node_id,
        ServiceType::GraphEventStream,
        test.token.child_token(),
    )
}

async fn peer_id(test: &TestPlane) -> u32 {
    test.plane
        .caches
        .nodes
        .node_id(PEER_KEY, Chain::Bitcoin, Network::Regtest)
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn test_policies_of_own_channels_are_recorded() {
    let test = test_plane(test_settings(), MockLightningClient::new()).await;
    let channel = seed_channel(&test, PEER_KEY, 777, 60_000, 40_000).await;
    let peer_id = peer_id(&test).await;
    let ctx = ctx(&test);
    let mut processor = GraphProcessor::default();

    let update = lnrpc::GraphTopologyUpdate {
        channel_updates: vec![edge(777, PEER_KEY, 250), edge(777, LOCAL_KEY, 100)],
        ..Default::default()
    };
    processor.process(&ctx, update).await.unwrap();

    let state = test
        .plane
        .caches
        .channel_states
        .channel_state(test.node_id, channel.channel_id, false)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.remote_policy.fee_rate_milli_msat, 250);
    assert_eq!(state.local_policy.fee_rate_milli_msat, 100);
    let remote =
        test.plane.store.latest_routing_policy(channel.channel_id, peer_id).unwrap().unwrap();
    assert!(!remote.outbound);
    let local =
        test.plane.store.latest_routing_policy(channel.channel_id, test.node_id).unwrap().unwrap();
    assert!(local.outbound);
}

#[tokio::test]
async fn test_foreign_channels_and_unknown_nodes_are_ignored() {
    let test = test_plane(test_settings(), MockLightningClient::new()).await;
    seed_channel(&test, PEER_KEY, 777, 60_000, 40_000).await;
    let mut events = test.plane.bus.subscribe("test", &[EventKind::Graph]);
    let ctx = ctx(&test);

    let update = lnrpc::GraphTopologyUpdate {
        channel_updates: vec![edge(999, OTHER_PEER_KEY, 250)],
        node_updates: vec![lnrpc::NodeUpdate {
            identity_key: OTHER_PEER_KEY.to_string(),
            alias: "stranger".to_string(),
            ..Default::default()
        }],
        ..Default::default()
    };
    GraphProcessor::default().process(&ctx, update).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(events.try_recv().is_none());
}

#[tokio::test]
async fn test_known_node_announcement_refreshes_alias() {
    let test = test_plane(test_settings(), MockLightningClient::new()).await;
    seed_channel(&test, PEER_KEY, 777, 60_000, 40_000).await;
    let peer_id = peer_id(&test).await;
    let mut events = test.plane.bus.subscribe("test", &[EventKind::Graph]);
    let ctx = ctx(&test);

    let update = lnrpc::GraphTopologyUpdate {
        node_updates: vec![lnrpc::NodeUpdate {
            identity_key: PEER_KEY.to_string(),
            alias: "bob".to_string(),
            color: "#3399ff".to_string(),
            ..Default::default()
        }],
        ..Default::default()
    };
    GraphProcessor::default().process(&ctx, update).await.unwrap();

    assert_eq!(test.plane.caches.aliases.get(peer_id).await.unwrap(), Some("bob".to_string()));
    let event = timeout(Duration::from_secs(1), events.recv()).await.unwrap().unwrap();
    assert!(matches!(
        &event.payload,
        EventPayload::Graph(GraphEvent::Node { event_node_id, .. }) if *event_node_id == peer_id
    ));
}

#[tokio::test]
async fn test_stream_end_resubscribes() {
    let opened = Arc::new(AtomicUsize::new(0));
    let counter = opened.clone();
    let mut client = MockLightningClient::new();
    client.expect_subscribe_channel_graph().returning(move || {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok(stream::iter(vec![Ok(lnrpc::GraphTopologyUpdate::default())]).boxed())
        } else {
            Ok(stream::pending::<crate::Result<lnrpc::GraphTopologyUpdate>>().boxed())
        }
    });
    let test = test_plane(test_settings(), client).await;
    let mut events = test.plane.bus.subscribe("test", &[EventKind::Service]);
    let ctx = ctx(&test);
    let token = ctx.token.clone();
    let worker = tokio::spawn(run_stream(ctx, GraphProcessor::default()));

    let mut statuses = Vec::new();
    while statuses.len() < 6 {
        let event = timeout(Duration::from_secs(5), events.recv()).await.unwrap().unwrap();
        if let EventPayload::Service(service) = &event.payload {
            if service.service_type == ServiceType::GraphEventStream {
                statuses.push(service.status);
            }
        }
    }
    assert_eq!(
        statuses,
        vec![
            ServiceStatus::Pending,
            ServiceStatus::Initializing,
            ServiceStatus::Active,
            ServiceStatus::Pending,
            ServiceStatus::Initializing,
            ServiceStatus::Active,
        ]
    );
    assert_eq!(opened.load(Ordering::SeqCst), 2);

    token.cancel();
    worker.await.unwrap().unwrap();
}

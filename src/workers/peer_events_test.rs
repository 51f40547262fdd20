use std::time::Duration;

use super::*;
use crate::proto::lnrpc;
use crate::proto::lnrpc::peer_event::EventType;
use crate::test_utils::seed_channel;
use crate::test_utils::test_plane;
use crate::test_utils::test_settings;
use crate::test_utils::TestPlane;
use crate::test_utils::OTHER_PEER_KEY;
use crate::test_utils::PEER_KEY;
use crate::EventKind;
use crate::EventPayload;
use crate::MockLightningClient;
use crate::PeerEventType;
use crate::ServiceType;

fn ctx(test: &TestPlane) -> WorkerContext {
    WorkerContext::new(
        test.plane.clone(),
        test.node_id,
        ServiceType::PeerEventStream,
        test.token.child_token(),
    )
}

fn peer_event(
    pub_key: &str,
    event_type: EventType,
) -> lnrpc::PeerEvent {
    lnrpc::PeerEvent {
        pub_key: pub_key.to_string(),
        r#type: event_type as i32,
    }
}

#[tokio::test]
async fn test_known_peer_going_offline_is_published() {
    let test = test_plane(test_settings(), MockLightningClient::new()).await;
    let channel = seed_channel(&test, PEER_KEY, 777, 60_000, 40_000).await;
    let mut events = test.plane.bus.subscribe("test", &[EventKind::Peer]);
    let ctx = ctx(&test);

    PeerEventProcessor::default()
        .process(&ctx, peer_event(PEER_KEY, EventType::PeerOffline))
        .await
        .unwrap();

    let event = events.recv().await.unwrap();
    let EventPayload::Peer(record) = &event.payload else {
        panic!("unexpected payload {:?}", event.payload);
    };
    assert_eq!(record.event_node_id, channel.peer_of(test.node_id));
    assert_eq!(record.event_type, PeerEventType::Offline);
}

#[tokio::test]
async fn test_unknown_peer_is_dropped() {
    let test = test_plane(test_settings(), MockLightningClient::new()).await;
    let mut events = test.plane.bus.subscribe("test", &[EventKind::Peer]);
    let ctx = ctx(&test);

    PeerEventProcessor::default()
        .process(&ctx, peer_event(OTHER_PEER_KEY, EventType::PeerOnline))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(events.try_recv().is_none());
}

use std::time::Duration;

use super::*;
use crate::proto::lnrpc;
use crate::test_utils::seed_channel;
use crate::test_utils::test_plane;
use crate::test_utils::test_settings;
use crate::test_utils::txid;
use crate::test_utils::LOCAL_KEY;
use crate::test_utils::OTHER_PEER_KEY;
use crate::test_utils::PEER_KEY;
use crate::ChannelPoint;
use crate::ChannelStatus;
use crate::ImportType;
use crate::MockLightningClient;
use crate::UpstreamError;

fn open_channel() -> lnrpc::Channel {
    lnrpc::Channel {
        active: true,
        remote_pubkey: PEER_KEY.to_string(),
        channel_point: format!("{}:1", txid(1)),
        chan_id: 1337,
        capacity: 100_000,
        local_balance: 60_000,
        remote_balance: 39_000,
        commit_fee: 1_000,
        ..Default::default()
    }
}

fn closed_channel() -> lnrpc::ChannelCloseSummary {
    lnrpc::ChannelCloseSummary {
        channel_point: format!("{}:0", txid(2)),
        chan_id: 1338,
        closing_tx_hash: txid(3),
        remote_pubkey: OTHER_PEER_KEY.to_string(),
        capacity: 50_000,
        close_height: 800_000,
        close_type: lnrpc::channel_close_summary::ClosureType::RemoteForceClose as i32,
        ..Default::default()
    }
}

fn channel_client(times: usize) -> MockLightningClient {
    let mut client = MockLightningClient::new();
    client.expect_list_channels().times(times).returning(|| Ok(vec![open_channel()]));
    client
        .expect_pending_channels()
        .times(times)
        .returning(|| Ok(lnrpc::PendingChannelsResponse::default()));
    client.expect_closed_channels().times(times).returning(|| Ok(vec![closed_channel()]));
    client
}

fn policy(fee_rate: i64) -> lnrpc::RoutingPolicy {
    lnrpc::RoutingPolicy {
        time_lock_delta: 40,
        min_htlc: 1_000,
        fee_base_msat: 1_000,
        fee_rate_milli_msat: fee_rate,
        max_htlc_msat: 99_000_000,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_all_channels_populates_store_and_caches() {
    let test = test_plane(test_settings(), channel_client(1)).await;
    let plane = &test.plane;

    let outcome = plane
        .importer
        .import(plane, test.node_id, ImportType::AllChannels, false)
        .await
        .unwrap();
    assert!(!outcome.skipped);

    let channels = plane.store.all_channels().unwrap();
    assert_eq!(channels.len(), 2);
    let open_id = plane
        .caches
        .channels
        .by_channel_point(&ChannelPoint::new(txid(1), 1))
        .await
        .unwrap()
        .unwrap();
    let open = plane.caches.channels.get(open_id).await.unwrap().unwrap();
    assert_eq!(open.status, ChannelStatus::Open);
    assert_eq!(open.short_channel_id.as_deref(), Some("0x0x1337"));

    let closed_id = plane.store.get_channel_id(&ChannelPoint::new(txid(2), 0)).unwrap().unwrap();
    let closed = plane.store.get_channel(closed_id).unwrap().unwrap();
    assert_eq!(closed.status, ChannelStatus::ClosingRemoteForce);
    assert_eq!(closed.closing_transaction_hash, Some(txid(3)));
    assert_eq!(closed.closing_block_height, Some(800_000));

    let states = plane.caches.channel_states.channel_states(test.node_id, false).await.unwrap();
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].channel_id, open_id);
    assert_eq!(states[0].local_balance, 60_000);
    assert_eq!(states[0].peer.channel_count, 1);
}

#[tokio::test]
async fn test_fresh_import_is_skipped_unless_forced() {
    let test = test_plane(test_settings(), channel_client(2)).await;
    let plane = &test.plane;

    plane.importer.import(plane, test.node_id, ImportType::AllChannels, false).await.unwrap();
    assert!(plane.importer.is_fresh(test.node_id, ImportType::AllChannels));

    let skipped = plane
        .importer
        .import(plane, test.node_id, ImportType::AllChannels, false)
        .await
        .unwrap();
    assert!(skipped.skipped);

    let forced = plane
        .importer
        .import(plane, test.node_id, ImportType::AllChannels, true)
        .await
        .unwrap();
    assert!(!forced.skipped);
    assert_eq!(plane.store.all_channels().unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_freshness_expires_after_window() {
    let mut client = MockLightningClient::new();
    client
        .expect_pending_channels()
        .times(2)
        .returning(|| Ok(lnrpc::PendingChannelsResponse::default()));
    let test = test_plane(test_settings(), client).await;
    let plane = &test.plane;

    plane.importer.import(plane, test.node_id, ImportType::PendingChannelsOnly, false).await.unwrap();
    tokio::time::advance(Duration::from_secs(69)).await;
    assert!(plane.importer.is_fresh(test.node_id, ImportType::PendingChannelsOnly));

    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(!plane.importer.is_fresh(test.node_id, ImportType::PendingChannelsOnly));
    let outcome = plane
        .importer
        .import(plane, test.node_id, ImportType::PendingChannelsOnly, false)
        .await
        .unwrap();
    assert!(!outcome.skipped);
}

#[tokio::test]
async fn test_routing_policies_are_deduplicated_and_mirrored() {
    let mut client = MockLightningClient::new();
    client.expect_get_chan_info().times(2).returning(|_| {
        Ok(lnrpc::ChannelEdge {
            channel_id: 777,
            node1_pub: LOCAL_KEY.to_string(),
            node2_pub: PEER_KEY.to_string(),
            node1_policy: Some(policy(250)),
            node2_policy: Some(policy(10)),
            ..Default::default()
        })
    });
    let test = test_plane(test_settings(), client).await;
    let plane = &test.plane;
    let channel = seed_channel(&test, PEER_KEY, 777, 50_000, 50_000).await;

    for _ in 0..2 {
        plane
            .importer
            .import(plane, test.node_id, ImportType::ChannelRoutingPolicies, true)
            .await
            .unwrap();
    }

    let outbound = plane.store.latest_routing_policy(channel.channel_id, test.node_id).unwrap();
    let outbound = outbound.unwrap();
    assert!(outbound.outbound);
    assert_eq!(outbound.policy.fee_rate_milli_msat, 250);
    let history = plane
        .store
        .routing_policies_since(channel.channel_id, test.node_id, crate::time_from_secs(0))
        .unwrap();
    assert_eq!(history.len(), 1);

    let state = plane
        .caches
        .channel_states
        .channel_state(test.node_id, channel.channel_id, false)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.local_policy.fee_rate_milli_msat, 250);
    assert_eq!(state.remote_policy.fee_rate_milli_msat, 10);
}

#[tokio::test]
async fn test_unknown_edge_is_skipped() {
    let mut client = MockLightningClient::new();
    client
        .expect_get_chan_info()
        .returning(|_| Err(UpstreamError::from(tonic::Status::not_found("edge not found")).into()));
    let test = test_plane(test_settings(), client).await;
    let plane = &test.plane;
    seed_channel(&test, PEER_KEY, 777, 50_000, 50_000).await;

    let outcome = plane
        .importer
        .import(plane, test.node_id, ImportType::ChannelRoutingPolicies, false)
        .await;
    assert!(outcome.is_ok());
}

#[tokio::test]
async fn test_node_information_sets_alias() {
    let mut client = MockLightningClient::new();
    client.expect_get_node_info().returning(|pub_key| {
        Ok(lnrpc::NodeInfo {
            node: Some(lnrpc::LightningNode {
                pub_key,
                alias: "bob".to_string(),
                color: "#3399ff".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        })
    });
    let test = test_plane(test_settings(), client).await;
    let plane = &test.plane;
    let channel = seed_channel(&test, PEER_KEY, 777, 50_000, 50_000).await;

    plane.importer.import(plane, test.node_id, ImportType::NodeInformation, false).await.unwrap();

    let peer_id = channel.peer_of(test.node_id);
    assert_eq!(plane.caches.aliases.get(peer_id).await.unwrap(), Some("bob".to_string()));
}

#[tokio::test]
async fn test_failed_import_is_not_marked_fresh() {
    let mut client = MockLightningClient::new();
    client
        .expect_pending_channels()
        .returning(|| Err(UpstreamError::from(tonic::Status::unavailable("down")).into()));
    let test = test_plane(test_settings(), client).await;
    let plane = &test.plane;

    let result = plane
        .importer
        .import(plane, test.node_id, ImportType::PendingChannelsOnly, false)
        .await;
    assert!(result.is_err());
    assert!(!plane.importer.is_fresh(test.node_id, ImportType::PendingChannelsOnly));
}

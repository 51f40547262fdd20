use super::*;
use crate::proto::lnrpc;
use crate::test_utils::seed_channel;
use crate::test_utils::test_plane;
use crate::test_utils::test_settings;
use crate::test_utils::txid;
use crate::test_utils::TestPlane;
use crate::test_utils::PEER_KEY;
use crate::MockLightningClient;
use crate::ServiceType;

fn ctx(test: &TestPlane) -> WorkerContext {
    WorkerContext::new(
        test.plane.clone(),
        test.node_id,
        ServiceType::ChannelBalanceCacheStream,
        test.token.child_token(),
    )
}

fn listed(local_balance: i64) -> lnrpc::Channel {
    lnrpc::Channel {
        active: true,
        remote_pubkey: PEER_KEY.to_string(),
        channel_point: format!("{}:0", txid(9)),
        chan_id: 777,
        capacity: 100_000,
        local_balance,
        remote_balance: 100_000 - local_balance,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_bootstrap_rereads_balances() {
    let mut client = MockLightningClient::new();
    client.expect_list_channels().times(1).returning(|| Ok(vec![listed(25_000)]));
    let test = test_plane(test_settings(), client).await;
    let channel = seed_channel(&test, PEER_KEY, 777, 60_000, 40_000).await;
    let ctx = ctx(&test);

    BalanceCoordinator::new(3).bootstrap(&ctx).await.unwrap();

    let state = test
        .plane
        .caches
        .channel_states
        .channel_state(test.node_id, channel.channel_id, false)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.local_balance, 25_000);
    assert_eq!(state.remote_balance, 75_000);
    assert_eq!(state.peer.local_balance, 25_000);
}

#[tokio::test]
async fn test_full_refresh_runs_every_nth_tick() {
    let mut client = MockLightningClient::new();
    client.expect_list_channels().times(2).returning(|| Ok(vec![listed(30_000)]));
    let test = test_plane(test_settings(), client).await;
    seed_channel(&test, PEER_KEY, 777, 60_000, 40_000).await;
    let ctx = ctx(&test);
    let mut coordinator = BalanceCoordinator::new(3);

    for _ in 0..6 {
        coordinator.poll(&ctx).await.unwrap();
    }
}

#[tokio::test]
async fn test_unknown_listed_channels_are_skipped() {
    let mut client = MockLightningClient::new();
    client.expect_list_channels().returning(|| {
        Ok(vec![lnrpc::Channel {
            chan_id: 4242,
            channel_point: format!("{}:3", txid(42)),
            ..listed(1)
        }])
    });
    let test = test_plane(test_settings(), client).await;
    let channel = seed_channel(&test, PEER_KEY, 777, 60_000, 40_000).await;
    let ctx = ctx(&test);

    BalanceCoordinator::new(1).poll(&ctx).await.unwrap();

    let state = test
        .plane
        .caches
        .channel_states
        .channel_state(test.node_id, channel.channel_id, false)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.local_balance, 60_000);
}

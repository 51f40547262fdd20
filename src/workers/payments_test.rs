use std::sync::Arc;

use super::*;
use crate::proto::lnrpc;
use crate::proto::lnrpc::payment::PaymentStatus as UpstreamStatus;
use crate::test_utils::seed_channel;
use crate::test_utils::test_plane;
use crate::test_utils::test_settings;
use crate::test_utils::TestPlane;
use crate::test_utils::LOCAL_KEY;
use crate::test_utils::OTHER_PEER_KEY;
use crate::test_utils::PEER_KEY;
use crate::EventKind;
use crate::MockLightningClient;
use crate::PaymentStatus;
use crate::ServiceType;

fn ctx(test: &TestPlane) -> WorkerContext {
    WorkerContext::new(
        test.plane.clone(),
        test.node_id,
        ServiceType::PaymentStream,
        test.token.child_token(),
    )
}

fn hop(
    chan_id: u64,
    pub_key: &str,
) -> lnrpc::Hop {
    lnrpc::Hop {
        chan_id,
        pub_key: pub_key.to_string(),
        ..Default::default()
    }
}

fn payment(
    payment_index: u64,
    status: UpstreamStatus,
    hops: Vec<lnrpc::Hop>,
) -> lnrpc::Payment {
    lnrpc::Payment {
        payment_hash: format!("{:064x}", payment_index),
        value_msat: 250_000,
        fee_msat: 12,
        status: status as i32,
        creation_time_ns: 1_700_000_000_000_000_000,
        payment_index,
        htlcs: vec![lnrpc::HtlcAttempt {
            route: Some(lnrpc::Route {
                hops,
                ..Default::default()
            }),
            ..Default::default()
        }],
        ..Default::default()
    }
}

/// Daemon listing `payments` after the requested index offset.
fn listing_client(payments: Vec<lnrpc::Payment>) -> MockLightningClient {
    let payments = Arc::new(payments);
    let mut client = MockLightningClient::new();
    client.expect_list_payments().returning(move |req| {
        let page: Vec<_> = payments
            .iter()
            .filter(|p| p.payment_index > req.index_offset)
            .take(req.max_payments as usize)
            .cloned()
            .collect();
        let last_index_offset = page.last().map(|p| p.payment_index).unwrap_or(0);
        Ok(lnrpc::ListPaymentsResponse {
            payments: page,
            last_index_offset,
            ..Default::default()
        })
    });
    client
}

#[tokio::test]
async fn test_circular_payment_is_marked_as_rebalance() {
    let client = listing_client(vec![payment(
        1,
        UpstreamStatus::Succeeded,
        vec![hop(777, PEER_KEY), hop(888, LOCAL_KEY)],
    )]);
    let test = test_plane(test_settings(), client).await;
    let outgoing = seed_channel(&test, PEER_KEY, 777, 60_000, 40_000).await;
    let incoming = seed_channel(&test, OTHER_PEER_KEY, 888, 10_000, 90_000).await;
    let ctx = ctx(&test);

    PaymentsPoller::new(10).poll(&ctx).await.unwrap();

    let stored = test.plane.store.get_payment(test.node_id, 1).unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Succeeded);
    assert_eq!(stored.outgoing_channel_id, Some(outgoing.channel_id));
    assert_eq!(stored.incoming_channel_id, Some(incoming.channel_id));
    assert_eq!(stored.rebalance_amount_msat, Some(250_000));
}

#[tokio::test]
async fn test_payment_to_a_remote_node_is_not_a_rebalance() {
    let client = listing_client(vec![payment(
        1,
        UpstreamStatus::Succeeded,
        vec![hop(777, PEER_KEY), hop(999, OTHER_PEER_KEY)],
    )]);
    let test = test_plane(test_settings(), client).await;
    let outgoing = seed_channel(&test, PEER_KEY, 777, 60_000, 40_000).await;
    let ctx = ctx(&test);

    PaymentsPoller::new(10).poll(&ctx).await.unwrap();

    let stored = test.plane.store.get_payment(test.node_id, 1).unwrap().unwrap();
    assert_eq!(stored.outgoing_channel_id, Some(outgoing.channel_id));
    assert_eq!(stored.incoming_channel_id, None);
    assert_eq!(stored.rebalance_amount_msat, None);
}

#[tokio::test]
async fn test_pages_resume_from_the_highest_stored_index() {
    let payments =
        (1..=5).map(|i| payment(i, UpstreamStatus::Failed, vec![hop(777, PEER_KEY)])).collect();
    let test = test_plane(test_settings(), listing_client(payments)).await;
    let mut events = test.plane.bus.subscribe("test", &[EventKind::Payment]);
    let ctx = ctx(&test);
    let mut poller = PaymentsPoller::new(2);

    poller.poll(&ctx).await.unwrap();
    poller.poll(&ctx).await.unwrap();

    assert_eq!(test.plane.store.last_payment_index(test.node_id).unwrap(), 5);
    let mut published = 0;
    while events.recv().await.is_some() {
        published += 1;
        if published == 5 {
            break;
        }
    }
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(events.try_recv().is_none());
}

#[tokio::test]
async fn test_in_flight_payment_keeps_decoded_expiry() {
    let mut in_flight = payment(1, UpstreamStatus::InFlight, vec![hop(777, PEER_KEY)]);
    in_flight.payment_request = "lnbcrt2500n1inflight".to_string();
    let mut client = listing_client(vec![in_flight]);
    client.expect_decode_pay_req().returning(|_| {
        Ok(lnrpc::PayReq {
            expiry: 600,
            ..Default::default()
        })
    });
    let test = test_plane(test_settings(), client).await;
    let ctx = ctx(&test);

    PaymentsPoller::new(10).poll(&ctx).await.unwrap();

    let stored = test.plane.store.get_payment(test.node_id, 1).unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::InFlight);
    assert_eq!(stored.expiry_secs, Some(600));
}

use std::sync::Arc;
use std::time::Duration;

use futures::stream;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::proto::lnrpc;
use crate::test_utils::seed_channel;
use crate::test_utils::test_plane;
use crate::test_utils::test_settings;
use crate::test_utils::PEER_KEY;
use crate::ErrorClass;
use crate::MockLightningClient;
use crate::RebalanceOrigin;
use crate::RebalanceRequest;
use crate::RebalanceStatus;
use crate::ServiceStatus;

fn request(
    node_id: u32,
    incoming_channel_id: u32,
    outgoing_channel_id: u32,
) -> RebalanceRequest {
    RebalanceRequest {
        origin: RebalanceOrigin::Manual,
        origin_id: 3,
        node_id,
        incoming_channel_id,
        outgoing_channel_id,
        amount_msat: 50_000_000,
        max_fee_msat: 1_000,
    }
}

fn payment(
    status: lnrpc::payment::PaymentStatus,
    fee_msat: i64,
) -> lnrpc::Payment {
    lnrpc::Payment {
        status: status as i32,
        fee_msat,
        ..Default::default()
    }
}

fn client_with_invoice() -> MockLightningClient {
    let mut client = MockLightningClient::new();
    client.expect_add_invoice().returning(|_| {
        Ok(lnrpc::AddInvoiceResponse {
            r_hash: vec![0xab; 32],
            payment_request: "lnbcrt500u1rebalance".to_string(),
            ..Default::default()
        })
    });
    client
}

#[tokio::test]
async fn test_succeeded_rebalance_is_recorded_and_released() {
    let mut client = client_with_invoice();
    client
        .expect_send_payment()
        .withf(|req| req.allow_self_payment && req.outgoing_chan_ids == vec![777])
        .returning(|_| {
            Ok(stream::iter(vec![
                Ok(payment(lnrpc::payment::PaymentStatus::InFlight, 0)),
                Ok(payment(lnrpc::payment::PaymentStatus::Succeeded, 420)),
            ])
            .boxed())
        });
    let test = test_plane(test_settings(), client).await;
    let channel = seed_channel(&test, PEER_KEY, 777, 60_000, 40_000).await;
    let service = RebalanceService::new(test.plane.clone());

    let req = request(test.node_id, 0, channel.channel_id);
    let response = service.rebalance(req.clone(), CancellationToken::new()).await;

    assert_eq!(response.status, ServiceStatus::Active);
    let result = response.output.unwrap();
    assert_eq!(result.status, RebalanceStatus::Succeeded);
    assert_eq!(result.total_fee_msat, 420);
    assert_eq!(result.payment_hash, Some("ab".repeat(32)));

    let key = RebalanceKey::of(&req).unwrap();
    assert!(test.plane.rebalances.lookup(key).await.unwrap().is_none());
    assert_eq!(test.plane.rebalances.history(key).await.unwrap().len(), 1);
    let logs = test.plane.store.rebalance_logs().unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].request, req);
}

#[tokio::test]
async fn test_incoming_focus_constrains_last_hop() {
    let mut client = client_with_invoice();
    let expected = hex::decode(PEER_KEY).unwrap();
    client
        .expect_send_payment()
        .withf(move |req| req.last_hop_pubkey == expected && req.outgoing_chan_ids.is_empty())
        .returning(|_| {
            Ok(stream::iter(vec![Ok(lnrpc::Payment {
                status: lnrpc::payment::PaymentStatus::Failed as i32,
                failure_reason: lnrpc::PaymentFailureReason::FailureReasonNoRoute as i32,
                ..Default::default()
            })])
            .boxed())
        });
    let test = test_plane(test_settings(), client).await;
    let channel = seed_channel(&test, PEER_KEY, 778, 60_000, 40_000).await;
    let service = RebalanceService::new(test.plane.clone());

    let response = service
        .rebalance(request(test.node_id, channel.channel_id, 0), CancellationToken::new())
        .await;

    assert_eq!(response.status, ServiceStatus::Inactive);
    assert_eq!(response.error_class, Some(ErrorClass::UpstreamPermanent));
    assert_eq!(response.output.unwrap().status, RebalanceStatus::Failed);
}

#[tokio::test]
async fn test_concurrent_request_for_same_key_is_rejected() {
    let mut client = client_with_invoice();
    client
        .expect_send_payment()
        .times(1)
        .returning(|_| Ok(stream::pending::<crate::Result<lnrpc::Payment>>().boxed()));
    let test = test_plane(test_settings(), client).await;
    let channel = seed_channel(&test, PEER_KEY, 779, 60_000, 40_000).await;
    let service = Arc::new(RebalanceService::new(test.plane.clone()));
    let req = request(test.node_id, 0, channel.channel_id);
    let key = RebalanceKey::of(&req).unwrap();

    let token = CancellationToken::new();
    let first = {
        let service = service.clone();
        let req = req.clone();
        let token = token.clone();
        tokio::spawn(async move { service.rebalance(req, token).await })
    };
    while test.plane.rebalances.lookup(key).await.unwrap().is_none() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let second = service.rebalance(req.clone(), CancellationToken::new()).await;
    assert_eq!(second.error_class, Some(ErrorClass::RateLimited));

    token.cancel();
    let first = first.await.unwrap();
    assert_eq!(first.output.unwrap().status, RebalanceStatus::Cancelled);
    assert!(test.plane.rebalances.lookup(key).await.unwrap().is_none());
}

#[tokio::test]
async fn test_cancel_stops_in_flight_attempt() {
    let mut client = client_with_invoice();
    client
        .expect_send_payment()
        .times(1)
        .returning(|_| Ok(stream::pending::<crate::Result<lnrpc::Payment>>().boxed()));
    let test = test_plane(test_settings(), client).await;
    let channel = seed_channel(&test, PEER_KEY, 780, 60_000, 40_000).await;
    let service = Arc::new(RebalanceService::new(test.plane.clone()));
    let req = request(test.node_id, 0, channel.channel_id);
    let key = RebalanceKey::of(&req).unwrap();
    assert!(!service.cancel(&req).await.unwrap());

    let attempt = {
        let service = service.clone();
        let req = req.clone();
        tokio::spawn(async move { service.rebalance(req, CancellationToken::new()).await })
    };
    while test.plane.rebalances.lookup(key).await.unwrap().is_none() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert!(service.cancel(&req).await.unwrap());
    let response = attempt.await.unwrap();

    assert_eq!(response.output.unwrap().status, RebalanceStatus::Cancelled);
    assert!(test.plane.rebalances.lookup(key).await.unwrap().is_none());
}

#[tokio::test]
async fn test_invalid_requests_are_rejected_without_upstream_calls() {
    let test = test_plane(test_settings(), MockLightningClient::new()).await;
    let service = RebalanceService::new(test.plane.clone());

    let both = service.rebalance(request(test.node_id, 1, 2), CancellationToken::new()).await;
    assert_eq!(both.error_class, Some(ErrorClass::Validation));

    let no_node = service.rebalance(request(0, 1, 0), CancellationToken::new()).await;
    assert_eq!(no_node.error_class, Some(ErrorClass::Validation));

    let mut zero = request(test.node_id, 1, 0);
    zero.amount_msat = 0;
    let zero = service.rebalance(zero, CancellationToken::new()).await;
    assert_eq!(zero.error_class, Some(ErrorClass::Validation));
}

#[tokio::test]
async fn test_unknown_focus_channel_fails_and_releases_key() {
    let test = test_plane(test_settings(), MockLightningClient::new()).await;
    let service = RebalanceService::new(test.plane.clone());
    let req = request(test.node_id, 0, 99);

    let response = service.rebalance(req.clone(), CancellationToken::new()).await;

    assert_eq!(response.status, ServiceStatus::Inactive);
    assert_eq!(response.output.unwrap().status, RebalanceStatus::Failed);
    let key = RebalanceKey::of(&req).unwrap();
    assert!(test.plane.rebalances.lookup(key).await.unwrap().is_none());
}

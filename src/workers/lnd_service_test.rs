use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use super::*;
use crate::proto::lnrpc;
use crate::test_utils::test_plane;
use crate::test_utils::test_settings;
use crate::test_utils::TestPlane;
use crate::test_utils::LOCAL_KEY;
use crate::test_utils::PEER_KEY;
use crate::Error;
use crate::MockLightningClient;
use crate::ServiceScope;
use crate::ServiceStatus;
use crate::ServiceType;
use crate::UpstreamError;

fn ctx(test: &TestPlane) -> WorkerContext {
    WorkerContext::new(
        test.plane.clone(),
        test.node_id,
        ServiceType::LndService,
        test.token.child_token(),
    )
}

fn info(identity_pubkey: &str) -> lnrpc::GetInfoResponse {
    lnrpc::GetInfoResponse {
        identity_pubkey: identity_pubkey.to_string(),
        ..Default::default()
    }
}

fn empty_node(client: &mut MockLightningClient) {
    client.expect_list_channels().returning(|| Ok(vec![]));
    client.expect_pending_channels().returning(|| Ok(lnrpc::PendingChannelsResponse::default()));
    client.expect_closed_channels().returning(|| Ok(vec![]));
}

async fn wait_for(
    test: &TestPlane,
    status: ServiceStatus,
) {
    let services = test.plane.caches.services.clone();
    let scope = ServiceScope::Node(test.node_id);
    timeout(Duration::from_secs(5), async {
        loop {
            let view = services.get(scope, ServiceType::LndService).await.unwrap();
            if view.current == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_foreign_daemon_is_fatal() {
    let mut client = MockLightningClient::new();
    client.expect_get_info().returning(|| Ok(info(PEER_KEY)));
    let test = test_plane(test_settings(), client).await;

    let result = run_lnd_service(ctx(&test)).await;

    assert!(matches!(
        result,
        Err(Error::Upstream(UpstreamError::IdentityMismatch { ref actual, .. })) if actual == PEER_KEY
    ));
    assert!(test.plane.caches.nodes.local(true).await.unwrap().is_empty());
    assert!(!test.plane.caches.channel_states.is_ready(test.node_id).await.unwrap());
}

#[tokio::test]
async fn test_bootstrap_import_brings_node_online() {
    let mut client = MockLightningClient::new();
    client.expect_get_info().returning(|| Ok(info(LOCAL_KEY)));
    empty_node(&mut client);
    let test = test_plane(test_settings(), client).await;
    test.plane
        .caches
        .channel_states
        .set_node_status(test.node_id, ServiceStatus::Inactive)
        .await
        .unwrap();
    let ctx = ctx(&test);
    let token = ctx.token.clone();
    let worker = tokio::spawn(run_lnd_service(ctx));

    wait_for(&test, ServiceStatus::Active).await;
    assert!(test.plane.caches.channel_states.is_ready(test.node_id).await.unwrap());
    assert_eq!(test.plane.caches.nodes.local(true).await.unwrap().len(), 1);

    token.cancel();
    worker.await.unwrap().unwrap();
    assert!(!test.plane.caches.channel_states.is_ready(test.node_id).await.unwrap());
    assert!(test.plane.caches.nodes.local(true).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unreachable_daemon_is_retried() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let mut client = MockLightningClient::new();
    client.expect_get_info().returning(move || {
        if counter.fetch_add(1, Ordering::SeqCst) < 2 {
            Err(tonic::Status::unavailable("connection refused").into())
        } else {
            Ok(info(LOCAL_KEY))
        }
    });
    empty_node(&mut client);
    let test = test_plane(test_settings(), client).await;
    let ctx = ctx(&test);
    let token = ctx.token.clone();
    let worker = tokio::spawn(run_lnd_service(ctx));

    wait_for(&test, ServiceStatus::Active).await;
    assert!(calls.load(Ordering::SeqCst) >= 3);

    token.cancel();
    worker.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_lost_liveness_takes_node_offline() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let mut client = MockLightningClient::new();
    client.expect_get_info().returning(move || {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok(info(LOCAL_KEY))
        } else {
            Err(tonic::Status::unavailable("gone").into())
        }
    });
    empty_node(&mut client);
    let mut settings = test_settings();
    settings.workers.liveness_interval_in_secs = 1;
    let test = test_plane(settings, client).await;
    let ctx = ctx(&test);
    let token = ctx.token.clone();
    let worker = tokio::spawn(run_lnd_service(ctx));

    wait_for(&test, ServiceStatus::Active).await;
    wait_for(&test, ServiceStatus::Pending).await;
    assert!(!test.plane.caches.channel_states.is_ready(test.node_id).await.unwrap());

    token.cancel();
    worker.await.unwrap().unwrap();
}

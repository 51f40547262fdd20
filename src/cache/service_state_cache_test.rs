use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::*;
use crate::BusConfig;
use crate::EventBus;
use crate::EventKind;
use crate::EventPayload;
use crate::ServiceScope;
use crate::ServiceStatus;
use crate::ServiceType;

const SCOPE: ServiceScope = ServiceScope::Node(1);
const KIND: ServiceType = ServiceType::ForwardStream;

#[tokio::test]
async fn test_init_cancel_admits_a_single_owner() {
    let book = ServiceStateCache::spawn(16, None, CancellationToken::new());

    assert!(book.init_cancel(SCOPE, KIND, CancellationToken::new()).await.unwrap());
    assert!(!book.init_cancel(SCOPE, KIND, CancellationToken::new()).await.unwrap());
    assert_eq!(book.get(SCOPE, KIND).await.unwrap().current, ServiceStatus::Pending);

    book.set_current(SCOPE, KIND, ServiceStatus::Inactive, false).await.unwrap();
    assert!(book.init_cancel(SCOPE, KIND, CancellationToken::new()).await.unwrap());
}

#[tokio::test]
async fn test_cancel_fires_the_held_token() {
    let book = ServiceStateCache::spawn(16, None, CancellationToken::new());
    assert!(!book.cancel(SCOPE, KIND).await.unwrap());

    let token = CancellationToken::new();
    book.init_cancel(SCOPE, KIND, token.clone()).await.unwrap();
    assert!(book.cancel(SCOPE, KIND).await.unwrap());
    assert!(token.is_cancelled());
    assert!(book.get(SCOPE, KIND).await.unwrap().cancel_requested);
}

#[tokio::test]
async fn test_failures_are_counted_until_active() {
    let book = ServiceStateCache::spawn(16, None, CancellationToken::new());

    for _ in 0..3 {
        book.init_cancel(SCOPE, KIND, CancellationToken::new()).await.unwrap();
        book.set_current(SCOPE, KIND, ServiceStatus::Inactive, true).await.unwrap();
    }
    let view = book.get(SCOPE, KIND).await.unwrap();
    assert_eq!(view.consecutive_failures, 3);
    assert!(view.failure_time.is_some());

    book.init_cancel(SCOPE, KIND, CancellationToken::new()).await.unwrap();
    book.set_current(SCOPE, KIND, ServiceStatus::Active, false).await.unwrap();
    let view = book.get(SCOPE, KIND).await.unwrap();
    assert_eq!(view.consecutive_failures, 0);
    assert!(view.failure_time.is_none());
    assert!(view.active_since.is_some());
}

#[tokio::test]
async fn test_restart_after_failure_clears_failure_time() {
    let book = ServiceStateCache::spawn(16, None, CancellationToken::new());
    book.init_cancel(SCOPE, KIND, CancellationToken::new()).await.unwrap();
    book.set_current(SCOPE, KIND, ServiceStatus::Inactive, true).await.unwrap();
    assert!(book.get(SCOPE, KIND).await.unwrap().failure_time.is_some());

    assert!(book.init_cancel(SCOPE, KIND, CancellationToken::new()).await.unwrap());
    let view = book.get(SCOPE, KIND).await.unwrap();
    assert_eq!(view.current, ServiceStatus::Pending);
    assert!(view.failure_time.is_none());
    assert_eq!(view.consecutive_failures, 1);

    book.set_current(SCOPE, KIND, ServiceStatus::Initializing, false).await.unwrap();
    assert!(book.get(SCOPE, KIND).await.unwrap().failure_time.is_none());
}

#[tokio::test]
async fn test_unknown_service_reads_as_inactive_and_snapshot_lists_known() {
    let book = ServiceStateCache::spawn(16, None, CancellationToken::new());
    let view = book.get(ServiceScope::Process, ServiceType::Maintenance).await.unwrap();
    assert_eq!(view.current, ServiceStatus::Inactive);
    assert_eq!(view.desired, ServiceStatus::Inactive);
    assert!(book.snapshot().await.unwrap().is_empty());

    book.set_desired(SCOPE, KIND, ServiceStatus::Active).await.unwrap();
    let snapshot = book.snapshot().await.unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].desired, ServiceStatus::Active);
}

#[tokio::test]
async fn test_status_changes_are_published() {
    let bus = EventBus::spawn(
        &BusConfig {
            publish_buffer: 8,
            subscriber_buffer: 8,
        },
        CancellationToken::new(),
    );
    let mut sub = bus.subscribe("test", &[EventKind::Service]);
    let book = ServiceStateCache::spawn(16, Some(bus), CancellationToken::new());

    book.init_cancel(SCOPE, KIND, CancellationToken::new()).await.unwrap();
    let event = tokio::time::timeout(Duration::from_secs(1), sub.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.node_id, 1);
    match &event.payload {
        EventPayload::Service(e) => {
            assert_eq!(e.previous_status, ServiceStatus::Inactive);
            assert_eq!(e.status, ServiceStatus::Pending);
        }
        other => panic!("unexpected payload {other:?}"),
    }
}

use std::sync::Arc;

use super::*;
use crate::proto::lnrpc;
use crate::test_utils::test_plane;
use crate::test_utils::test_settings;
use crate::test_utils::TestPlane;
use crate::time_from_nanos;
use crate::ForwardRecord;
use crate::MockLightningClient;
use crate::ServiceType;

fn ctx(test: &TestPlane) -> WorkerContext {
    WorkerContext::new(
        test.plane.clone(),
        test.node_id,
        ServiceType::ForwardStream,
        test.token.child_token(),
    )
}

fn stored(
    node_id: u32,
    time_ns: u64,
) -> ForwardRecord {
    ForwardRecord {
        node_id,
        time: time_from_nanos(time_ns),
        time_ns,
        incoming_channel_id: 0,
        outgoing_channel_id: 0,
        fee_msat: 1,
        incoming_amount_msat: 1_001,
        outgoing_amount_msat: 1_000,
    }
}

/// Daemon holding forwards at the given timestamps, served by index offset.
fn history_client(timestamps: Vec<u64>) -> MockLightningClient {
    let timestamps = Arc::new(timestamps);
    let mut client = MockLightningClient::new();
    client.expect_forwarding_history().returning(move |req| {
        let start = req.index_offset as usize;
        let end = (start + req.num_max_events as usize).min(timestamps.len());
        let forwarding_events: Vec<_> = timestamps[start.min(end)..end]
            .iter()
            .map(|ts| lnrpc::ForwardingEvent {
                timestamp_ns: *ts,
                fee_msat: 2,
                amt_in_msat: 2_002,
                amt_out_msat: 2_000,
                ..Default::default()
            })
            .collect();
        Ok(lnrpc::ForwardingHistoryResponse {
            forwarding_events,
            last_offset_index: end as u32,
        })
    });
    client
}

#[tokio::test]
async fn test_forwards_are_paged_past_the_stored_cursor() {
    let client = history_client(vec![100, 200, 300, 400, 500]);
    let test = test_plane(test_settings(), client).await;
    let store = &test.plane.store;
    let existing: Vec<_> = [100, 200, 300].iter().map(|ts| stored(test.node_id, *ts)).collect();
    assert_eq!(store.add_forwards(&existing).unwrap(), 3);
    let ctx = ctx(&test);
    let mut poller = ForwardsPoller::new(1);

    poller.poll(&ctx).await.unwrap();

    let forwards = store.forwards(test.node_id).unwrap();
    let times: Vec<_> = forwards.iter().map(|f| f.time_ns).collect();
    assert_eq!(times, vec![100, 200, 300, 400, 500]);
    assert_eq!(poller.cursor(), Some(500));
}

#[tokio::test]
async fn test_repeated_polls_store_nothing_twice() {
    let client = history_client(vec![400, 500]);
    let test = test_plane(test_settings(), client).await;
    let ctx = ctx(&test);
    let mut poller = ForwardsPoller::new(10);

    poller.poll(&ctx).await.unwrap();
    poller.poll(&ctx).await.unwrap();
    poller.poll(&ctx).await.unwrap();

    assert_eq!(test.plane.store.forwards(test.node_id).unwrap().len(), 2);
    assert_eq!(poller.cursor(), Some(500));
}

#[tokio::test]
async fn test_empty_history_keeps_cursor_at_zero() {
    let test = test_plane(test_settings(), history_client(vec![])).await;
    let ctx = ctx(&test);
    let mut poller = ForwardsPoller::new(10);

    poller.poll(&ctx).await.unwrap();

    assert_eq!(poller.cursor(), Some(0));
    assert!(test.plane.store.forwards(test.node_id).unwrap().is_empty());
}

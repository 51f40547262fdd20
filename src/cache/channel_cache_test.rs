use chrono::Utc;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::Channel;
use crate::ChannelPoint;
use crate::ChannelStatus;

fn channel(
    channel_id: u32,
    output_index: u32,
    short: Option<u64>,
) -> Channel {
    Channel {
        channel_id,
        channel_point: ChannelPoint::new("ef".repeat(32), output_index),
        short_channel_id: None,
        lnd_short_channel_id: short,
        first_node_id: 1,
        second_node_id: 10 + channel_id,
        status: ChannelStatus::Opening,
        capacity_sat: 1_000_000,
        closing_transaction_hash: None,
        funding_block_height: None,
        funded_on: None,
        closing_block_height: None,
        closed_on: None,
        created_on: Utc::now(),
        updated_on: Utc::now(),
    }
}

#[tokio::test]
async fn test_short_id_learned_after_confirmation_is_indexed() {
    let cache = ChannelCache::spawn(16, CancellationToken::new());
    cache.add(channel(1, 0, None)).await.unwrap();
    assert_eq!(cache.by_lnd_short_channel_id(1337).await.unwrap(), None);

    let mut open = channel(1, 0, Some(1337));
    open.status = ChannelStatus::Open;
    cache.add(open).await.unwrap();

    assert_eq!(cache.by_lnd_short_channel_id(1337).await.unwrap(), Some(1));
    assert_eq!(
        cache.by_channel_point(&ChannelPoint::new("ef".repeat(32), 0)).await.unwrap(),
        Some(1)
    );
    assert_eq!(cache.get(1).await.unwrap().unwrap().status, ChannelStatus::Open);
}

#[tokio::test]
async fn test_for_node_filters_by_either_endpoint() {
    let cache = ChannelCache::spawn(16, CancellationToken::new());
    cache.add(channel(1, 0, Some(1))).await.unwrap();
    cache.add(channel(2, 1, Some(2))).await.unwrap();

    assert_eq!(cache.for_node(1).await.unwrap().len(), 2);
    assert_eq!(cache.for_node(12).await.unwrap().len(), 1);
    assert!(cache.for_node(99).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_status_change_replaces_row_and_keeps_identity() {
    let cache = ChannelCache::spawn(16, CancellationToken::new());
    cache.add(channel(4, 2, Some(44))).await.unwrap();

    let mut closing = channel(4, 2, Some(44));
    closing.status = ChannelStatus::ClosingLocalForce;
    cache.add(closing).await.unwrap();

    let stored = cache.get(4).await.unwrap().unwrap();
    assert_eq!(stored.status, ChannelStatus::ClosingLocalForce);
    assert_eq!(stored.lnd_short_channel_id, Some(44));
}

use tokio_util::sync::CancellationToken;

use super::*;
use crate::TagAssignment;
use crate::TagTarget;

fn tag(
    tag_id: u32,
    target: TagTarget,
) -> TagAssignment {
    TagAssignment { tag_id, target }
}

#[tokio::test]
async fn test_tags_are_looked_up_per_target() {
    let cache = TagCache::spawn(16, CancellationToken::new());
    cache
        .initialize(vec![
            tag(1, TagTarget::Channel(10)),
            tag(2, TagTarget::Node(7)),
            tag(1, TagTarget::Node(7)),
            tag(3, TagTarget::Node(8)),
        ])
        .await
        .unwrap();

    assert_eq!(cache.for_node(7).await.unwrap(), vec![1, 2]);
    assert_eq!(cache.for_channel(10).await.unwrap(), vec![1]);
    assert_eq!(cache.for_node(8).await.unwrap(), vec![3]);
    assert!(cache.for_channel(11).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_initialize_replaces_and_remove_clears() {
    let cache = TagCache::spawn(16, CancellationToken::new());
    cache.add(tag(4, TagTarget::Node(1))).await.unwrap();
    cache.initialize(vec![tag(5, TagTarget::Node(2))]).await.unwrap();
    assert!(cache.for_node(1).await.unwrap().is_empty());

    cache.remove(tag(5, TagTarget::Node(2))).await.unwrap();
    assert!(cache.for_node(2).await.unwrap().is_empty());
}

use tokio_util::sync::CancellationToken;

use super::*;

#[tokio::test]
async fn test_set_alias_is_read_back_and_unknown_is_none() {
    let cache = NodeAliasCache::spawn(16, CancellationToken::new());
    cache.set(7, "alice".to_string()).await.unwrap();

    assert_eq!(cache.get(7).await.unwrap(), Some("alice".to_string()));
    assert_eq!(cache.get(8).await.unwrap(), None);
}

#[tokio::test]
async fn test_new_announcement_overwrites_alias() {
    let cache = NodeAliasCache::spawn(16, CancellationToken::new());
    cache.set(7, "alice".to_string()).await.unwrap();
    cache.set(7, "alice-v2".to_string()).await.unwrap();

    assert_eq!(cache.get(7).await.unwrap(), Some("alice-v2".to_string()));
    assert_eq!(cache.all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_empty_alias_clears_entry() {
    let cache = NodeAliasCache::spawn(16, CancellationToken::new());
    cache.set(7, "alice".to_string()).await.unwrap();
    cache.set(9, "carol".to_string()).await.unwrap();

    cache.set(7, String::new()).await.unwrap();

    let all = cache.all().await.unwrap();
    assert_eq!(all.get(&7), None);
    assert_eq!(all.get(&9).map(String::as_str), Some("carol"));
}

#[tokio::test]
async fn test_stopped_cache_reports_actor_gone() {
    let token = CancellationToken::new();
    let cache = NodeAliasCache::spawn(16, token.clone());
    token.cancel();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    assert!(cache.get(7).await.is_err());
}

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::advance;
use upstream_resilience_cache::{CacheEvent, ResultCache};

async fn fetch_counted(cache: &ResultCache, calls: &AtomicUsize, ttl: Option<Duration>) -> Option<u64> {
    cache
        .get_or_set("market:10000002", ttl, || async {
            Some(calls.fetch_add(1, Ordering::SeqCst) as u64)
        })
        .await
}

#[tokio::test(start_paused = true)]
async fn second_call_within_ttl_reuses_value() {
    let cache = ResultCache::builder().build();
    let calls = AtomicUsize::new(0);
    let ttl = Some(Duration::from_secs(60));

    assert_eq!(fetch_counted(&cache, &calls, ttl).await, Some(0));
    advance(Duration::from_secs(59)).await;
    assert_eq!(fetch_counted(&cache, &calls, ttl).await, Some(0));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    advance(Duration::from_secs(1)).await;
    assert_eq!(fetch_counted(&cache, &calls, ttl).await, Some(1));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn default_ttl_applies_without_per_call_ttl() {
    let cache = ResultCache::builder().default_ttl(Duration::from_secs(5)).build();
    let calls = AtomicUsize::new(0);

    fetch_counted(&cache, &calls, None).await;
    advance(Duration::from_secs(4)).await;
    fetch_counted(&cache, &calls, None).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    advance(Duration::from_secs(1)).await;
    fetch_counted(&cache, &calls, None).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn expired_entries_are_evicted_lazily_on_read() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let cache = ResultCache::builder()
        .name("lazy")
        .on_event(move |event: &CacheEvent| {
            if matches!(event, CacheEvent::Expired { .. }) {
                sink.lock().unwrap().push(event.key().to_string());
            }
        })
        .build();

    assert!(cache.insert("a", &1u8, Some(Duration::from_secs(1))));
    assert!(cache.insert("b", &2u8, Some(Duration::from_secs(10))));
    advance(Duration::from_secs(2)).await;

    // Nothing is swept in the background.
    assert_eq!(cache.len(), 2);

    assert_eq!(cache.get::<u8>("a"), None);
    assert_eq!(cache.get::<u8>("b"), Some(2));
    assert_eq!(cache.len(), 1);
    assert_eq!(*events.lock().unwrap(), vec!["a".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn overwrite_resets_expiry() {
    let cache = ResultCache::builder().build();
    cache.insert("k", &"old", Some(Duration::from_secs(1)));
    advance(Duration::from_millis(900)).await;
    cache.insert("k", &"new", Some(Duration::from_secs(1)));
    advance(Duration::from_millis(900)).await;

    assert_eq!(cache.get::<String>("k").as_deref(), Some("new"));
}

#[tokio::test]
async fn remove_and_clear() {
    let cache = ResultCache::builder().build();
    cache.insert("a", &1u8, None);
    cache.insert("b", &2u8, None);

    assert!(cache.remove("a"));
    assert!(!cache.remove("a"));
    assert_eq!(cache.len(), 1);

    cache.clear();
    assert!(cache.is_empty());
    assert_eq!(cache.get::<u8>("b"), None);
}

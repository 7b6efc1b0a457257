use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use upstream_resilience_cache::ResultCache;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Blueprint {
    type_id: u32,
    materials: Vec<(u32, u64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Route {
    systems: Vec<u32>,
}

#[tokio::test]
async fn one_cache_holds_several_payload_types() {
    let cache = ResultCache::builder().build();

    let blueprint = cache
        .get_or_set("bp:691", None, || async {
            Some(Blueprint {
                type_id: 691,
                materials: vec![(34, 22_222), (35, 8_000)],
            })
        })
        .await;
    let route = cache
        .get_or_set("route:30000142:30002187", None, || async {
            Some(Route {
                systems: vec![30000142, 30000144, 30002187],
            })
        })
        .await;

    assert_eq!(cache.get::<Blueprint>("bp:691"), blueprint);
    assert_eq!(cache.get::<Route>("route:30000142:30002187"), route);
    assert_eq!(cache.len(), 2);
}

#[tokio::test]
async fn reading_as_wrong_type_refetches() {
    let evicted = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&evicted);
    let cache = ResultCache::builder()
        .on_eviction(move |key| sink.lock().unwrap().push(key.to_string()))
        .build();

    cache.insert("shared", &Route { systems: vec![1, 2] }, None);

    let calls = AtomicUsize::new(0);
    let blueprint = cache
        .get_or_set("shared", None, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Some(Blueprint {
                type_id: 1,
                materials: Vec::new(),
            })
        })
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(blueprint.map(|b| b.type_id), Some(1));
    assert_eq!(*evicted.lock().unwrap(), vec!["shared".to_string()]);
    assert!(cache.get::<Blueprint>("shared").is_some());
}

#[tokio::test]
async fn errors_are_returned_and_not_cached() {
    let cache = ResultCache::builder().build();
    let calls = AtomicUsize::new(0);

    for _ in 0..3 {
        let result: Result<u32, String> = cache
            .try_get_or_set("flaky", Some(Duration::from_secs(60)), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("upstream returned 502".to_string())
            })
            .await;
        assert_eq!(result, Err("upstream returned 502".to_string()));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(cache.is_empty());

    let ok: Result<u32, String> = cache.try_get_or_set("flaky", None, || async { Ok(7) }).await;
    assert_eq!(ok, Ok(7));
    let cached: Result<u32, String> = cache
        .try_get_or_set("flaky", None, || async { Err("not called".to_string()) })
        .await;
    assert_eq!(cached, Ok(7));
}

#[tokio::test]
async fn hit_and_miss_hooks() {
    let hits = Arc::new(AtomicUsize::new(0));
    let misses = Arc::new(AtomicUsize::new(0));
    let (h, m) = (Arc::clone(&hits), Arc::clone(&misses));
    let cache = ResultCache::builder()
        .on_hit(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        })
        .on_miss(move |_| {
            m.fetch_add(1, Ordering::SeqCst);
        })
        .build();

    for _ in 0..4 {
        cache.get_or_set("k", None, || async { Some(1u8) }).await;
    }
    assert_eq!(misses.load(Ordering::SeqCst), 1);
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

use super::helpers::*;
use serial_test::serial;
use upstream_resilience_cache::ResultCache;

#[tokio::test]
#[serial]
async fn result_cache_metrics_exist() {
    init_recorder();

    let cache = ResultCache::builder().name("metrics_cache").max_entries(2).build();
    for key in ["a", "b", "c"] {
        cache.insert(key, &key.len(), None);
    }
    let _: Option<usize> = cache.get("c");
    let _: Option<usize> = cache.get("a");

    assert_counter_exists("result_cache_requests_total");
    assert_metric_has_label("result_cache_requests_total", "cache", "metrics_cache");
    assert_metric_has_label("result_cache_requests_total", "result", "hit");
    assert_metric_has_label("result_cache_requests_total", "result", "miss");

    assert_counter_exists("result_cache_evictions_total");
    assert_gauge_exists("result_cache_size");
}

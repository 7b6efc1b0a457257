use super::helpers::*;
use serial_test::serial;
use std::time::Duration;
use upstream_resilience_admission::AdmissionLimiter;

#[tokio::test]
#[serial]
async fn admission_metrics_exist() {
    init_recorder();

    let limiter = AdmissionLimiter::builder()
        .name("metrics_limiter")
        .tier("short", 2, Duration::from_secs(1))
        .build();

    limiter.acquire().await.unwrap().release();
    let leaked = limiter.acquire().await.unwrap();
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(limiter.reclaim_now(), 1);
    drop(leaked);

    assert_counter_exists("admission_permits_total");
    assert_metric_has_label("admission_permits_total", "limiter", "metrics_limiter");

    assert_histogram_exists("admission_wait_seconds");

    assert_counter_exists("admission_reclaimed_total");
    assert_metric_has_label("admission_reclaimed_total", "tier", "short");

    assert_gauge_exists("admission_outstanding_grants");
    assert_metric_has_label("admission_outstanding_grants", "limiter", "metrics_limiter");
}

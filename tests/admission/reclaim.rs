use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::advance;
use upstream_resilience_admission::{AdmissionLimiter, Tier};

fn recorded() -> (Arc<Mutex<Vec<(String, usize)>>>, impl Fn(&str, usize) + Send + Sync + 'static) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    (log, move |tier: &str, count: usize| sink.lock().unwrap().push((tier.to_string(), count)))
}

#[tokio::test(start_paused = true)]
async fn reclaim_restores_capacity_of_long_running_calls() {
    let (log, on_reclaimed) = recorded();
    let limiter = AdmissionLimiter::builder()
        .tier("short", 2, Duration::from_secs(1))
        .tier("medium", 4, Duration::from_secs(60))
        .on_grants_reclaimed(on_reclaimed)
        .build();

    let stuck = vec![limiter.acquire().await.unwrap(), limiter.acquire().await.unwrap()];

    advance(Duration::from_millis(999)).await;
    assert_eq!(limiter.reclaim_now(), 0, "grants are not a window old yet");

    advance(Duration::from_millis(1)).await;
    assert_eq!(limiter.reclaim_now(), 2);
    assert_eq!(limiter.snapshot()[0].available, 2);
    assert_eq!(limiter.snapshot()[1].available, 2);
    assert_eq!(*log.lock().unwrap(), vec![("short".to_string(), 2)]);

    advance(Duration::from_secs(59)).await;
    assert_eq!(limiter.reclaim_now(), 2);
    assert_eq!(limiter.snapshot()[1].available, 4);

    // Releasing after both tiers reclaimed returns nothing more.
    drop(stuck);
    let snapshot = limiter.snapshot();
    assert_eq!(snapshot[0].available, 2);
    assert_eq!(snapshot[1].available, 4);
}

#[tokio::test(start_paused = true)]
async fn non_reclaiming_tier_is_left_alone() {
    let limiter = AdmissionLimiter::builder()
        .add_tier(Tier::new("short", 1, Duration::from_secs(1)).without_reclaim())
        .build();

    let permit = limiter.acquire().await.unwrap();
    advance(Duration::from_secs(10)).await;
    assert_eq!(limiter.reclaim_now(), 0);
    assert_eq!(limiter.snapshot()[0].available, 0);

    permit.release();
    assert_eq!(limiter.snapshot()[0].available, 1);
}

#[tokio::test(start_paused = true)]
async fn background_reclaimer_runs_on_its_interval() {
    let (log, on_reclaimed) = recorded();
    let limiter = AdmissionLimiter::builder()
        .tier("short", 3, Duration::from_secs(1))
        .reclaim_interval(Duration::from_millis(500))
        .on_grants_reclaimed(on_reclaimed)
        .build();
    limiter.start_reclaimer();

    let _held: Vec<_> = futures::future::join_all((0..3).map(|_| limiter.acquire()))
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();
    assert_eq!(limiter.snapshot()[0].available, 0);

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert_eq!(limiter.snapshot()[0].available, 3);
    assert_eq!(*log.lock().unwrap(), vec![("short".to_string(), 3)]);

    limiter.shutdown();
}

/// Releases and reclaims racing on many permits never push a tier above
/// its capacity.
#[tokio::test(start_paused = true)]
async fn racing_release_and_reclaim_never_over_release() {
    let limiter = AdmissionLimiter::builder()
        .tier("short", 8, Duration::from_millis(100))
        .tier("medium", 16, Duration::from_millis(400))
        .build();

    for round in 0..20u64 {
        let mut permits = Vec::new();
        for _ in 0..8 {
            permits.push(limiter.acquire().await.unwrap());
        }
        advance(Duration::from_millis(50 + (round % 3) * 40)).await;

        // Release half before the scan and half after.
        let late = permits.split_off(4);
        drop(permits);
        limiter.reclaim_now();
        drop(late);

        for tier in limiter.snapshot() {
            assert!(tier.available <= tier.capacity, "{tier:?}");
            assert!(tier.available + tier.outstanding <= tier.capacity, "{tier:?}");
        }
    }

    advance(Duration::from_secs(1)).await;
    limiter.reclaim_now();
    for tier in limiter.snapshot() {
        assert_eq!(tier.available, tier.capacity);
        assert_eq!(tier.outstanding, 0);
    }
}

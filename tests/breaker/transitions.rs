use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::advance;
use upstream_resilience_circuitbreaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};

type Transitions = Arc<Mutex<Vec<(CircuitState, CircuitState)>>>;

fn breaker(threshold: u32, recovery: Duration) -> (CircuitBreaker, Transitions) {
    let transitions: Transitions = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&transitions);
    let breaker = CircuitBreaker::new(
        CircuitBreakerConfig::builder()
            .name("backend")
            .failure_threshold(threshold)
            .recovery_timeout(recovery)
            .on_state_transition(move |from, to| sink.lock().unwrap().push((from, to)))
            .build(),
    );
    (breaker, transitions)
}

async fn fail(breaker: &CircuitBreaker) -> Result<(), CircuitBreakerError<&'static str>> {
    breaker.call(|| async { Err("backend exploded") }).await
}

async fn succeed(breaker: &CircuitBreaker) -> Result<(), CircuitBreakerError<&'static str>> {
    breaker.call(|| async { Ok(()) }).await
}

/// Threshold 3, recovery 30 s: three failures open it, a call at t+31 s is
/// the probe, and a successful probe closes it with the count cleared.
#[tokio::test(start_paused = true)]
async fn threshold_recovery_and_probe() {
    let (breaker, transitions) = breaker(3, Duration::from_secs(30));

    for _ in 0..2 {
        assert_eq!(fail(&breaker).await, Err(CircuitBreakerError::Inner("backend exploded")));
    }
    assert_eq!(breaker.state_sync(), CircuitState::Closed);
    assert_eq!(breaker.snapshot().consecutive_failures, 2);

    assert!(fail(&breaker).await.is_err());
    assert_eq!(breaker.state_sync(), CircuitState::Open);
    let opened = breaker.snapshot();
    assert!(opened.last_failure_time.is_some());

    for _ in 0..5 {
        advance(Duration::from_secs(5)).await;
        assert!(succeed(&breaker).await.unwrap_err().is_circuit_open());
    }

    advance(Duration::from_secs(6)).await;
    let permit = breaker.try_acquire().expect("probe admitted at t+31s");
    assert!(permit.is_probe());
    assert_eq!(breaker.state_sync(), CircuitState::HalfOpen);
    permit.record(false);

    let closed = breaker.snapshot();
    assert_eq!(closed.state, CircuitState::Closed);
    assert_eq!(closed.consecutive_failures, 0);
    assert_eq!(
        *transitions.lock().unwrap(),
        vec![
            (CircuitState::Closed, CircuitState::Open),
            (CircuitState::Open, CircuitState::HalfOpen),
            (CircuitState::HalfOpen, CircuitState::Closed),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn success_resets_consecutive_count() {
    let (breaker, _) = breaker(3, Duration::from_secs(30));

    for _ in 0..10 {
        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        succeed(&breaker).await.unwrap();
    }
    assert_eq!(breaker.state_sync(), CircuitState::Closed);
    assert_eq!(breaker.snapshot().consecutive_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn failed_probe_restarts_the_recovery_timer() {
    let (breaker, transitions) = breaker(1, Duration::from_secs(30));
    let _ = fail(&breaker).await;

    advance(Duration::from_secs(30)).await;
    assert!(fail(&breaker).await.is_err());
    assert_eq!(breaker.state_sync(), CircuitState::Open);
    let reopened_at = breaker.snapshot().last_state_change_time;

    advance(Duration::from_secs(29)).await;
    assert!(succeed(&breaker).await.unwrap_err().is_circuit_open());
    advance(Duration::from_secs(1)).await;
    assert!(succeed(&breaker).await.is_ok());

    assert_eq!(reopened_at, tokio::time::Instant::now() - Duration::from_secs(30));
    assert_eq!(transitions.lock().unwrap().len(), 5);
}

#[tokio::test(start_paused = true)]
async fn totals_count_every_presented_call() {
    let (breaker, _) = breaker(2, Duration::from_secs(30));

    succeed(&breaker).await.unwrap();
    let _ = fail(&breaker).await;
    let _ = fail(&breaker).await;
    for _ in 0..3 {
        let _ = succeed(&breaker).await;
    }

    let snapshot = breaker.snapshot();
    assert_eq!(snapshot.total_requests, 6, "deflected calls are counted too");
    assert_eq!(snapshot.total_successes, 1);
    assert_eq!(snapshot.name, "backend");
}

#[tokio::test(start_paused = true)]
async fn monitor_window_forgets_old_failures() {
    let breaker = CircuitBreaker::new(
        CircuitBreakerConfig::builder()
            .failure_threshold(3)
            .monitor_window(Duration::from_secs(60))
            .build(),
    );

    for _ in 0..5 {
        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        advance(Duration::from_secs(61)).await;
    }
    assert_eq!(breaker.state_sync(), CircuitState::Closed);
    assert_eq!(breaker.snapshot().consecutive_failures, 2);

    let _ = fail(&breaker).await;
    let _ = fail(&breaker).await;
    assert_eq!(breaker.snapshot().consecutive_failures, 2, "window restarted at the first of these");
    let _ = fail(&breaker).await;
    assert!(breaker.is_open());
}

#[tokio::test(start_paused = true)]
async fn outcomes_from_before_a_transition_are_stale() {
    let (breaker, _) = breaker(1, Duration::from_secs(30));

    let slow_caller = breaker.try_acquire().expect("closed");
    let _ = fail(&breaker).await;
    assert!(breaker.is_open());

    // The earlier call succeeding now does not close the breaker.
    slow_caller.record(false);
    let snapshot = breaker.snapshot();
    assert_eq!(snapshot.state, CircuitState::Open);
    assert_eq!(snapshot.total_successes, 1);
    assert_eq!(snapshot.consecutive_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn stale_failures_do_not_move_the_monitor_window() {
    let breaker = CircuitBreaker::new(
        CircuitBreakerConfig::builder()
            .failure_threshold(2)
            .recovery_timeout(Duration::from_secs(30))
            .monitor_window(Duration::from_secs(60))
            .build(),
    );

    let slow_caller = breaker.try_acquire().expect("closed");
    let _ = fail(&breaker).await;
    let _ = fail(&breaker).await;
    assert!(breaker.is_open());
    advance(Duration::from_secs(30)).await;
    succeed(&breaker).await.unwrap();
    assert_eq!(breaker.state_sync(), CircuitState::Closed);

    advance(Duration::from_secs(50)).await;
    let _ = fail(&breaker).await;
    let counted_at = tokio::time::Instant::now();
    assert_eq!(breaker.snapshot().consecutive_failures, 1);

    advance(Duration::from_secs(50)).await;
    slow_caller.record(true);
    assert_eq!(breaker.snapshot().last_failure_time, Some(counted_at));

    // 70 s after the last counted failure: the window starts over.
    advance(Duration::from_secs(20)).await;
    let _ = fail(&breaker).await;
    let snapshot = breaker.snapshot();
    assert_eq!(snapshot.state, CircuitState::Closed);
    assert_eq!(snapshot.consecutive_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn health_helpers_follow_state() {
    let (breaker, _) = breaker(1, Duration::from_secs(10));
    assert_eq!((breaker.http_status(), breaker.health_status()), (200, "healthy"));

    let _ = fail(&breaker).await;
    assert_eq!((breaker.http_status(), breaker.health_status()), (503, "unhealthy"));

    advance(Duration::from_secs(10)).await;
    let probe = breaker.try_acquire().unwrap();
    assert_eq!((breaker.http_status(), breaker.health_status()), (200, "degraded"));
    probe.record(false);
    assert_eq!(breaker.health_status(), "healthy");
}

#[test]
fn presets() {
    let standard = CircuitBreakerConfig::standard().build();
    assert_eq!(standard.failure_threshold(), 5);
    assert_eq!(standard.recovery_timeout(), Duration::from_secs(30));

    let fast = CircuitBreakerConfig::fast_fail().build();
    assert_eq!(fast.failure_threshold(), 3);
    assert_eq!(fast.expected_latency(), Some(Duration::from_secs(2)));

    let tolerant = CircuitBreakerConfig::tolerant().name("reports").build();
    assert_eq!(tolerant.failure_threshold(), 10);
    assert_eq!(tolerant.monitor_window(), Some(Duration::from_secs(60)));
    assert_eq!(tolerant.name(), "reports");
}

#[test]
#[should_panic(expected = "failure_threshold must be at least 1")]
fn zero_threshold_is_rejected() {
    CircuitBreakerConfig::builder().failure_threshold(0).build();
}

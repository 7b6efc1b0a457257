use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{advance, sleep};
use upstream_resilience_circuitbreaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerEvent, CircuitState};
use upstream_resilience_core::Event;

fn opened_breaker(events: Arc<Mutex<Vec<&'static str>>>) -> CircuitBreaker {
    let breaker = CircuitBreaker::new(
        CircuitBreakerConfig::builder()
            .name("search")
            .failure_threshold(1)
            .recovery_timeout(Duration::from_secs(5))
            .on_event(move |event: &CircuitBreakerEvent| events.lock().unwrap().push(event.kind()))
            .build(),
    );
    breaker.try_acquire().unwrap().record(true);
    assert!(breaker.is_open());
    breaker
}

#[tokio::test(start_paused = true)]
async fn concurrent_callers_admit_exactly_one_probe() {
    let breaker = opened_breaker(Arc::default());
    advance(Duration::from_secs(5)).await;

    let ran = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();
    for _ in 0..50 {
        let breaker = breaker.clone();
        let ran = Arc::clone(&ran);
        handles.push(tokio::spawn(async move {
            breaker
                .call(|| async move {
                    ran.fetch_add(1, Ordering::SeqCst);
                    sleep(Duration::from_millis(200)).await;
                    Ok::<_, &str>(())
                })
                .await
        }));
    }

    let mut deflected = 0;
    for handle in handles {
        if handle.await.unwrap().is_err() {
            deflected += 1;
        }
    }

    assert_eq!(ran.load(Ordering::SeqCst), 1);
    assert_eq!(deflected, 49);
    assert_eq!(breaker.state_sync(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn dropped_probe_frees_the_slot() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let breaker = opened_breaker(Arc::clone(&events));
    advance(Duration::from_secs(5)).await;

    let probe = breaker.try_acquire().expect("probe");
    assert!(breaker.try_acquire().is_none(), "slot taken");
    drop(probe);

    assert_eq!(breaker.state_sync(), CircuitState::HalfOpen, "no outcome recorded");
    assert!(events.lock().unwrap().contains(&"probe_abandoned"));

    let second = breaker.try_acquire().expect("slot free again");
    assert!(second.is_probe());
    second.record(true);
    assert!(breaker.is_open());
}

#[tokio::test(start_paused = true)]
async fn cancelled_probe_future_frees_the_slot() {
    let breaker = opened_breaker(Arc::default());
    advance(Duration::from_secs(5)).await;

    let hung = tokio::time::timeout(
        Duration::from_secs(1),
        breaker.call(|| async {
            sleep(Duration::from_secs(3600)).await;
            Ok::<_, &str>(())
        }),
    )
    .await;
    assert!(hung.is_err());

    assert_eq!(breaker.call(|| async { Ok::<_, &str>(()) }).await, Ok(()));
    assert_eq!(breaker.state_sync(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn fallback_answers_while_open() {
    let breaker = opened_breaker(Arc::default());
    let backend_calls = AtomicUsize::new(0);

    let answer = breaker
        .call_with_fallback(
            || async {
                backend_calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>("live")
            },
            || async { Ok("stale") },
        )
        .await;
    assert_eq!(answer, Ok("stale"));

    advance(Duration::from_secs(5)).await;
    let answer = breaker
        .call_with_fallback(
            || async {
                backend_calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>("live")
            },
            || async { Ok("stale") },
        )
        .await;
    assert_eq!(answer, Ok("live"));
    assert_eq!(backend_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn slow_probe_reopens() {
    let slow = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&slow);
    let breaker = CircuitBreaker::new(
        CircuitBreakerConfig::builder()
            .failure_threshold(1)
            .recovery_timeout(Duration::from_secs(5))
            .expected_latency(Duration::from_millis(100))
            .on_slow_call(move |took| sink.lock().unwrap().push(took))
            .build(),
    );
    let _ = breaker.call(|| async { Err::<(), _>("down") }).await;

    advance(Duration::from_secs(5)).await;
    let result = breaker
        .call(|| async {
            sleep(Duration::from_millis(300)).await;
            Ok::<_, &str>("eventually")
        })
        .await;

    assert_eq!(result, Ok("eventually"));
    assert!(breaker.is_open());
    assert_eq!(*slow.lock().unwrap(), vec![Duration::from_millis(300)]);
}

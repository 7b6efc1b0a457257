use std::sync::{Arc, Mutex};
use std::time::Duration;
use upstream_resilience_circuitbreaker::{BreakerRegistry, CircuitBreakerConfig, CircuitBreakerEvent, CircuitState};

#[tokio::test]
async fn lookups_of_one_name_share_state() {
    let registry = BreakerRegistry::new(CircuitBreakerConfig::builder().failure_threshold(2).build());

    let from_handler = registry.get_or_create("market");
    let from_worker = registry.get_or_create("market");
    let _ = from_handler.call(|| async { Err::<(), _>("timeout") }).await;
    let _ = from_worker.call(|| async { Err::<(), _>("timeout") }).await;

    assert!(from_handler.is_open());
    assert_eq!(from_worker.snapshot().consecutive_failures, 2);
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn names_get_their_own_state_and_config() {
    let registry = BreakerRegistry::builder()
        .defaults(CircuitBreakerConfig::standard().build())
        .override_for("search", CircuitBreakerConfig::fast_fail().build())
        .build();

    let search = registry.get_or_create("search");
    let market = registry.get_or_create("market");
    assert_eq!(search.config().failure_threshold(), 3);
    assert_eq!(search.config().expected_latency(), Some(Duration::from_secs(2)));
    assert_eq!(market.config().failure_threshold(), 5);
    assert_eq!(search.name(), "search");
    assert_eq!(market.name(), "market");

    for _ in 0..3 {
        let _ = search.call(|| async { Err::<(), _>("down") }).await;
    }
    assert!(search.is_open());
    assert!(!market.is_open());

    let states: Vec<(String, CircuitState)> = registry
        .snapshots()
        .into_iter()
        .map(|snapshot| (snapshot.name, snapshot.state))
        .collect();
    assert_eq!(
        states,
        vec![
            ("market".to_string(), CircuitState::Closed),
            ("search".to_string(), CircuitState::Open),
        ]
    );
}

#[tokio::test]
async fn get_does_not_create() {
    let registry = BreakerRegistry::default();
    assert!(registry.is_empty());
    assert!(registry.get("wallet").is_none());

    registry.get_or_create("wallet");
    assert!(registry.get("wallet").is_some());
    assert_eq!(registry.names(), vec!["wallet".to_string()]);
}

#[tokio::test]
async fn registry_listeners_see_every_breaker() {
    let transitions = Arc::new(Mutex::new(Vec::new()));
    let rejections = Arc::new(Mutex::new(0usize));
    let transition_sink = Arc::clone(&transitions);
    let rejection_sink = Arc::clone(&rejections);

    let registry = BreakerRegistry::builder()
        .defaults(CircuitBreakerConfig::builder().failure_threshold(1).build())
        .on_state_transition(move |name, from, to| {
            transition_sink.lock().unwrap().push((name.to_string(), from, to));
        })
        .on_event(move |event: &CircuitBreakerEvent| {
            if matches!(event, CircuitBreakerEvent::CallRejected { .. }) {
                *rejection_sink.lock().unwrap() += 1;
            }
        })
        .build();

    for name in ["a", "b"] {
        let breaker = registry.get_or_create(name);
        let _ = breaker.call(|| async { Err::<(), _>("down") }).await;
        let _ = breaker.call(|| async { Ok::<_, &str>(()) }).await;
    }

    assert_eq!(
        *transitions.lock().unwrap(),
        vec![
            ("a".to_string(), CircuitState::Closed, CircuitState::Open),
            ("b".to_string(), CircuitState::Closed, CircuitState::Open),
        ]
    );
    assert_eq!(*rejections.lock().unwrap(), 2);
}

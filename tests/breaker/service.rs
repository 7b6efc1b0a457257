use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::{service_fn, Layer, ServiceBuilder, ServiceExt};
use upstream_resilience_circuitbreaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerLayer};

#[derive(Debug, Clone, PartialEq)]
enum BackendError {
    Unreachable,
    NotFound,
}

#[tokio::test(start_paused = true)]
async fn layer_deflects_without_reaching_the_backend() {
    let healthy = Arc::new(AtomicBool::new(false));
    let reached = Arc::new(AtomicUsize::new(0));
    let breaker = CircuitBreaker::new(
        CircuitBreakerConfig::builder()
            .name("inventory")
            .failure_threshold(2)
            .recovery_timeout(Duration::from_secs(10))
            .build(),
    );

    let backend = {
        let healthy = Arc::clone(&healthy);
        let reached = Arc::clone(&reached);
        service_fn(move |sku: u32| {
            reached.fetch_add(1, Ordering::SeqCst);
            let up = healthy.load(Ordering::SeqCst);
            async move {
                if up {
                    Ok(sku * 2)
                } else {
                    Err(BackendError::Unreachable)
                }
            }
        })
    };
    let service = ServiceBuilder::new()
        .layer(CircuitBreakerLayer::new(breaker.clone()))
        .service(backend);

    for _ in 0..2 {
        let err = service.clone().oneshot(7).await.unwrap_err();
        assert_eq!(err, CircuitBreakerError::Inner(BackendError::Unreachable));
    }

    let err = service.clone().oneshot(7).await.unwrap_err();
    assert_eq!(err, CircuitBreakerError::Open { name: "inventory".into() });
    assert_eq!(reached.load(Ordering::SeqCst), 2);

    healthy.store(true, Ordering::SeqCst);
    tokio::time::advance(Duration::from_secs(10)).await;
    assert_eq!(service.clone().oneshot(7).await, Ok(14));
    assert!(!breaker.is_open());
}

#[tokio::test]
async fn classifier_ignores_caller_mistakes() {
    let breaker = CircuitBreaker::new(CircuitBreakerConfig::builder().failure_threshold(1).build());
    let service = CircuitBreakerLayer::new(breaker.clone())
        .layer(service_fn(|_: ()| async { Err::<(), _>(BackendError::NotFound) }))
        .with_classifier(|result: &Result<(), BackendError>| {
            matches!(result, Err(BackendError::Unreachable))
        });

    for _ in 0..5 {
        let err = service.clone().oneshot(()).await.unwrap_err();
        assert_eq!(err.into_inner(), Some(BackendError::NotFound));
    }
    assert!(!breaker.is_open());
}

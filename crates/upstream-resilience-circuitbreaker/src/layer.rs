use crate::error::CircuitBreakerError;
use crate::CircuitBreaker;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

type Classifier<Res, Err> = Arc<dyn Fn(&Result<Res, Err>) -> bool + Send + Sync>;

/// A Tower layer that guards a whole service with one breaker.
///
/// The breaker is shared: every service produced by the layer, and every
/// clone of those services, reports into the same state.
///
/// ```rust
/// use upstream_resilience_circuitbreaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerLayer};
/// use tower::{ServiceBuilder, service_fn};
///
/// let breaker = CircuitBreaker::new(CircuitBreakerConfig::standard().name("backend").build());
/// let service = ServiceBuilder::new()
///     .layer(CircuitBreakerLayer::new(breaker))
///     .service(service_fn(|req: String| async move { Ok::<_, std::io::Error>(req) }));
/// ```
#[derive(Clone, Debug)]
pub struct CircuitBreakerLayer {
    breaker: CircuitBreaker,
}

impl CircuitBreakerLayer {
    pub fn new(breaker: CircuitBreaker) -> Self {
        Self { breaker }
    }
}

impl<S> Layer<S> for CircuitBreakerLayer {
    type Service = CircuitBreakerService<S>;

    fn layer(&self, service: S) -> Self::Service {
        CircuitBreakerService {
            inner: service,
            breaker: self.breaker.clone(),
        }
    }
}

/// Service produced by [`CircuitBreakerLayer`]. Every `Err` from the inner
/// service counts as a failure; see [`with_classifier`](Self::with_classifier)
/// to change that.
#[derive(Clone, Debug)]
pub struct CircuitBreakerService<S> {
    inner: S,
    breaker: CircuitBreaker,
}

impl<S> CircuitBreakerService<S> {
    /// The breaker guarding this service.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Classifies results with `is_failure` instead of treating every error
    /// as a failure.
    pub fn with_classifier<Res, Err, F>(self, is_failure: F) -> ClassifiedService<S, Res, Err>
    where
        F: Fn(&Result<Res, Err>) -> bool + Send + Sync + 'static,
    {
        ClassifiedService {
            inner: self.inner,
            breaker: self.breaker,
            is_failure: Arc::new(is_failure),
        }
    }
}

impl<S, Req> Service<Req> for CircuitBreakerService<S>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Response: Send + 'static,
    S::Error: Send + 'static,
    S::Future: Send + 'static,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = CircuitBreakerError<S::Error>;
    type Future = BoxFuture<'static, Result<S::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(CircuitBreakerError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        guarded_call(&self.breaker, &mut self.inner, req, None)
    }
}

/// A [`CircuitBreakerService`] with a custom failure classifier.
pub struct ClassifiedService<S, Res, Err> {
    inner: S,
    breaker: CircuitBreaker,
    is_failure: Classifier<Res, Err>,
}

impl<S: Clone, Res, Err> Clone for ClassifiedService<S, Res, Err> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            breaker: self.breaker.clone(),
            is_failure: Arc::clone(&self.is_failure),
        }
    }
}

impl<S, Req> Service<Req> for ClassifiedService<S, S::Response, S::Error>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Response: Send + 'static,
    S::Error: Send + 'static,
    S::Future: Send + 'static,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = CircuitBreakerError<S::Error>;
    type Future = BoxFuture<'static, Result<S::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(CircuitBreakerError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        guarded_call(&self.breaker, &mut self.inner, req, Some(Arc::clone(&self.is_failure)))
    }
}

fn guarded_call<S, Req>(
    breaker: &CircuitBreaker,
    inner: &mut S,
    req: Req,
    is_failure: Option<Classifier<S::Response, S::Error>>,
) -> BoxFuture<'static, Result<S::Response, CircuitBreakerError<S::Error>>>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Response: Send + 'static,
    S::Error: Send + 'static,
    S::Future: Send + 'static,
    Req: Send + 'static,
{
    let Some(permit) = breaker.try_acquire() else {
        let name = breaker.name().to_string();
        return Box::pin(async move { Err(CircuitBreakerError::Open { name }) });
    };

    // The ready service handles this request; a fresh clone is left behind
    // for the next poll_ready.
    let clone = inner.clone();
    let mut ready = std::mem::replace(inner, clone);

    Box::pin(async move {
        let result = ready.call(req).await;
        let failed = match &is_failure {
            Some(classify) => classify(&result),
            None => result.is_err(),
        };
        permit.record(failed);
        result.map_err(CircuitBreakerError::Inner)
    })
}

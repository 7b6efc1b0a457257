//! Circuit breaker guarding calls to a dependency.
//!
//! A breaker counts consecutive failures of the calls it guards and stops
//! running them once the dependency looks unhealthy.
//!
//! ## States
//! - **Closed**: calls run normally. Reaching the failure threshold opens
//!   the breaker.
//! - **Open**: calls are deflected, either to a caller-supplied fallback or
//!   with [`CircuitBreakerError::Open`]. Once the recovery timeout has
//!   elapsed, the next call moves the breaker to Half-Open.
//! - **Half-Open**: exactly one probe call runs at a time while every other
//!   call is deflected. A successful probe closes the breaker and clears the
//!   failure count; a failed probe reopens it and restarts the recovery timer.
//!
//! A call that completes but takes longer than the configured expected
//! latency is recorded as a failure.
//!
//! ## Usage
//!
//! ```rust
//! use upstream_resilience_circuitbreaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};
//! use std::time::Duration;
//!
//! # async fn example() {
//! let breaker = CircuitBreaker::new(
//!     CircuitBreakerConfig::builder()
//!         .name("backend")
//!         .failure_threshold(3)
//!         .recovery_timeout(Duration::from_secs(30))
//!         .build(),
//! );
//!
//! match breaker.call(|| async { Ok::<_, std::io::Error>("payload") }).await {
//!     Ok(payload) => println!("{payload}"),
//!     Err(CircuitBreakerError::Open { name }) => eprintln!("{name} is unhealthy"),
//!     Err(CircuitBreakerError::Inner(e)) => eprintln!("call failed: {e}"),
//! }
//! # }
//! ```
//!
//! Whole services can be guarded with [`CircuitBreakerLayer`], and
//! [`BreakerRegistry`] hands out one shared breaker per dependency name.
//!
//! ## Feature Flags
//! - `metrics`: call, rejection and transition counters plus a state gauge
//! - `tracing`: logs state transitions and rejections
//! - `serde`: `Serialize` for [`CircuitState`] and [`BreakerState`]

mod circuit;
mod config;
mod error;
mod events;
mod layer;
mod registry;
mod state;

pub use config::{CircuitBreakerConfig, CircuitBreakerConfigBuilder};
pub use error::CircuitBreakerError;
pub use events::CircuitBreakerEvent;
pub use layer::{CircuitBreakerLayer, CircuitBreakerService};
pub use registry::{BreakerRegistry, BreakerRegistryBuilder};
pub use state::{BreakerState, CircuitState};

use circuit::{Admission, Circuit};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Once};
use tokio::time::Instant;

#[cfg(feature = "metrics")]
use metrics::{describe_counter, describe_gauge, describe_histogram, histogram};

static METRICS_INIT: Once = Once::new();

fn describe_metrics() {
    METRICS_INIT.call_once(|| {
        #[cfg(feature = "metrics")]
        {
            describe_counter!("circuitbreaker_calls_total", "Calls recorded by outcome");
            describe_counter!("circuitbreaker_rejected_total", "Calls deflected without running");
            describe_counter!("circuitbreaker_transitions_total", "State transitions");
            describe_counter!("circuitbreaker_slow_calls_total", "Calls slower than the expected latency");
            describe_gauge!("circuitbreaker_state", "Current state (0 closed, 1 open, 2 half-open)");
            describe_histogram!("circuitbreaker_call_duration_seconds", "Duration of guarded calls");
        }
    });
}

/// A named circuit breaker. Clones share the same state.
#[derive(Clone)]
pub struct CircuitBreaker {
    inner: Arc<Inner>,
}

struct Inner {
    config: CircuitBreakerConfig,
    circuit: Mutex<Circuit>,
    state_mirror: Arc<AtomicU8>,
}

impl CircuitBreaker {
    /// Creates a breaker in the Closed state.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        describe_metrics();

        let state_mirror = Arc::new(AtomicU8::new(CircuitState::Closed as u8));
        Self {
            inner: Arc::new(Inner {
                circuit: Mutex::new(Circuit::new(Arc::clone(&state_mirror))),
                state_mirror,
                config,
            }),
        }
    }

    /// Returns a configuration builder.
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.inner.config
    }

    /// Runs `operation` if the breaker admits it. An `Err` result is recorded
    /// as a failure.
    pub async fn call<T, E, F, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_classified(operation, Result::is_err).await
    }

    /// Like [`call`](Self::call) with a custom failure predicate, for
    /// operations that report failure inside `Ok` or whose errors do not
    /// indicate an unhealthy dependency.
    pub async fn call_classified<T, E, F, Fut, C>(
        &self,
        operation: F,
        is_failure: C,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: FnOnce(&Result<T, E>) -> bool,
    {
        let Some(permit) = self.try_acquire() else {
            return Err(CircuitBreakerError::Open {
                name: self.inner.config.name.clone(),
            });
        };

        let result = operation().await;
        permit.record(is_failure(&result));
        result.map_err(CircuitBreakerError::Inner)
    }

    /// Runs `operation` if admitted, otherwise returns the result of
    /// `fallback` without touching the dependency.
    pub async fn call_with_fallback<T, E, F, Fut, G, GFut>(&self, operation: F, fallback: G) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        G: FnOnce() -> GFut,
        GFut: Future<Output = Result<T, E>>,
    {
        match self.call(operation).await {
            Ok(value) => Ok(value),
            Err(CircuitBreakerError::Inner(err)) => Err(err),
            Err(CircuitBreakerError::Open { .. }) => fallback().await,
        }
    }

    /// Asks for admission. The returned permit must be resolved with
    /// [`CallPermit::record`]; dropping it unresolved records nothing and
    /// frees the Half-Open probe slot.
    pub fn try_acquire(&self) -> Option<CallPermit> {
        let mut events = Vec::new();
        let admission = {
            let mut circuit = self.inner.circuit.lock();
            circuit.try_acquire(&self.inner.config, Instant::now(), &mut events)
        };
        self.emit(&events);

        match admission {
            Admission::Permitted { generation, probe } => Some(CallPermit {
                breaker: self.clone(),
                generation,
                probe,
                started: Instant::now(),
                resolved: false,
            }),
            Admission::Rejected => {
                #[cfg(feature = "tracing")]
                tracing::debug!(breaker = %self.inner.config.name, "call rejected");
                None
            }
        }
    }

    /// Current state, read without locking.
    pub fn state_sync(&self) -> CircuitState {
        CircuitState::from_u8(self.inner.state_mirror.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state_sync() == CircuitState::Open
    }

    /// Consistent view of counters and timestamps.
    pub fn snapshot(&self) -> BreakerState {
        self.inner.circuit.lock().snapshot(&self.inner.config.name)
    }

    /// HTTP status for health endpoints: 503 while open, 200 otherwise.
    pub fn http_status(&self) -> u16 {
        match self.state_sync() {
            CircuitState::Closed | CircuitState::HalfOpen => 200,
            CircuitState::Open => 503,
        }
    }

    /// `"healthy"`, `"degraded"` (half-open) or `"unhealthy"` (open).
    pub fn health_status(&self) -> &'static str {
        match self.state_sync() {
            CircuitState::Closed => "healthy",
            CircuitState::HalfOpen => "degraded",
            CircuitState::Open => "unhealthy",
        }
    }

    fn emit(&self, events: &[CircuitBreakerEvent]) {
        for event in events {
            self.inner.config.event_listeners.emit(event);
        }
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.inner.config.name)
            .field("state", &self.state_sync())
            .finish()
    }
}

/// Admission to run one guarded call.
#[must_use = "an unresolved permit records nothing"]
pub struct CallPermit {
    breaker: CircuitBreaker,
    generation: u64,
    probe: bool,
    started: Instant,
    resolved: bool,
}

impl CallPermit {
    /// Returns true if this call is the Half-Open probe.
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    /// Records the outcome of the call.
    pub fn record(mut self, failed: bool) {
        self.resolved = true;
        let duration = self.started.elapsed();
        let inner = &self.breaker.inner;

        #[cfg(feature = "metrics")]
        histogram!("circuitbreaker_call_duration_seconds", "circuitbreaker" => inner.config.name.clone())
            .record(duration.as_secs_f64());

        let mut events = Vec::new();
        inner
            .circuit
            .lock()
            .record(&inner.config, self.generation, failed, duration, Instant::now(), &mut events);
        self.breaker.emit(&events);
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if self.resolved || !self.probe {
            return;
        }
        let abandoned = self.breaker.inner.circuit.lock().abandon_probe(self.generation);
        if abandoned {
            #[cfg(feature = "tracing")]
            tracing::debug!(breaker = %self.breaker.inner.config.name, "probe dropped before completing");

            self.breaker.emit(&[CircuitBreakerEvent::ProbeAbandoned {
                breaker: self.breaker.inner.config.name.clone(),
                at: Instant::now(),
            }]);
        }
    }
}

impl fmt::Debug for CallPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallPermit")
            .field("breaker", &self.breaker.inner.config.name)
            .field("probe", &self.probe)
            .finish()
    }
}

use crate::events::CircuitBreakerEvent;
use crate::state::CircuitState;
use std::time::Duration;
use upstream_resilience_core::{EventListeners, FnListener};

/// Configuration for one circuit breaker.
#[derive(Clone, Debug)]
pub struct CircuitBreakerConfig {
    pub(crate) failure_threshold: u32,
    pub(crate) recovery_timeout: Duration,
    pub(crate) expected_latency: Option<Duration>,
    pub(crate) monitor_window: Option<Duration>,
    pub(crate) event_listeners: EventListeners<CircuitBreakerEvent>,
    pub(crate) name: String,
}

impl CircuitBreakerConfig {
    /// Returns a builder with default values.
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Preset: balanced defaults.
    ///
    /// - 5 consecutive failures open the breaker
    /// - 30 second recovery timeout
    pub fn standard() -> CircuitBreakerConfigBuilder {
        Self::builder()
            .failure_threshold(5)
            .recovery_timeout(Duration::from_secs(30))
    }

    /// Preset: opens quickly and treats slow calls as failures.
    ///
    /// - 3 consecutive failures open the breaker
    /// - 10 second recovery timeout
    /// - calls slower than 2 seconds count as failures
    pub fn fast_fail() -> CircuitBreakerConfigBuilder {
        Self::builder()
            .failure_threshold(3)
            .recovery_timeout(Duration::from_secs(10))
            .expected_latency(Duration::from_secs(2))
    }

    /// Preset: tolerates sporadic failures.
    ///
    /// - 10 consecutive failures open the breaker
    /// - 60 second recovery timeout
    /// - failures more than a minute apart do not accumulate
    pub fn tolerant() -> CircuitBreakerConfigBuilder {
        Self::builder()
            .failure_threshold(10)
            .recovery_timeout(Duration::from_secs(60))
            .monitor_window(Duration::from_secs(60))
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    pub fn recovery_timeout(&self) -> Duration {
        self.recovery_timeout
    }

    pub fn expected_latency(&self) -> Option<Duration> {
        self.expected_latency
    }

    pub fn monitor_window(&self) -> Option<Duration> {
        self.monitor_window
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns a copy carrying `name`, used when one configuration backs
    /// several named breakers.
    pub fn with_name(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    pub(crate) fn add_listeners(&mut self, listeners: &EventListeners<CircuitBreakerEvent>) {
        self.event_listeners.extend(listeners);
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Builder for [`CircuitBreakerConfig`].
pub struct CircuitBreakerConfigBuilder {
    failure_threshold: u32,
    recovery_timeout: Duration,
    expected_latency: Option<Duration>,
    monitor_window: Option<Duration>,
    event_listeners: EventListeners<CircuitBreakerEvent>,
    name: String,
}

impl CircuitBreakerConfigBuilder {
    /// Creates a new builder with default values.
    pub fn new() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            expected_latency: None,
            monitor_window: None,
            event_listeners: EventListeners::new(),
            name: String::from("<unnamed>"),
        }
    }

    /// Sets how many consecutive failures open the breaker.
    ///
    /// Default: 5
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Sets how long the breaker stays open before the next call probes.
    ///
    /// Default: 30 seconds
    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    /// Calls taking longer than this are recorded as failures even when they
    /// succeed.
    ///
    /// Default: none
    pub fn expected_latency(mut self, latency: Duration) -> Self {
        self.expected_latency = Some(latency);
        self
    }

    /// Failures further apart than this window do not accumulate; the
    /// consecutive count restarts at one.
    ///
    /// Default: none (failures accumulate until a success)
    pub fn monitor_window(mut self, window: Duration) -> Self {
        self.monitor_window = Some(window);
        self
    }

    /// Sets the name used in events, logs and metrics.
    ///
    /// Default: `"<unnamed>"`
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Registers a callback invoked on every state transition.
    pub fn on_state_transition<F>(mut self, f: F) -> Self
    where
        F: Fn(CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let CircuitBreakerEvent::StateTransition {
                from_state, to_state, ..
            } = event
            {
                f(*from_state, *to_state);
            }
        }));
        self
    }

    /// Registers a callback invoked with the admitting state of each call.
    pub fn on_call_permitted<F>(mut self, f: F) -> Self
    where
        F: Fn(CircuitState) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let CircuitBreakerEvent::CallPermitted { state, .. } = event {
                f(*state);
            }
        }));
        self
    }

    /// Registers a callback invoked when a call is deflected.
    pub fn on_call_rejected<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let CircuitBreakerEvent::CallRejected { .. } = event {
                f();
            }
        }));
        self
    }

    /// Registers a callback invoked with the duration of every slow call.
    pub fn on_slow_call<F>(mut self, f: F) -> Self
    where
        F: Fn(Duration) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let CircuitBreakerEvent::SlowCallDetected { duration, .. } = event {
                f(*duration);
            }
        }));
        self
    }

    /// Registers a callback receiving every breaker event.
    pub fn on_event<F>(mut self, f: F) -> Self
    where
        F: Fn(&CircuitBreakerEvent) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(f));
        self
    }

    /// Builds the configuration.
    ///
    /// # Panics
    ///
    /// Panics if the failure threshold is zero.
    pub fn build(self) -> CircuitBreakerConfig {
        assert!(self.failure_threshold > 0, "failure_threshold must be at least 1");

        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            recovery_timeout: self.recovery_timeout,
            expected_latency: self.expected_latency,
            monitor_window: self.monitor_window,
            event_listeners: self.event_listeners,
            name: self.name,
        }
    }
}

impl Default for CircuitBreakerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

//! Named lookup-or-create of breakers, one per logical dependency.

use crate::config::CircuitBreakerConfig;
use crate::events::CircuitBreakerEvent;
use crate::state::{BreakerState, CircuitState};
use crate::CircuitBreaker;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use upstream_resilience_core::{EventListeners, FnListener};

/// Process-wide set of named breakers.
///
/// Repeated lookups of one name return breakers sharing the same state, so
/// every call site guarding a dependency sees the same counters. The registry
/// is an ordinary value: construct it at startup and pass it to whoever needs
/// it.
///
/// ```rust
/// use upstream_resilience_circuitbreaker::{BreakerRegistry, CircuitBreakerConfig};
///
/// let registry = BreakerRegistry::builder()
///     .defaults(CircuitBreakerConfig::standard().build())
///     .override_for("search", CircuitBreakerConfig::fast_fail().build())
///     .build();
///
/// let search = registry.get_or_create("search");
/// assert_eq!(search.config().failure_threshold(), 3);
/// assert_eq!(registry.names(), vec!["search".to_string()]);
/// ```
#[derive(Clone)]
pub struct BreakerRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    defaults: CircuitBreakerConfig,
    overrides: HashMap<String, CircuitBreakerConfig>,
    listeners: EventListeners<CircuitBreakerEvent>,
    breakers: Mutex<HashMap<String, CircuitBreaker>>,
}

impl BreakerRegistry {
    pub fn builder() -> BreakerRegistryBuilder {
        BreakerRegistryBuilder::new()
    }

    /// A registry creating every breaker from `defaults`.
    pub fn new(defaults: CircuitBreakerConfig) -> Self {
        Self::builder().defaults(defaults).build()
    }

    /// Returns the breaker named `name`, creating it on first use.
    pub fn get_or_create(&self, name: &str) -> CircuitBreaker {
        let mut breakers = self.inner.breakers.lock();
        if let Some(breaker) = breakers.get(name) {
            return breaker.clone();
        }

        let base = self.inner.overrides.get(name).unwrap_or(&self.inner.defaults);
        let mut config = base.with_name(name);
        config.add_listeners(&self.inner.listeners);

        #[cfg(feature = "tracing")]
        tracing::debug!(breaker = name, "creating circuit breaker");

        let breaker = CircuitBreaker::new(config);
        breakers.insert(name.to_string(), breaker.clone());
        breaker
    }

    /// Returns the breaker named `name` if it has been created.
    pub fn get(&self, name: &str) -> Option<CircuitBreaker> {
        self.inner.breakers.lock().get(name).cloned()
    }

    /// Names of every created breaker, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.breakers.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Snapshots of every created breaker, sorted by name.
    pub fn snapshots(&self) -> Vec<BreakerState> {
        let breakers: Vec<CircuitBreaker> = self.inner.breakers.lock().values().cloned().collect();
        let mut snapshots: Vec<BreakerState> = breakers.iter().map(CircuitBreaker::snapshot).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    pub fn len(&self) -> usize {
        self.inner.breakers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl fmt::Debug for BreakerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BreakerRegistry")
            .field("breakers", &self.names())
            .finish()
    }
}

/// Builder for [`BreakerRegistry`].
pub struct BreakerRegistryBuilder {
    defaults: CircuitBreakerConfig,
    overrides: HashMap<String, CircuitBreakerConfig>,
    listeners: EventListeners<CircuitBreakerEvent>,
}

impl BreakerRegistryBuilder {
    pub fn new() -> Self {
        Self {
            defaults: CircuitBreakerConfig::standard().build(),
            overrides: HashMap::new(),
            listeners: EventListeners::new(),
        }
    }

    /// Configuration for every name without an override.
    ///
    /// Default: [`CircuitBreakerConfig::standard`]
    pub fn defaults(mut self, config: CircuitBreakerConfig) -> Self {
        self.defaults = config;
        self
    }

    /// Configuration used for the breaker named `name`.
    pub fn override_for(mut self, name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        self.overrides.insert(name.into(), config);
        self
    }

    /// Registers a listener attached to every breaker the registry creates.
    pub fn on_event<F>(mut self, f: F) -> Self
    where
        F: Fn(&CircuitBreakerEvent) + Send + Sync + 'static,
    {
        self.listeners.add(FnListener::new(f));
        self
    }

    /// Registers a transition callback receiving the breaker name, attached
    /// to every breaker the registry creates.
    pub fn on_state_transition<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.listeners.add(FnListener::new(move |event| {
            if let CircuitBreakerEvent::StateTransition {
                breaker,
                from_state,
                to_state,
                ..
            } = event
            {
                f(breaker, *from_state, *to_state);
            }
        }));
        self
    }

    pub fn build(self) -> BreakerRegistry {
        BreakerRegistry {
            inner: Arc::new(RegistryInner {
                defaults: self.defaults,
                overrides: self.overrides,
                listeners: self.listeners,
                breakers: Mutex::new(HashMap::new()),
            }),
        }
    }
}

impl Default for BreakerRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

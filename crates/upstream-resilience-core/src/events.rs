//! Typed events emitted by the admission limiter, caches and breakers.
//!
//! Components own an [`EventListeners`] collection filled in through their
//! builders (`on_*` hooks) and emit one event per observable step. Listeners
//! run synchronously on the emitting task, so they should be cheap.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::time::Instant;

/// An observable occurrence inside one named component instance.
pub trait Event: Send + Sync + fmt::Debug {
    /// Short machine-readable kind, e.g. `"state_transition"`.
    fn kind(&self) -> &'static str;

    /// When the event happened.
    fn at(&self) -> Instant;

    /// Name of the limiter, cache or breaker that emitted the event.
    fn source(&self) -> &str;
}

/// Receives events of one type.
pub trait EventListener<E: Event>: Send + Sync {
    /// Called once per emitted event.
    fn on_event(&self, event: &E);
}

/// Shared, type-erased listener.
pub type BoxedEventListener<E> = Arc<dyn EventListener<E>>;

/// The listeners registered on one component.
pub struct EventListeners<E: Event> {
    listeners: Vec<BoxedEventListener<E>>,
}

impl<E: Event> Clone for EventListeners<E> {
    fn clone(&self) -> Self {
        Self {
            listeners: self.listeners.clone(),
        }
    }
}

impl<E: Event> EventListeners<E> {
    /// Creates an empty collection.
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    /// Registers a listener.
    pub fn add<L>(&mut self, listener: L)
    where
        L: EventListener<E> + 'static,
    {
        self.listeners.push(Arc::new(listener));
    }

    /// Registers an already shared listener.
    pub fn add_shared(&mut self, listener: BoxedEventListener<E>) {
        self.listeners.push(listener);
    }

    /// Appends every listener of `other`.
    pub fn extend(&mut self, other: &EventListeners<E>) {
        self.listeners.extend(other.listeners.iter().cloned());
    }

    /// Delivers `event` to every listener.
    ///
    /// A panicking listener is isolated: the panic is swallowed and the
    /// remaining listeners still run.
    pub fn emit(&self, event: &E) {
        for listener in &self.listeners {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener.on_event(event);
            }));
        }
    }

    /// Returns true when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.listeners.len()
    }
}

impl<E: Event> Default for EventListeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Event> fmt::Debug for EventListeners<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventListeners")
            .field("len", &self.listeners.len())
            .finish()
    }
}

/// Adapts a closure into an [`EventListener`].
pub struct FnListener<E, F>
where
    F: Fn(&E) + Send + Sync,
{
    f: F,
    _event: PhantomData<fn(&E)>,
}

impl<E, F> FnListener<E, F>
where
    F: Fn(&E) + Send + Sync,
{
    /// Wraps `f`.
    pub fn new(f: F) -> Self {
        Self {
            f,
            _event: PhantomData,
        }
    }
}

impl<E, F> EventListener<E> for FnListener<E, F>
where
    E: Event,
    F: Fn(&E) + Send + Sync,
{
    fn on_event(&self, event: &E) {
        (self.f)(event)
    }
}

/// Forwards every event to `tracing` at debug level.
#[cfg(feature = "tracing")]
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingListener;

#[cfg(feature = "tracing")]
impl<E: Event> EventListener<E> for TracingListener {
    fn on_event(&self, event: &E) {
        tracing::debug!(source = event.source(), kind = event.kind(), ?event, "resilience event");
    }
}

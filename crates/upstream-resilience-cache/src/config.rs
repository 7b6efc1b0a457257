//! Configuration for the result cache.

use crate::events::CacheEvent;
use std::num::NonZeroUsize;
use std::time::Duration;
use upstream_resilience_core::{EventListeners, FnListener};

pub(crate) struct CacheConfig {
    pub(crate) max_entries: NonZeroUsize,
    pub(crate) default_ttl: Duration,
    pub(crate) coalesce: bool,
    pub(crate) event_listeners: EventListeners<CacheEvent>,
    pub(crate) name: String,
}

/// Builder for [`ResultCache`](crate::ResultCache).
pub struct ResultCacheBuilder {
    max_entries: usize,
    default_ttl: Duration,
    coalesce: bool,
    event_listeners: EventListeners<CacheEvent>,
    name: String,
}

impl ResultCacheBuilder {
    /// Creates a builder with default values.
    pub fn new() -> Self {
        Self {
            max_entries: 10_000,
            default_ttl: Duration::from_secs(300),
            coalesce: false,
            event_listeners: EventListeners::new(),
            name: String::from("<unnamed>"),
        }
    }

    /// Sets the maximum number of entries; the least recently used entry is
    /// evicted beyond it.
    ///
    /// Default: 10 000
    pub fn max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Sets the TTL used when a call does not pass one.
    ///
    /// Default: 5 minutes
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// When enabled, concurrent misses on the same key share one fetch.
    ///
    /// Default: false (each concurrent miss fetches independently)
    pub fn coalesce(mut self, enabled: bool) -> Self {
        self.coalesce = enabled;
        self
    }

    /// Sets the name of this cache instance for observability.
    ///
    /// Default: `"<unnamed>"`
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Registers a callback invoked with the key on every cache hit.
    pub fn on_hit<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let CacheEvent::Hit { key, .. } = event {
                f(key);
            }
        }));
        self
    }

    /// Registers a callback invoked with the key on every cache miss.
    pub fn on_miss<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let CacheEvent::Miss { key, .. } = event {
                f(key);
            }
        }));
        self
    }

    /// Registers a callback invoked with the key whenever an entry is evicted.
    pub fn on_eviction<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let CacheEvent::Evicted { key, .. } = event {
                f(key);
            }
        }));
        self
    }

    /// Registers a callback receiving every cache event.
    pub fn on_event<F>(mut self, f: F) -> Self
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(f));
        self
    }

    /// Builds the cache.
    ///
    /// # Panics
    ///
    /// Panics if `max_entries` is zero.
    pub fn build(self) -> crate::ResultCache {
        let max_entries =
            NonZeroUsize::new(self.max_entries).expect("max_entries must be greater than zero");

        crate::ResultCache::new(CacheConfig {
            max_entries,
            default_ttl: self.default_ttl,
            coalesce: self.coalesce,
            event_listeners: self.event_listeners,
            name: self.name,
        })
    }
}

impl Default for ResultCacheBuilder {
    fn default() -> Self {
        Self::new()
    }
}

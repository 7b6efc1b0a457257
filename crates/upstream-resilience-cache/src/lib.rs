//! Cache-aside result cache with per-entry TTL.
//!
//! [`ResultCache`] maps string keys to serialized values. A caller asks for a
//! key together with a fetch function; a live entry answers directly,
//! otherwise the fetch runs and a present result is stored for the given TTL.
//! Absent results and errors are never cached.
//!
//! Values are stored as JSON, so one cache can hold payloads of different
//! types. An entry that no longer decodes as the requested type is evicted
//! and handled as a miss.
//!
//! Expired entries are treated as absent and removed lazily on the next read.
//! The number of entries is bounded; the least recently used entry is evicted
//! when the bound is reached.
//!
//! ## Concurrent misses
//!
//! By default concurrent misses on the same key each run their own fetch.
//! With [`ResultCacheBuilder::coalesce`] enabled, the first miss fetches and
//! the others wait for its result. If that fetch fails or is cancelled the
//! waiters fall back to fetching on their own.
//!
//! ## Example
//!
//! ```rust
//! use upstream_resilience_cache::ResultCache;
//! use std::time::Duration;
//!
//! # async fn example() {
//! let cache = ResultCache::builder()
//!     .name("market-types")
//!     .max_entries(1_000)
//!     .build();
//!
//! let name: Option<String> = cache
//!     .get_or_set("type:34", Some(Duration::from_secs(3600)), || async {
//!         Some("Tritanium".to_string())
//!     })
//!     .await;
//! assert_eq!(name.as_deref(), Some("Tritanium"));
//! # }
//! ```

mod coalesce;
mod config;
mod events;
mod store;

pub use config::ResultCacheBuilder;
pub use events::CacheEvent;

use coalesce::{InFlight, Role};
use config::CacheConfig;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use store::{Lookup, Store};
use tokio::time::Instant;

#[cfg(feature = "metrics")]
use metrics::{counter, describe_counter, describe_gauge, gauge};

#[cfg(feature = "tracing")]
use tracing::{debug, warn};

/// In-memory cache-aside store shared by every clone.
#[derive(Clone)]
pub struct ResultCache {
    inner: Arc<Inner>,
}

struct Inner {
    config: CacheConfig,
    store: Mutex<Store>,
    in_flight: Arc<InFlight>,
}

impl ResultCache {
    /// Returns a new builder.
    pub fn builder() -> ResultCacheBuilder {
        ResultCacheBuilder::new()
    }

    pub(crate) fn new(config: CacheConfig) -> Self {
        #[cfg(feature = "metrics")]
        {
            describe_counter!("result_cache_requests_total", "Lookups by result (hit or miss)");
            describe_counter!("result_cache_evictions_total", "Entries evicted by capacity or decode failure");
            describe_gauge!("result_cache_size", "Entries currently held");
        }

        let store = Mutex::new(Store::new(config.max_entries));
        Self {
            inner: Arc::new(Inner {
                config,
                store,
                in_flight: Arc::new(InFlight::default()),
            }),
        }
    }

    /// Name of this cache instance.
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// TTL applied when a call passes `None`.
    pub fn default_ttl(&self) -> Duration {
        self.inner.config.default_ttl
    }

    /// Returns the live value for `key`, if any.
    pub fn get<V: DeserializeOwned>(&self, key: &str) -> Option<V> {
        self.lookup(key)
    }

    /// Stores `value` under `key` for `ttl` (or the default TTL).
    ///
    /// Returns false if the value could not be serialized; nothing is stored
    /// in that case.
    pub fn insert<V: Serialize>(&self, key: &str, value: &V, ttl: Option<Duration>) -> bool {
        self.store(key, value, ttl).is_some()
    }

    /// Removes `key`. Returns true if an entry was present.
    pub fn remove(&self, key: &str) -> bool {
        let removed = self.inner.store.lock().remove(key);
        self.publish_size();
        removed
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.inner.store.lock().clear();
        self.publish_size();
    }

    /// Number of stored entries, including expired ones not yet read.
    pub fn len(&self) -> usize {
        self.inner.store.lock().len()
    }

    /// Returns true when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the live value for `key`, or runs `fetch` and stores a present
    /// result for `ttl` (or the default TTL).
    ///
    /// An absent result is returned as-is and not cached.
    pub async fn get_or_set<V, F, Fut>(&self, key: &str, ttl: Option<Duration>, fetch: F) -> Option<V>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<V>>,
    {
        self.try_get_or_set(key, ttl, move || async move { fetch().await.ok_or(()) })
            .await
            .ok()
    }

    /// Like [`get_or_set`](Self::get_or_set) for fetches that report why
    /// nothing was produced. Errors are returned to the caller and never
    /// cached.
    pub async fn try_get_or_set<V, E, F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        fetch: F,
    ) -> Result<V, E>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.lookup(key) {
            return Ok(value);
        }

        if !self.inner.config.coalesce {
            let value = fetch().await?;
            self.store(key, &value, ttl);
            return Ok(value);
        }

        match self.inner.in_flight.join(key) {
            Role::Leader(guard) => match fetch().await {
                Ok(value) => {
                    guard.complete(self.store(key, &value, ttl));
                    Ok(value)
                }
                Err(err) => {
                    guard.complete(None);
                    Err(err)
                }
            },
            Role::Follower(mut receiver) => {
                self.emit(|cache, at, key| CacheEvent::Coalesced { cache, at, key }, key);

                #[cfg(feature = "tracing")]
                debug!(cache = %self.inner.config.name, key, "waiting on in-flight fetch");

                if let Ok(Some(bytes)) = receiver.recv().await {
                    if let Ok(value) = serde_json::from_slice(&bytes) {
                        return Ok(value);
                    }
                }
                let value = fetch().await?;
                self.store(key, &value, ttl);
                Ok(value)
            }
        }
    }

    fn lookup<V: DeserializeOwned>(&self, key: &str) -> Option<V> {
        let found = self.inner.store.lock().get(key, Instant::now());

        match found {
            Lookup::Hit(bytes) => match serde_json::from_slice(&bytes) {
                Ok(value) => {
                    self.record_hit(key);
                    return Some(value);
                }
                Err(_err) => {
                    #[cfg(feature = "tracing")]
                    warn!(
                        cache = %self.inner.config.name,
                        key,
                        error = %_err,
                        "cached value does not decode as the requested type, evicting"
                    );

                    self.inner.store.lock().remove(key);
                    self.record_eviction(key);
                }
            },
            Lookup::Expired => {
                self.emit(|cache, at, key| CacheEvent::Expired { cache, at, key }, key);
                self.publish_size();
            }
            Lookup::Absent => {}
        }

        self.record_miss(key);
        None
    }

    /// Serializes and stores `value`, returning the stored bytes.
    fn store<V: Serialize>(&self, key: &str, value: &V, ttl: Option<Duration>) -> Option<Arc<[u8]>> {
        let bytes: Arc<[u8]> = match serde_json::to_vec(value) {
            Ok(bytes) => bytes.into(),
            Err(_err) => {
                #[cfg(feature = "tracing")]
                warn!(cache = %self.inner.config.name, key, error = %_err, "value is not serializable, not caching");
                return None;
            }
        };

        let expires_at = Instant::now() + ttl.unwrap_or(self.inner.config.default_ttl);
        let evicted = self
            .inner
            .store
            .lock()
            .insert(key.to_string(), Arc::clone(&bytes), expires_at);

        self.emit(|cache, at, key| CacheEvent::Stored { cache, at, key }, key);
        if let Some(evicted) = evicted {
            self.record_eviction(&evicted);
        }
        self.publish_size();
        Some(bytes)
    }

    fn record_hit(&self, key: &str) {
        #[cfg(feature = "tracing")]
        debug!(cache = %self.inner.config.name, key, "cache hit");

        #[cfg(feature = "metrics")]
        counter!("result_cache_requests_total", "cache" => self.inner.config.name.clone(), "result" => "hit")
            .increment(1);

        self.emit(|cache, at, key| CacheEvent::Hit { cache, at, key }, key);
    }

    fn record_miss(&self, key: &str) {
        #[cfg(feature = "tracing")]
        debug!(cache = %self.inner.config.name, key, "cache miss");

        #[cfg(feature = "metrics")]
        counter!("result_cache_requests_total", "cache" => self.inner.config.name.clone(), "result" => "miss")
            .increment(1);

        self.emit(|cache, at, key| CacheEvent::Miss { cache, at, key }, key);
    }

    fn record_eviction(&self, key: &str) {
        #[cfg(feature = "metrics")]
        counter!("result_cache_evictions_total", "cache" => self.inner.config.name.clone()).increment(1);

        self.emit(|cache, at, key| CacheEvent::Evicted { cache, at, key }, key);
    }

    fn emit(&self, make: impl FnOnce(String, Instant, String) -> CacheEvent, key: &str) {
        let listeners = &self.inner.config.event_listeners;
        if listeners.is_empty() {
            return;
        }
        listeners.emit(&make(self.inner.config.name.clone(), Instant::now(), key.to_string()));
    }

    #[cfg(feature = "metrics")]
    fn publish_size(&self) {
        let len = self.inner.store.lock().len();
        gauge!("result_cache_size", "cache" => self.inner.config.name.clone()).set(len as f64);
    }

    #[cfg(not(feature = "metrics"))]
    fn publish_size(&self) {}
}

impl fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultCache")
            .field("name", &self.inner.config.name)
            .field("max_entries", &self.inner.config.max_entries)
            .field("default_ttl", &self.inner.config.default_ttl)
            .field("coalesce", &self.inner.config.coalesce)
            .finish()
    }
}

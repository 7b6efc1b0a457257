//! Conditional GET caching as a Tower layer.
//!
//! For each resource key the layer keeps the last validator (`ETag`) the
//! upstream sent together with the response it arrived on. The pair is
//! stored and replaced as one value, so a validator never exists without its
//! snapshot.
//!
//! - Before sending, a live validator is attached as `If-None-Match`. An
//!   expired pair is dropped first, so no stale validator goes out.
//! - `304 Not Modified` is answered with the stored snapshot, flagged
//!   [`from_snapshot`](crate::UpstreamResponse::from_snapshot). Headers of
//!   the live 304 replace the stored ones, except the validator and content
//!   headers, so per-response telemetry is never replayed. Without a
//!   snapshot the empty 304 passes through.
//! - `200` with an `ETag` stores `{etag, snapshot}` for the fixed TTL. `200`
//!   without one removes any earlier pair.
//! - Every other status passes through and leaves the store untouched.
//!
//! The layer never interprets bodies and does not throttle.

use crate::request::{UpstreamRequest, UpstreamResponse};
use futures::future::BoxFuture;
use lru::LruCache;
use parking_lot::Mutex;
use reqwest::header::{
    HeaderMap, HeaderValue, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, ETAG, IF_NONE_MATCH,
};
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::Instant;
use tower::{Layer, Service};
use upstream_resilience_core::{Event, EventListeners, FnListener};

#[cfg(feature = "metrics")]
use metrics::counter;

/// Events emitted by the conditional cache.
#[derive(Debug, Clone)]
pub enum ConditionalCacheEvent {
    /// A validator and snapshot were stored for a resource.
    Stored { cache: String, at: Instant, key: String },
    /// The upstream answered "not modified" and the snapshot was served.
    Revalidated { cache: String, at: Instant, key: String },
    /// A pair was dropped: expired, superseded by an unvalidated response,
    /// or pushed out by the capacity bound.
    Evicted { cache: String, at: Instant, key: String },
}

impl Event for ConditionalCacheEvent {
    fn kind(&self) -> &'static str {
        match self {
            ConditionalCacheEvent::Stored { .. } => "stored",
            ConditionalCacheEvent::Revalidated { .. } => "revalidated",
            ConditionalCacheEvent::Evicted { .. } => "evicted",
        }
    }

    fn at(&self) -> Instant {
        match self {
            ConditionalCacheEvent::Stored { at, .. }
            | ConditionalCacheEvent::Revalidated { at, .. }
            | ConditionalCacheEvent::Evicted { at, .. } => *at,
        }
    }

    fn source(&self) -> &str {
        match self {
            ConditionalCacheEvent::Stored { cache, .. }
            | ConditionalCacheEvent::Revalidated { cache, .. }
            | ConditionalCacheEvent::Evicted { cache, .. } => cache,
        }
    }
}

#[derive(Clone)]
struct Validated {
    etag: HeaderValue,
    snapshot: UpstreamResponse,
    expires_at: Instant,
}

struct Store {
    entries: Mutex<LruCache<String, Validated>>,
    ttl: Duration,
    name: String,
    listeners: EventListeners<ConditionalCacheEvent>,
}

impl Store {
    /// The live pair for `key`; an expired pair is removed.
    fn live(&self, key: &str, now: Instant) -> Option<Validated> {
        let mut entries = self.entries.lock();
        let entry = entries.get(key)?;
        if entry.expires_at > now {
            return Some(entry.clone());
        }
        entries.pop(key);
        drop(entries);
        self.emit(ConditionalCacheEvent::Evicted {
            cache: self.name.clone(),
            at: now,
            key: key.to_string(),
        });
        None
    }

    fn store(&self, key: &str, etag: HeaderValue, snapshot: UpstreamResponse, now: Instant) {
        let entry = Validated {
            etag,
            snapshot,
            expires_at: now + self.ttl,
        };
        let evicted = match self.entries.lock().push(key.to_string(), entry) {
            Some((evicted, _)) if evicted != key => Some(evicted),
            _ => None,
        };

        self.emit(ConditionalCacheEvent::Stored {
            cache: self.name.clone(),
            at: now,
            key: key.to_string(),
        });
        if let Some(evicted) = evicted {
            self.emit(ConditionalCacheEvent::Evicted {
                cache: self.name.clone(),
                at: now,
                key: evicted,
            });
        }
    }

    fn remove(&self, key: &str, now: Instant) {
        if self.entries.lock().pop(key).is_some() {
            self.emit(ConditionalCacheEvent::Evicted {
                cache: self.name.clone(),
                at: now,
                key: key.to_string(),
            });
        }
    }

    fn emit(&self, event: ConditionalCacheEvent) {
        self.listeners.emit(&event);
    }
}

/// Layer adding conditional GET caching to a transport.
#[derive(Clone)]
pub struct ConditionalCacheLayer {
    store: Arc<Store>,
}

impl ConditionalCacheLayer {
    pub fn builder() -> ConditionalCacheLayerBuilder {
        ConditionalCacheLayerBuilder::new()
    }

    /// Number of stored pairs, including expired ones not yet looked up.
    pub fn len(&self) -> usize {
        self.store.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The stored validator for `key`, if a live pair exists.
    pub fn validator(&self, key: &str) -> Option<HeaderValue> {
        self.store.live(key, Instant::now()).map(|entry| entry.etag)
    }
}

impl<S> Layer<S> for ConditionalCacheLayer {
    type Service = ConditionalCache<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ConditionalCache {
            inner,
            store: Arc::clone(&self.store),
        }
    }
}

impl fmt::Debug for ConditionalCacheLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionalCacheLayer")
            .field("name", &self.store.name)
            .field("ttl", &self.store.ttl)
            .finish()
    }
}

/// Builder for [`ConditionalCacheLayer`].
pub struct ConditionalCacheLayerBuilder {
    ttl: Duration,
    max_entries: usize,
    name: String,
    listeners: EventListeners<ConditionalCacheEvent>,
}

impl ConditionalCacheLayerBuilder {
    pub fn new() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            max_entries: 10_000,
            name: String::from("<unnamed>"),
            listeners: EventListeners::new(),
        }
    }

    /// How long a stored pair may be used for revalidation.
    ///
    /// Default: 5 minutes
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Default: 10 000
    pub fn max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Registers a callback invoked with the resource key when a snapshot is
    /// served for a "not modified" answer.
    pub fn on_revalidated<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.listeners.add(FnListener::new(move |event| {
            if let ConditionalCacheEvent::Revalidated { key, .. } = event {
                f(key);
            }
        }));
        self
    }

    pub fn on_event<F>(mut self, f: F) -> Self
    where
        F: Fn(&ConditionalCacheEvent) + Send + Sync + 'static,
    {
        self.listeners.add(FnListener::new(f));
        self
    }

    /// # Panics
    ///
    /// Panics if `max_entries` is zero.
    pub fn build(self) -> ConditionalCacheLayer {
        let capacity =
            NonZeroUsize::new(self.max_entries).expect("max_entries must be greater than zero");
        ConditionalCacheLayer {
            store: Arc::new(Store {
                entries: Mutex::new(LruCache::new(capacity)),
                ttl: self.ttl,
                name: self.name,
                listeners: self.listeners,
            }),
        }
    }
}

impl Default for ConditionalCacheLayerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Transport wrapped by [`ConditionalCacheLayer`].
#[derive(Clone)]
pub struct ConditionalCache<S> {
    inner: S,
    store: Arc<Store>,
}

impl<S> Service<UpstreamRequest> for ConditionalCache<S>
where
    S: Service<UpstreamRequest, Response = UpstreamResponse> + Clone + Send + 'static,
    S::Error: Send + 'static,
    S::Future: Send + 'static,
{
    type Response = UpstreamResponse;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<UpstreamResponse, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: UpstreamRequest) -> Self::Future {
        let key = request.resource_key().to_string();
        let prior = self.store.live(&key, Instant::now());
        if let Some(prior) = &prior {
            request.headers_mut().insert(IF_NONE_MATCH, prior.etag.clone());
        }

        let clone = self.inner.clone();
        let mut ready = std::mem::replace(&mut self.inner, clone);
        let store = Arc::clone(&self.store);

        Box::pin(async move {
            let response = ready.call(request).await?;
            let now = Instant::now();

            match response.status {
                304 => match prior {
                    Some(prior) => {
                        tracing::debug!(cache = %store.name, key = %key, "not modified, serving snapshot");

                        #[cfg(feature = "metrics")]
                        counter!("conditional_cache_revalidated_total", "cache" => store.name.clone()).increment(1);

                        store.emit(ConditionalCacheEvent::Revalidated {
                            cache: store.name.clone(),
                            at: now,
                            key,
                        });
                        let mut snapshot = prior.snapshot;
                        overlay_live_headers(&mut snapshot.headers, &response.headers);
                        snapshot.from_snapshot = true;
                        Ok(snapshot)
                    }
                    None => Ok(UpstreamResponse {
                        body: bytes::Bytes::new(),
                        from_snapshot: false,
                        ..response
                    }),
                },
                200 => {
                    match response.headers.get(ETAG).cloned() {
                        Some(etag) => {
                            #[cfg(feature = "metrics")]
                            counter!("conditional_cache_stored_total", "cache" => store.name.clone()).increment(1);

                            store.store(&key, etag, response.clone(), now);
                        }
                        None => store.remove(&key, now),
                    }
                    Ok(response)
                }
                _ => Ok(response),
            }
        })
    }
}

/// Copies the headers of a live 304 over a stored snapshot's, keeping the
/// snapshot's validator and the headers describing its body.
fn overlay_live_headers(stored: &mut HeaderMap, live: &HeaderMap) {
    for name in live.keys() {
        if [ETAG, CONTENT_TYPE, CONTENT_LENGTH, CONTENT_ENCODING].contains(name) {
            continue;
        }
        stored.remove(name);
        for value in live.get_all(name) {
            stored.append(name.clone(), value.clone());
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for ConditionalCache<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionalCache")
            .field("inner", &self.inner)
            .field("name", &self.store.name)
            .finish()
    }
}

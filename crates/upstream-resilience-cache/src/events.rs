use tokio::time::Instant;
use upstream_resilience_core::Event;

/// Events emitted by a [`ResultCache`](crate::ResultCache).
#[derive(Debug, Clone)]
pub enum CacheEvent {
    /// A live entry answered the lookup.
    Hit { cache: String, at: Instant, key: String },
    /// No usable entry; the fetch function runs.
    Miss { cache: String, at: Instant, key: String },
    /// A fetched value was stored.
    Stored { cache: String, at: Instant, key: String },
    /// An expired entry was found and dropped.
    Expired { cache: String, at: Instant, key: String },
    /// An entry was pushed out by the capacity bound, or dropped because it
    /// no longer decodes as the requested type.
    Evicted { cache: String, at: Instant, key: String },
    /// A concurrent miss waited on another caller's fetch.
    Coalesced { cache: String, at: Instant, key: String },
}

impl CacheEvent {
    /// The cache key the event concerns.
    pub fn key(&self) -> &str {
        match self {
            CacheEvent::Hit { key, .. }
            | CacheEvent::Miss { key, .. }
            | CacheEvent::Stored { key, .. }
            | CacheEvent::Expired { key, .. }
            | CacheEvent::Evicted { key, .. }
            | CacheEvent::Coalesced { key, .. } => key,
        }
    }
}

impl Event for CacheEvent {
    fn kind(&self) -> &'static str {
        match self {
            CacheEvent::Hit { .. } => "hit",
            CacheEvent::Miss { .. } => "miss",
            CacheEvent::Stored { .. } => "stored",
            CacheEvent::Expired { .. } => "expired",
            CacheEvent::Evicted { .. } => "evicted",
            CacheEvent::Coalesced { .. } => "coalesced",
        }
    }

    fn at(&self) -> Instant {
        match self {
            CacheEvent::Hit { at, .. }
            | CacheEvent::Miss { at, .. }
            | CacheEvent::Stored { at, .. }
            | CacheEvent::Expired { at, .. }
            | CacheEvent::Evicted { at, .. }
            | CacheEvent::Coalesced { at, .. } => *at,
        }
    }

    fn source(&self) -> &str {
        match self {
            CacheEvent::Hit { cache, .. }
            | CacheEvent::Miss { cache, .. }
            | CacheEvent::Stored { cache, .. }
            | CacheEvent::Expired { cache, .. }
            | CacheEvent::Evicted { cache, .. }
            | CacheEvent::Coalesced { cache, .. } => cache,
        }
    }
}

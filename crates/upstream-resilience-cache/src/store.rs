//! Bounded, TTL-aware storage of serialized values.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::time::Instant;

#[derive(Clone, Debug)]
struct Entry {
    bytes: Arc<[u8]>,
    expires_at: Instant,
}

/// Outcome of a lookup.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Lookup {
    Hit(Arc<[u8]>),
    /// The entry existed but had expired; it has been removed.
    Expired,
    Absent,
}

pub(crate) struct Store {
    entries: LruCache<String, Entry>,
}

impl Store {
    pub(crate) fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: LruCache::new(capacity),
        }
    }

    /// Looks up `key`, evicting it lazily if it has expired.
    pub(crate) fn get(&mut self, key: &str, now: Instant) -> Lookup {
        let Some(entry) = self.entries.get(key) else {
            return Lookup::Absent;
        };
        if entry.expires_at <= now {
            self.entries.pop(key);
            return Lookup::Expired;
        }
        Lookup::Hit(Arc::clone(&entry.bytes))
    }

    /// Inserts or replaces `key`. Returns the key pushed out to make room.
    pub(crate) fn insert(&mut self, key: String, bytes: Arc<[u8]>, expires_at: Instant) -> Option<String> {
        let entry = Entry { bytes, expires_at };
        match self.entries.push(key.clone(), entry) {
            Some((evicted, _)) if evicted != key => Some(evicted),
            _ => None,
        }
    }

    pub(crate) fn remove(&mut self, key: &str) -> bool {
        self.entries.pop(key).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

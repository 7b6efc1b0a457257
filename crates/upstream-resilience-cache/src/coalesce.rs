//! Shared fetches for concurrent misses on the same key.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Serialized value handed from the leader to its followers. `None` means
/// the leader's fetch failed and every follower must fetch on its own.
pub(crate) type Shared = Option<Arc<[u8]>>;

pub(crate) enum Role {
    Leader(LeaderGuard),
    Follower(broadcast::Receiver<Shared>),
}

#[derive(Default)]
pub(crate) struct InFlight {
    requests: Mutex<HashMap<String, broadcast::Sender<Shared>>>,
}

impl InFlight {
    /// Becomes the leader for `key`, or subscribes to the running fetch.
    pub(crate) fn join(self: &Arc<Self>, key: &str) -> Role {
        let mut requests = self.requests.lock();
        if let Some(sender) = requests.get(key) {
            return Role::Follower(sender.subscribe());
        }
        let (tx, _rx) = broadcast::channel(1);
        requests.insert(key.to_string(), tx);
        Role::Leader(LeaderGuard {
            in_flight: Arc::clone(self),
            key: key.to_string(),
            done: false,
        })
    }

    fn finish(&self, key: &str, value: Shared) {
        if let Some(sender) = self.requests.lock().remove(key) {
            let _ = sender.send(value);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.requests.lock().len()
    }
}

/// Held by the caller that performs the fetch. Dropping it without
/// [`complete`](Self::complete) (fetch cancelled or panicked) releases the
/// followers with `None`.
pub(crate) struct LeaderGuard {
    in_flight: Arc<InFlight>,
    key: String,
    done: bool,
}

impl LeaderGuard {
    pub(crate) fn complete(mut self, value: Shared) {
        self.done = true;
        self.in_flight.finish(&self.key, value);
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        if !self.done {
            self.in_flight.finish(&self.key, None);
        }
    }
}

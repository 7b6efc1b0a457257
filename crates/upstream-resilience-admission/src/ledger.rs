//! Book-keeping of outstanding grants.
//!
//! Every grant handed out is recorded under `(permit id, tier index)`. A
//! grant leaves the ledger exactly once, either through release or through
//! reclaim, and only a grant that leaves the ledger is returned to its
//! tier's semaphore. Over-release is impossible by construction.

use crate::config::Tier;
use std::collections::HashMap;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct GrantKey {
    pub(crate) permit: u64,
    pub(crate) tier: usize,
}

#[derive(Debug)]
pub(crate) struct Ledger {
    grants: HashMap<GrantKey, Instant>,
    outstanding: Vec<usize>,
}

impl Ledger {
    pub(crate) fn new(tier_count: usize) -> Self {
        Self {
            grants: HashMap::new(),
            outstanding: vec![0; tier_count],
        }
    }

    pub(crate) fn record(&mut self, key: GrantKey, granted_at: Instant) {
        if self.grants.insert(key, granted_at).is_none() {
            self.outstanding[key.tier] += 1;
        }
    }

    /// Removes a grant on release. Returns false if reclaim already took it.
    pub(crate) fn settle(&mut self, key: GrantKey) -> bool {
        if self.grants.remove(&key).is_some() {
            self.outstanding[key.tier] -= 1;
            true
        } else {
            false
        }
    }

    /// Removes every grant on a reclaiming tier that is at least one window
    /// old. Returns the number removed per tier index.
    pub(crate) fn take_expired(&mut self, tiers: &[Tier], now: Instant) -> Vec<usize> {
        let mut reclaimed = vec![0; tiers.len()];
        self.grants.retain(|key, granted_at| {
            let tier = &tiers[key.tier];
            let expired = tier.reclaim && now.saturating_duration_since(*granted_at) >= tier.window;
            if expired {
                reclaimed[key.tier] += 1;
            }
            !expired
        });
        for (outstanding, taken) in self.outstanding.iter_mut().zip(&reclaimed) {
            *outstanding -= taken;
        }
        reclaimed
    }

    pub(crate) fn outstanding(&self, tier: usize) -> usize {
        self.outstanding[tier]
    }
}

use crate::events::AdmissionEvent;
use std::time::Duration;
use tokio::time::Instant;
use upstream_resilience_core::{EventListeners, FnListener};

/// One quota tier: at most `capacity` outstanding grants per `window`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tier {
    pub(crate) name: String,
    pub(crate) capacity: usize,
    pub(crate) window: Duration,
    pub(crate) reclaim: bool,
}

impl Tier {
    /// Creates a tier whose aged grants are reclaimed by the background task.
    pub fn new(name: impl Into<String>, capacity: usize, window: Duration) -> Self {
        Self {
            name: name.into(),
            capacity,
            window,
            reclaim: true,
        }
    }

    /// Excludes this tier from the periodic reclaim; its grants only come
    /// back through release.
    pub fn without_reclaim(mut self) -> Self {
        self.reclaim = false;
        self
    }

    /// Tier name used in events, metrics and snapshots.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Maximum outstanding grants.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Age after which an outstanding grant is reclaimable.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Whether the periodic reclaim scans this tier.
    pub fn reclaims(&self) -> bool {
        self.reclaim
    }
}

/// Validated limiter configuration.
pub struct AdmissionConfig {
    /// Sorted by window, shortest first. Acquisition follows this order.
    pub(crate) tiers: Vec<Tier>,
    pub(crate) reclaim_interval: Duration,
    pub(crate) quota_low_water_mark: Option<u64>,
    pub(crate) event_listeners: EventListeners<AdmissionEvent>,
    pub(crate) name: String,
}

impl AdmissionConfig {
    /// Tiers in acquisition order.
    pub fn tiers(&self) -> &[Tier] {
        &self.tiers
    }

    /// Interval of the background reclaim task.
    pub fn reclaim_interval(&self) -> Duration {
        self.reclaim_interval
    }
}

/// Builder for [`AdmissionLimiter`](crate::AdmissionLimiter).
pub struct AdmissionLimiterBuilder {
    tiers: Vec<Tier>,
    reclaim_interval: Duration,
    quota_low_water_mark: Option<u64>,
    event_listeners: EventListeners<AdmissionEvent>,
    name: String,
}

impl Default for AdmissionLimiterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AdmissionLimiterBuilder {
    /// Creates a builder with no tiers.
    ///
    /// Defaults:
    /// - reclaim_interval: 1 second
    /// - quota_low_water_mark: 0 (pause only when the upstream reports an
    ///   exhausted quota)
    /// - name: `"<unnamed>"`
    pub fn new() -> Self {
        Self {
            tiers: Vec::new(),
            reclaim_interval: Duration::from_secs(1),
            quota_low_water_mark: Some(0),
            event_listeners: EventListeners::new(),
            name: "<unnamed>".to_string(),
        }
    }

    /// Adds the usual short/medium/long tiers: 20 per second, 100 per
    /// minute, 1000 per hour.
    pub fn default_tiers(self) -> Self {
        self.tier("short", 20, Duration::from_secs(1))
            .tier("medium", 100, Duration::from_secs(60))
            .tier("long", 1000, Duration::from_secs(3600))
    }

    /// Adds a reclaiming tier.
    pub fn tier(self, name: impl Into<String>, capacity: usize, window: Duration) -> Self {
        self.add_tier(Tier::new(name, capacity, window))
    }

    /// Adds a fully specified tier.
    pub fn add_tier(mut self, tier: Tier) -> Self {
        self.tiers.push(tier);
        self
    }

    /// Sets how often aged grants are scanned for and reclaimed.
    pub fn reclaim_interval(mut self, interval: Duration) -> Self {
        self.reclaim_interval = interval;
        self
    }

    /// Sets the remaining-quota level at or below which
    /// [`observe_quota`](crate::AdmissionLimiter::observe_quota) pauses
    /// admission until the reported reset.
    pub fn quota_low_water_mark(mut self, remaining: u64) -> Self {
        self.quota_low_water_mark = Some(remaining);
        self
    }

    /// Ignores upstream quota telemetry entirely.
    pub fn disable_quota_feedback(mut self) -> Self {
        self.quota_low_water_mark = None;
        self
    }

    /// Sets the name for this limiter instance (used in events and metrics).
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Registers a callback invoked with the time spent waiting each time a
    /// caller obtains grants from every tier.
    pub fn on_permit_granted<F>(mut self, f: F) -> Self
    where
        F: Fn(Duration) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let AdmissionEvent::PermitGranted { wait, .. } = event {
                f(*wait);
            }
        }));
        self
    }

    /// Registers a callback invoked with the tier name and count whenever
    /// the reclaim returns aged grants to a tier.
    pub fn on_grants_reclaimed<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, usize) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let AdmissionEvent::GrantsReclaimed { tier, count, .. } = event {
                f(tier, *count);
            }
        }));
        self
    }

    /// Registers a callback invoked when quota feedback pauses admission.
    pub fn on_paused<F>(mut self, f: F) -> Self
    where
        F: Fn(Instant) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let AdmissionEvent::AdmissionPaused { until, .. } = event {
                f(*until);
            }
        }));
        self
    }

    /// Builds the limiter.
    ///
    /// # Panics
    ///
    /// Panics if no tier was added, or if any tier has zero capacity or a
    /// zero window, or if the reclaim interval is zero.
    pub fn build(self) -> crate::AdmissionLimiter {
        assert!(!self.tiers.is_empty(), "at least one tier must be configured");
        for tier in &self.tiers {
            assert!(tier.capacity > 0, "tier {:?} must have a non-zero capacity", tier.name);
            assert!(!tier.window.is_zero(), "tier {:?} must have a non-zero window", tier.name);
        }
        assert!(!self.reclaim_interval.is_zero(), "reclaim_interval must be non-zero");

        let mut tiers = self.tiers;
        tiers.sort_by_key(|tier| tier.window);

        crate::AdmissionLimiter::new(AdmissionConfig {
            tiers,
            reclaim_interval: self.reclaim_interval,
            quota_low_water_mark: self.quota_low_water_mark,
            event_listeners: self.event_listeners,
            name: self.name,
        })
    }
}

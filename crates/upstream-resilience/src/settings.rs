//! Deserializable settings for the whole layer.
//!
//! Every field has a default, so an empty JSON object is a valid document.
//! Durations are given in milliseconds.
//!
//! ```json
//! {
//!   "upstream": {
//!     "base_url": "https://api.example.com/v1",
//!     "identification": "industry-planner/1.4 (ops@example.com)"
//!   },
//!   "admission": {
//!     "tiers": [
//!       { "name": "short", "capacity": 20, "window_ms": 1000, "reclaim": false },
//!       { "name": "medium", "capacity": 100, "window_ms": 60000 },
//!       { "name": "long", "capacity": 1000, "window_ms": 3600000 }
//!     ]
//!   },
//!   "breakers": {
//!     "defaults": { "failure_threshold": 3, "recovery_timeout_ms": 30000 },
//!     "overrides": { "backend": { "failure_threshold": 5 } }
//!   }
//! }
//! ```

use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use upstream_resilience_admission::{AdmissionLimiter, Tier};
use upstream_resilience_cache::ResultCache;
use upstream_resilience_circuitbreaker::CircuitBreakerConfig;
use upstream_resilience_client::{ClientBuildError, ConditionalCacheLayer};

/// Problems with a settings document.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings document is not valid: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("at least one admission tier is required")]
    NoTiers,

    #[error("admission tier '{tier}' has zero capacity")]
    ZeroCapacity { tier: String },

    #[error("admission tier '{tier}' has a zero window")]
    ZeroWindow { tier: String },

    #[error("reclaim interval must be greater than zero")]
    ZeroReclaimInterval,

    #[error("{cache} must hold at least one entry")]
    ZeroCacheCapacity { cache: &'static str },

    #[error("breaker '{breaker}' has a zero failure threshold")]
    ZeroFailureThreshold { breaker: String },

    #[error("request deadline must be greater than zero")]
    ZeroDeadline,

    #[error(transparent)]
    Client(#[from] ClientBuildError),
}

/// Root settings document.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResilienceSettings {
    pub upstream: UpstreamSettings,
    pub admission: AdmissionSettings,
    pub result_cache: ResultCacheSettings,
    pub breakers: BreakerSettings,
}

impl ResilienceSettings {
    /// Parses and validates a JSON document.
    pub fn from_json(json: &str) -> Result<Self, SettingsError> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Rejects settings the components would refuse to build with.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.upstream.deadline_ms == 0 {
            return Err(SettingsError::ZeroDeadline);
        }
        if self.upstream.conditional_max_entries == 0 {
            return Err(SettingsError::ZeroCacheCapacity {
                cache: "conditional cache",
            });
        }

        if self.admission.tiers.is_empty() {
            return Err(SettingsError::NoTiers);
        }
        for tier in &self.admission.tiers {
            if tier.capacity == 0 {
                return Err(SettingsError::ZeroCapacity {
                    tier: tier.name.clone(),
                });
            }
            if tier.window_ms == 0 {
                return Err(SettingsError::ZeroWindow {
                    tier: tier.name.clone(),
                });
            }
        }
        if self.admission.reclaim_interval_ms == 0 {
            return Err(SettingsError::ZeroReclaimInterval);
        }

        if self.result_cache.max_entries == 0 {
            return Err(SettingsError::ZeroCacheCapacity {
                cache: "result cache",
            });
        }

        if self.breakers.defaults.failure_threshold == 0 {
            return Err(SettingsError::ZeroFailureThreshold {
                breaker: "defaults".into(),
            });
        }
        for (name, profile) in &self.breakers.overrides {
            if profile.failure_threshold == 0 {
                return Err(SettingsError::ZeroFailureThreshold {
                    breaker: name.clone(),
                });
            }
        }
        Ok(())
    }
}

/// The upstream API and how the client talks to it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UpstreamSettings {
    pub base_url: String,
    /// Sent as `User-Agent`.
    pub identification: String,
    pub deadline_ms: u64,
    pub conditional_ttl_ms: u64,
    pub conditional_max_entries: usize,
    pub remaining_header: String,
    pub reset_header: String,
    /// Name of the registry breaker guarding upstream calls; `null` to call
    /// the upstream unguarded.
    pub breaker: Option<String>,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".into(),
            identification: format!("upstream-resilience/{}", env!("CARGO_PKG_VERSION")),
            deadline_ms: 10_000,
            conditional_ttl_ms: 300_000,
            conditional_max_entries: 10_000,
            remaining_header: "x-ratelimit-remaining".into(),
            reset_header: "x-ratelimit-reset".into(),
            breaker: Some("upstream".into()),
        }
    }
}

impl UpstreamSettings {
    pub(crate) fn conditional_cache(&self) -> ConditionalCacheLayer {
        ConditionalCacheLayer::builder()
            .name("upstream")
            .ttl(Duration::from_millis(self.conditional_ttl_ms))
            .max_entries(self.conditional_max_entries)
            .build()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AdmissionSettings {
    pub tiers: Vec<TierSettings>,
    pub reclaim_interval_ms: u64,
    /// Remaining quota at or below which admission pauses until the
    /// reported reset; `null` ignores quota telemetry.
    pub quota_low_water_mark: Option<u64>,
}

impl Default for AdmissionSettings {
    fn default() -> Self {
        Self {
            tiers: vec![
                TierSettings::new("short", 20, 1_000),
                TierSettings::new("medium", 100, 60_000),
                TierSettings::new("long", 1_000, 3_600_000),
            ],
            reclaim_interval_ms: 1_000,
            quota_low_water_mark: Some(0),
        }
    }
}

impl AdmissionSettings {
    pub(crate) fn limiter(&self) -> AdmissionLimiter {
        let mut builder = AdmissionLimiter::builder()
            .name("upstream")
            .reclaim_interval(Duration::from_millis(self.reclaim_interval_ms));
        for tier in &self.tiers {
            let mut t = Tier::new(tier.name.clone(), tier.capacity, Duration::from_millis(tier.window_ms));
            if !tier.reclaim {
                t = t.without_reclaim();
            }
            builder = builder.add_tier(t);
        }
        match self.quota_low_water_mark {
            Some(mark) => builder.quota_low_water_mark(mark),
            None => builder.disable_quota_feedback(),
        }
        .build()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TierSettings {
    pub name: String,
    pub capacity: usize,
    pub window_ms: u64,
    #[serde(default = "reclaim_by_default")]
    pub reclaim: bool,
}

fn reclaim_by_default() -> bool {
    true
}

impl TierSettings {
    pub fn new(name: impl Into<String>, capacity: usize, window_ms: u64) -> Self {
        Self {
            name: name.into(),
            capacity,
            window_ms,
            reclaim: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResultCacheSettings {
    pub max_entries: usize,
    pub default_ttl_ms: u64,
    /// Share one fetch between concurrent misses on the same key.
    pub coalesce: bool,
}

impl Default for ResultCacheSettings {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            default_ttl_ms: 300_000,
            coalesce: false,
        }
    }
}

impl ResultCacheSettings {
    pub(crate) fn cache(&self) -> ResultCache {
        ResultCache::builder()
            .name("results")
            .max_entries(self.max_entries)
            .default_ttl(Duration::from_millis(self.default_ttl_ms))
            .coalesce(self.coalesce)
            .build()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BreakerSettings {
    pub defaults: BreakerProfile,
    /// Per-dependency profiles, keyed by breaker name.
    pub overrides: BTreeMap<String, BreakerProfile>,
}

/// Thresholds for one breaker.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BreakerProfile {
    pub failure_threshold: u32,
    pub recovery_timeout_ms: u64,
    pub expected_latency_ms: Option<u64>,
    pub monitor_window_ms: Option<u64>,
}

impl Default for BreakerProfile {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 30_000,
            expected_latency_ms: None,
            monitor_window_ms: None,
        }
    }
}

impl BreakerProfile {
    pub(crate) fn config(&self, name: &str) -> CircuitBreakerConfig {
        let mut builder = CircuitBreakerConfig::builder()
            .name(name)
            .failure_threshold(self.failure_threshold)
            .recovery_timeout(Duration::from_millis(self.recovery_timeout_ms));
        if let Some(ms) = self.expected_latency_ms {
            builder = builder.expected_latency(Duration::from_millis(ms));
        }
        if let Some(ms) = self.monitor_window_ms {
            builder = builder.monitor_window(Duration::from_millis(ms));
        }
        builder.build()
    }
}

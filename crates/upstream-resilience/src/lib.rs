//! Resilience layer for outbound calls to a rate-limited, occasionally
//! unavailable HTTP API, plus circuit breakers for any other dependency.
//!
//! Each concern lives in its own crate and is re-exported here:
//!
//! - [`admission`]: tiered admission limiter bounding outbound call rate
//! - [`cache`]: cache-aside result cache with TTL
//! - [`circuitbreaker`]: three-state breaker and the named registry
//! - [`client`]: conditional-GET cache and the fail-soft upstream client
//! - [`core`]: event system and the [`Unavailable`] signal
//!
//! [`Resilience`] is the composition root: it builds every process-wide
//! component once from [`ResilienceSettings`] and hands them out by
//! reference, so there are no ambient globals and tests can create fresh
//! instances freely.
//!
//! ```rust,no_run
//! use upstream_resilience::{Resilience, ResilienceSettings};
//! use upstream_resilience::client::RequestOptions;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! upstream_resilience::init_tracing();
//!
//! let settings = ResilienceSettings::from_json(&std::fs::read_to_string("resilience.json")?)?;
//! let resilience = Resilience::from_settings(&settings)?;
//!
//! let status: Option<serde_json::Value> = resilience
//!     .client()
//!     .get("status", RequestOptions::cached("status", Duration::from_secs(30)))
//!     .await
//!     .ok();
//!
//! let backend = resilience.breaker("backend");
//! let page = backend
//!     .call_with_fallback(
//!         || async { Ok::<_, std::io::Error>("fresh page") },
//!         || async { Ok("degraded page") },
//!     )
//!     .await?;
//! # let _ = (status, page);
//!
//! resilience.shutdown();
//! # Ok(())
//! # }
//! ```

mod settings;

pub use upstream_resilience_admission as admission;
pub use upstream_resilience_cache as cache;
pub use upstream_resilience_circuitbreaker as circuitbreaker;
pub use upstream_resilience_client as client;
pub use upstream_resilience_core as core;

pub use settings::{
    AdmissionSettings, BreakerProfile, BreakerSettings, ResilienceSettings, ResultCacheSettings, SettingsError,
    TierSettings, UpstreamSettings,
};
pub use upstream_resilience_core::{Unavailable, UnavailableKind};

use std::time::Duration;
use tracing::info;
use upstream_resilience_admission::AdmissionLimiter;
use upstream_resilience_cache::ResultCache;
use upstream_resilience_circuitbreaker::{BreakerRegistry, CircuitBreaker};
use upstream_resilience_client::{HttpTransport, UpstreamClient, UpstreamRequest, UpstreamResponse};

/// Owns the process-wide resilience components.
///
/// Cloning shares every component.
#[derive(Clone)]
pub struct Resilience<T = HttpTransport> {
    limiter: AdmissionLimiter,
    breakers: BreakerRegistry,
    results: ResultCache,
    client: UpstreamClient<T>,
}

impl Resilience<HttpTransport> {
    /// Builds every component with a `reqwest` transport and starts the
    /// admission reclaim task.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn from_settings(settings: &ResilienceSettings) -> Result<Self, SettingsError> {
        Self::with_transport(settings, HttpTransport::new()?)
    }
}

impl<T> Resilience<T> {
    /// Like [`from_settings`](Resilience::from_settings) with a caller-supplied
    /// transport.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn with_transport(settings: &ResilienceSettings, transport: T) -> Result<Self, SettingsError>
    where
        T: tower::Service<UpstreamRequest, Response = UpstreamResponse>,
    {
        settings.validate()?;

        let limiter = settings.admission.limiter();
        let results = settings.result_cache.cache();

        let mut registry = BreakerRegistry::builder().defaults(settings.breakers.defaults.config("default"));
        for (name, profile) in &settings.breakers.overrides {
            registry = registry.override_for(name.clone(), profile.config(name));
        }
        let breakers = registry
            .on_state_transition(|name, from, to| {
                info!(breaker = name, %from, %to, "breaker changed state");
            })
            .build();

        let upstream = &settings.upstream;
        let mut client = UpstreamClient::builder(upstream.base_url.clone())
            .identification(upstream.identification.clone())
            .deadline(Duration::from_millis(upstream.deadline_ms))
            .quota_headers(upstream.remaining_header.clone(), upstream.reset_header.clone())
            .limiter(limiter.clone())
            .result_cache(results.clone())
            .conditional_cache(upstream.conditional_cache());
        if let Some(name) = &upstream.breaker {
            client = client.with_breaker(breakers.get_or_create(name));
        }
        let client = client.build(transport)?;

        limiter.start_reclaimer();
        info!(
            base_url = %upstream.base_url,
            tiers = settings.admission.tiers.len(),
            "resilience layer started"
        );

        Ok(Self {
            limiter,
            breakers,
            results,
            client,
        })
    }

    pub fn client(&self) -> &UpstreamClient<T> {
        &self.client
    }

    pub fn limiter(&self) -> &AdmissionLimiter {
        &self.limiter
    }

    pub fn result_cache(&self) -> &ResultCache {
        &self.results
    }

    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    /// The breaker for `dependency`, created on first use.
    pub fn breaker(&self, dependency: &str) -> CircuitBreaker {
        self.breakers.get_or_create(dependency)
    }

    /// Stops the reclaim task and closes admission. In-flight calls finish;
    /// later upstream calls report [`Unavailable::ShuttingDown`].
    pub fn shutdown(&self) {
        self.limiter.shutdown();
        info!("resilience layer shut down");
    }
}

/// Installs a `fmt` subscriber filtered by `RUST_LOG` (default `info`).
///
/// Does nothing if a global subscriber is already set.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

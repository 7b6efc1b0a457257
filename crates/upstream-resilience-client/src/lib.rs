//! Fail-soft client for a rate-limited, occasionally unavailable HTTP API.
//!
//! [`UpstreamClient`] composes the other resilience pieces around every
//! outbound `GET`:
//!
//! 1. a [`ResultCache`](upstream_resilience_cache::ResultCache) lookup when the
//!    caller supplies a cache key;
//! 2. an optional [`CircuitBreaker`](upstream_resilience_circuitbreaker::CircuitBreaker);
//! 3. an [`AdmissionLimiter`](upstream_resilience_admission::AdmissionLimiter)
//!    permit, held only for the duration of the network call;
//! 4. the [`ConditionalCacheLayer`], which revalidates unchanged resources
//!    with `If-None-Match`;
//! 5. a deadline around the transport call.
//!
//! Ordinary unavailability (transport errors, non-200 statuses, undecodable
//! bodies, deadlines) is logged and returned as
//! [`Unavailable`](upstream_resilience_core::Unavailable). Only an open
//! breaker is reported as [`Unavailable::CircuitOpen`](upstream_resilience_core::Unavailable::CircuitOpen),
//! so callers can tell a known-unhealthy upstream from an empty result.
//!
//! ```rust,no_run
//! use upstream_resilience_client::{HttpTransport, RequestOptions, UpstreamClient};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = UpstreamClient::builder("https://api.example.com/v1")
//!     .identification("industry-planner/1.4 (ops@example.com)")
//!     .build(HttpTransport::new()?)?;
//!
//! let prices: Option<Vec<serde_json::Value>> = client
//!     .get("markets/prices", RequestOptions::cached("prices", Duration::from_secs(3600)))
//!     .await
//!     .ok();
//! # let _ = prices;
//! # Ok(())
//! # }
//! ```

mod client;
mod conditional;
mod error;
mod request;
mod transport;

pub use client::{RequestOptions, UpstreamClient, UpstreamClientBuilder};
pub use conditional::{ConditionalCache, ConditionalCacheEvent, ConditionalCacheLayer, ConditionalCacheLayerBuilder};
pub use error::{ClientBuildError, TransportError};
pub use request::{UpstreamRequest, UpstreamResponse};
pub use transport::HttpTransport;

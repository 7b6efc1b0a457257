use crate::conditional::{ConditionalCache, ConditionalCacheLayer};
use crate::error::ClientBuildError;
use crate::request::{UpstreamRequest, UpstreamResponse};
use reqwest::header::{HeaderName, HeaderValue, ACCEPT, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tower::{Layer, Service, ServiceExt};
use tracing::{debug, warn};
use upstream_resilience_admission::{AdmissionLimiter, AdmissionPermit};
use upstream_resilience_cache::ResultCache;
use upstream_resilience_circuitbreaker::{CircuitBreaker, CircuitBreakerError};
use upstream_resilience_core::Unavailable;

#[cfg(feature = "metrics")]
use metrics::{counter, histogram};

/// Per-call options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// When set, the decoded payload is cached under this key.
    pub cache_key: Option<String>,
    /// TTL for the cached payload; the result cache's default when `None`.
    pub ttl: Option<Duration>,
    /// Deadline for the network call; the client's default when `None`.
    pub deadline: Option<Duration>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache the payload under `key` for `ttl`.
    pub fn cached(key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            cache_key: Some(key.into()),
            ttl: Some(ttl),
            deadline: None,
        }
    }

    pub fn cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Client for the rate-limited upstream API.
///
/// Every call follows the same path: result cache, admission permit, breaker
/// (when configured), conditional GET under a deadline, permit release. The
/// breaker times only the round trip, never the wait for admission. Ordinary
/// unavailability never escapes as a panic or transport error; it is returned
/// as [`Unavailable`] with a kind, and `.ok()` gives the plain optional view.
pub struct UpstreamClient<T> {
    inner: Arc<ClientInner<T>>,
}

struct ClientInner<T> {
    base_url: String,
    /// Host of `base_url`, used as the `upstream` metric label.
    upstream: String,
    identification: HeaderValue,
    deadline: Duration,
    remaining_header: HeaderName,
    reset_header: HeaderName,
    limiter: AdmissionLimiter,
    results: ResultCache,
    conditional: ConditionalCacheLayer,
    transport: ConditionalCache<T>,
    breaker: Option<CircuitBreaker>,
}

impl<T> Clone for UpstreamClient<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl UpstreamClient<()> {
    /// Starts a builder for the API at `base_url`.
    pub fn builder(base_url: impl Into<String>) -> UpstreamClientBuilder {
        UpstreamClientBuilder::new(base_url)
    }
}

impl<T> UpstreamClient<T>
where
    T: Service<UpstreamRequest, Response = UpstreamResponse> + Clone + Send + Sync + 'static,
    T::Error: fmt::Display + Send + 'static,
    T::Future: Send + 'static,
{
    /// `GET <base>/<endpoint>` decoded as `P`.
    pub async fn get<P>(&self, endpoint: &str, options: RequestOptions) -> Result<P, Unavailable>
    where
        P: Serialize + DeserializeOwned,
    {
        self.fetch(endpoint, None, options).await
    }

    /// Like [`get`](Self::get), sending `Authorization: Bearer <token>`.
    pub async fn get_authorized<P>(
        &self,
        endpoint: &str,
        token: &str,
        options: RequestOptions,
    ) -> Result<P, Unavailable>
    where
        P: Serialize + DeserializeOwned,
    {
        self.fetch(endpoint, Some(token), options).await
    }

    async fn fetch<P>(&self, endpoint: &str, token: Option<&str>, options: RequestOptions) -> Result<P, Unavailable>
    where
        P: Serialize + DeserializeOwned,
    {
        let deadline = options.deadline;
        match options.cache_key {
            Some(key) => {
                self.inner
                    .results
                    .try_get_or_set(&key, options.ttl, || self.guarded(endpoint, token, deadline))
                    .await
            }
            None => self.guarded(endpoint, token, deadline).await,
        }
    }

    async fn guarded<P>(&self, endpoint: &str, token: Option<&str>, deadline: Option<Duration>) -> Result<P, Unavailable>
    where
        P: DeserializeOwned,
    {
        let request = self.request(endpoint, token)?;
        let permit = self
            .inner
            .limiter
            .acquire()
            .await
            .map_err(|_| Unavailable::ShuttingDown)?;

        let Some(breaker) = &self.inner.breaker else {
            return self.fetch_once(endpoint, request, permit, deadline).await;
        };

        // A rejected call drops the closure, and with it the permit.
        breaker
            .call_classified(
                move || self.fetch_once(endpoint, request, permit, deadline),
                |result| matches!(result, Err(err) if err.indicates_unhealthy_dependency()),
            )
            .await
            .map_err(|err| match err {
                CircuitBreakerError::Open { name } => {
                    debug!(breaker = %name, endpoint, "upstream breaker open, not calling");
                    Unavailable::CircuitOpen { name }
                }
                CircuitBreakerError::Inner(err) => err,
            })
    }

    async fn fetch_once<P>(
        &self,
        endpoint: &str,
        request: UpstreamRequest,
        permit: AdmissionPermit,
        deadline: Option<Duration>,
    ) -> Result<P, Unavailable>
    where
        P: DeserializeOwned,
    {
        let result = self.exchange(endpoint, request, permit, deadline).await;

        #[cfg(feature = "metrics")]
        {
            let outcome = match &result {
                Ok(_) => "ok",
                Err(err) => err.kind().as_str(),
            };
            counter!(
                "upstream_requests_total",
                "upstream" => self.inner.upstream.clone(),
                "outcome" => outcome
            )
            .increment(1);
        }

        let response = result?;
        serde_json::from_slice(&response.body).map_err(|err| {
            warn!(endpoint, error = %err, "upstream payload did not decode");
            Unavailable::Decode(err.to_string())
        })
    }

    /// Builds the outbound GET with identification and optional bearer.
    fn request(&self, endpoint: &str, token: Option<&str>) -> Result<UpstreamRequest, Unavailable> {
        let url = self.endpoint_url(endpoint)?;
        let request = UpstreamRequest::get(url)
            .header(USER_AGENT, self.inner.identification.clone())
            .header(ACCEPT, HeaderValue::from_static("application/json"));
        match token {
            Some(token) => request
                .bearer(token)
                .map_err(|_| Unavailable::Transport("bearer credential is not a valid header value".into())),
            None => Ok(request),
        }
    }

    /// One permit-scoped round trip. Returns the response only for status 200.
    async fn exchange(
        &self,
        endpoint: &str,
        request: UpstreamRequest,
        permit: AdmissionPermit,
        deadline: Option<Duration>,
    ) -> Result<UpstreamResponse, Unavailable> {
        let inner = &self.inner;
        let deadline = deadline.unwrap_or(inner.deadline);
        let started = tokio::time::Instant::now();
        let outcome = tokio::time::timeout(deadline, inner.transport.clone().oneshot(request)).await;
        permit.release();

        #[cfg(feature = "metrics")]
        histogram!("upstream_request_duration_seconds", "upstream" => inner.upstream.clone())
            .record(started.elapsed().as_secs_f64());

        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                warn!(endpoint, error = %err, "upstream transport failed");
                return Err(Unavailable::Transport(err.to_string()));
            }
            Err(_) => {
                // The transport future is dropped here; reqwest aborts the
                // connection, other transports may keep working in background.
                warn!(endpoint, ?deadline, "upstream call exceeded its deadline");
                return Err(Unavailable::DeadlineExceeded);
            }
        };

        self.observe_quota(&response);
        debug!(
            endpoint,
            status = response.status,
            from_snapshot = response.from_snapshot,
            elapsed = ?started.elapsed(),
            "upstream responded"
        );

        match response.status {
            200 => Ok(response),
            304 => Err(Unavailable::NotModified),
            status => {
                debug!(endpoint, status, "upstream returned a non-success status");
                Err(Unavailable::Status(status))
            }
        }
    }

    /// Feeds quota telemetry headers into the limiter.
    fn observe_quota(&self, response: &UpstreamResponse) {
        let inner = &self.inner;
        let remaining = response
            .header(inner.remaining_header.as_str())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let reset = response
            .header(inner.reset_header.as_str())
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .map(Duration::from_secs_f64);

        if let (Some(remaining), Some(reset)) = (remaining, reset) {
            debug!(remaining, reset_after = ?reset, "upstream quota telemetry");
            inner.limiter.observe_quota(remaining, reset);
        }
    }
}

impl<T> UpstreamClient<T> {
    fn endpoint_url(&self, endpoint: &str) -> Result<String, Unavailable> {
        let url = format!(
            "{}/{}",
            self.inner.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        );
        reqwest::Url::parse(&url).map_err(|err| Unavailable::InvalidEndpoint(format!("{endpoint}: {err}")))?;
        Ok(url)
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    pub fn limiter(&self) -> &AdmissionLimiter {
        &self.inner.limiter
    }

    pub fn result_cache(&self) -> &ResultCache {
        &self.inner.results
    }

    pub fn conditional_cache(&self) -> &ConditionalCacheLayer {
        &self.inner.conditional
    }

    pub fn breaker(&self) -> Option<&CircuitBreaker> {
        self.inner.breaker.as_ref()
    }
}

impl<T> fmt::Debug for UpstreamClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamClient")
            .field("base_url", &self.inner.base_url)
            .field("upstream", &self.inner.upstream)
            .field("deadline", &self.inner.deadline)
            .field("breaker", &self.inner.breaker.as_ref().map(CircuitBreaker::name))
            .finish()
    }
}

/// Builder for [`UpstreamClient`].
pub struct UpstreamClientBuilder {
    base_url: String,
    identification: String,
    deadline: Duration,
    remaining_header: String,
    reset_header: String,
    limiter: Option<AdmissionLimiter>,
    results: Option<ResultCache>,
    conditional: Option<ConditionalCacheLayer>,
    breaker: Option<CircuitBreaker>,
}

impl UpstreamClientBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            identification: format!("upstream-resilience/{}", env!("CARGO_PKG_VERSION")),
            deadline: Duration::from_secs(10),
            remaining_header: String::from("x-ratelimit-remaining"),
            reset_header: String::from("x-ratelimit-reset"),
            limiter: None,
            results: None,
            conditional: None,
            breaker: None,
        }
    }

    /// Sent as `User-Agent` on every request.
    ///
    /// Default: `upstream-resilience/<version>`
    pub fn identification(mut self, identification: impl Into<String>) -> Self {
        self.identification = identification.into();
        self
    }

    /// Default deadline for the network call.
    ///
    /// Default: 10 seconds
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Names of the headers carrying remaining quota and seconds until reset.
    ///
    /// Default: `x-ratelimit-remaining`, `x-ratelimit-reset`
    pub fn quota_headers(mut self, remaining: impl Into<String>, reset: impl Into<String>) -> Self {
        self.remaining_header = remaining.into();
        self.reset_header = reset.into();
        self
    }

    /// Admission limiter shared with other clients of the same upstream.
    ///
    /// Default: a limiter with the 20/s, 100/min, 1000/h tiers
    pub fn limiter(mut self, limiter: AdmissionLimiter) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Default: a result cache with default settings
    pub fn result_cache(mut self, cache: ResultCache) -> Self {
        self.results = Some(cache);
        self
    }

    /// Default: 5 minute TTL, 10 000 entries
    pub fn conditional_cache(mut self, layer: ConditionalCacheLayer) -> Self {
        self.conditional = Some(layer);
        self
    }

    /// Guards every network call with `breaker`. Only failures indicating an
    /// unhealthy upstream (transport errors, deadlines, 5xx, 429) count.
    pub fn with_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = Some(breaker);
        self
    }

    /// Builds the client on top of `transport`.
    pub fn build<T>(self, transport: T) -> Result<UpstreamClient<T>, ClientBuildError> {
        let parsed = reqwest::Url::parse(&self.base_url).map_err(|err| ClientBuildError::InvalidBaseUrl {
            url: self.base_url.clone(),
            reason: err.to_string(),
        })?;
        let upstream = parsed.host_str().unwrap_or("unknown").to_string();
        let identification = HeaderValue::from_str(&self.identification)
            .map_err(|_| ClientBuildError::InvalidIdentification(self.identification.clone()))?;
        let remaining_header = header_name(&self.remaining_header)?;
        let reset_header = header_name(&self.reset_header)?;

        let limiter = self
            .limiter
            .unwrap_or_else(|| AdmissionLimiter::builder().name("upstream").default_tiers().build());
        let results = self
            .results
            .unwrap_or_else(|| ResultCache::builder().name("upstream").build());
        let conditional = self
            .conditional
            .unwrap_or_else(|| ConditionalCacheLayer::builder().name("upstream").build());

        Ok(UpstreamClient {
            inner: Arc::new(ClientInner {
                base_url: self.base_url,
                upstream,
                identification,
                deadline: self.deadline,
                remaining_header,
                reset_header,
                limiter,
                results,
                transport: conditional.layer(transport),
                conditional,
                breaker: self.breaker,
            }),
        })
    }
}

fn header_name(name: &str) -> Result<HeaderName, ClientBuildError> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| ClientBuildError::InvalidHeaderName(name.to_string()))
}

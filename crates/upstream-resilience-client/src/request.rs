//! Transport-level request and response values.

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, InvalidHeaderValue, AUTHORIZATION};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// An outbound `GET`.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    url: String,
    headers: HeaderMap,
    resource_key: String,
}

impl UpstreamRequest {
    pub fn get(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            resource_key: url.clone(),
            url,
            headers: HeaderMap::new(),
        }
    }

    /// Sets a header, replacing any previous value.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Attaches `Authorization: Bearer <token>`.
    ///
    /// The resource key gains a fingerprint of the token so responses cached
    /// for one credential are never served to another.
    pub fn bearer(mut self, token: &str) -> Result<Self, InvalidHeaderValue> {
        let mut value = HeaderValue::from_str(&format!("Bearer {token}"))?;
        value.set_sensitive(true);
        self.headers.insert(AUTHORIZATION, value);

        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        self.resource_key = format!("{}#{:016x}", self.url, hasher.finish());
        Ok(self)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub(crate) fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Identity of the resource for conditional caching: the URL, plus a
    /// credential fingerprint for authorized requests.
    pub fn resource_key(&self) -> &str {
        &self.resource_key
    }
}

/// A received (or snapshot-served) response.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// True when the body came from a stored snapshot after the upstream
    /// answered "not modified".
    pub from_snapshot: bool,
}

impl UpstreamResponse {
    pub fn new(status: u16, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
            from_snapshot: false,
        }
    }

    /// The header's value if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

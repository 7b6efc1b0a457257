use thiserror::Error;

/// Failure of the transport to produce a response.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("reading response body failed: {0}")]
    Body(#[source] reqwest::Error),

    #[error("{0}")]
    Other(String),
}

/// Errors building an [`UpstreamClient`](crate::UpstreamClient) or its transport.
#[derive(Debug, Error)]
pub enum ClientBuildError {
    #[error("invalid base url '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("invalid identification string: {0}")]
    InvalidIdentification(String),

    #[error("invalid header name: {0}")]
    InvalidHeaderName(String),

    #[error("failed to build http client: {0}")]
    Http(#[source] reqwest::Error),
}

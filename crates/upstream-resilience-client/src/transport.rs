use crate::error::{ClientBuildError, TransportError};
use crate::request::{UpstreamRequest, UpstreamResponse};
use futures::future::BoxFuture;
use std::task::{Context, Poll};
use tower::Service;

/// `reqwest`-backed transport.
///
/// Sends exactly the headers on the request; identification and accept
/// headers are the caller's business.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, ClientBuildError> {
        let client = reqwest::Client::builder().build().map_err(ClientBuildError::Http)?;
        Ok(Self { client })
    }

    /// Wraps a preconfigured client (proxies, TLS roots, pools).
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Service<UpstreamRequest> for HttpTransport {
    type Response = UpstreamResponse;
    type Error = TransportError;
    type Future = BoxFuture<'static, Result<UpstreamResponse, TransportError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: UpstreamRequest) -> Self::Future {
        let builder = self
            .client
            .get(request.url())
            .headers(request.headers().clone());

        Box::pin(async move {
            let response = builder.send().await.map_err(TransportError::Request)?;
            let status = response.status().as_u16();
            let headers = response.headers().clone();
            let body = response.bytes().await.map_err(TransportError::Body)?;
            Ok(UpstreamResponse::new(status, headers, body))
        })
    }
}

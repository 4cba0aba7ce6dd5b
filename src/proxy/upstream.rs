//! Upstream transport.
//!
//! [`UpstreamClient`] is the one seam between the route handlers and the
//! network: hand it a request, get back a status, headers and a body stream.
//! A transport failure is an [`UpstreamError`]; an upstream that answers with
//! 401 or 500 is a successful exchange.

use std::time::Duration;

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Method, StatusCode};
use reqwest::Client;
use thiserror::Error;
use url::Url;

use crate::proxy::pool::PoolConfig;
use crate::proxy::timeout::TimeoutConfig;

/// Request body handed to the transport.
pub enum OutboundBody {
    Empty,
    /// Fully known bytes, e.g. a rewritten JSON document.
    Buffered(Bytes),
    /// Inbound body relayed as it arrives.
    Streaming(Body),
}

pub struct UpstreamRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: OutboundBody,
}

pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Body,
}

/// Failure to complete an exchange with the upstream.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Connection refused, DNS failure, TLS handshake failure
    #[error("connection to upstream failed: {0}")]
    Connect(String),

    #[error("upstream did not respond within {0}s")]
    Timeout(u64),

    #[error("upstream transport error: {0}")]
    Transport(String),

    /// The outbound request could not be constructed
    #[error("invalid upstream request: {0}")]
    InvalidRequest(String),
}

impl UpstreamError {
    fn from_reqwest(err: reqwest::Error, limit: Duration) -> Self {
        if err.is_builder() {
            UpstreamError::InvalidRequest(err.to_string())
        } else if err.is_timeout() {
            UpstreamError::Timeout(limit.as_secs())
        } else if err.is_connect() {
            UpstreamError::Connect(err.to_string())
        } else {
            UpstreamError::Transport(err.to_string())
        }
    }
}

#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamError>;
}

/// `reqwest`-backed transport. Connection pooling lives inside the client.
pub struct HttpUpstream {
    client: Client,
    timeout_config: TimeoutConfig,
}

impl HttpUpstream {
    pub fn new(timeout_config: TimeoutConfig, pool_config: PoolConfig) -> Result<Self, UpstreamError> {
        let client = Client::builder()
            .connect_timeout(timeout_config.connect)
            .timeout(timeout_config.request)
            .pool_idle_timeout(Some(pool_config.pool_idle_timeout))
            .pool_max_idle_per_host(pool_config.pool_max_idle_per_host)
            .build()
            .map_err(|e| UpstreamError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            timeout_config,
        })
    }
}

#[async_trait]
impl UpstreamClient for HttpUpstream {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamError> {
        let UpstreamRequest {
            method,
            url,
            headers,
            body,
        } = request;

        let mut builder = self.client.request(method, url).headers(headers);
        builder = match body {
            OutboundBody::Empty => builder,
            OutboundBody::Buffered(bytes) => builder.body(bytes),
            OutboundBody::Streaming(body) => {
                builder.body(reqwest::Body::wrap_stream(body.into_data_stream()))
            }
        };

        let response = builder
            .send()
            .await
            .map_err(|e| UpstreamError::from_reqwest(e, self.timeout_config.request))?;

        let status = response.status();
        let headers = response.headers().clone();
        Ok(UpstreamResponse {
            status,
            headers,
            body: Body::from_stream(response.bytes_stream()),
        })
    }
}

/// Join `path` onto the base URL segment by segment.
///
/// Empty and `.` segments are dropped and `..` only removes segments that came
/// from `path`, so a request can never climb above the base URL's own path.
/// A trailing slash on `path` is kept. `query` replaces any base query.
pub fn build_upstream_url(base: &Url, path: &str, query: Option<&str>) -> Url {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    let mut joined = base.path().trim_end_matches('/').to_string();
    for segment in &segments {
        joined.push('/');
        joined.push_str(segment);
    }
    if joined.is_empty() || (path.ends_with('/') && !segments.is_empty()) {
        joined.push('/');
    }

    let mut url = base.clone();
    url.set_path(&joined);
    url.set_query(query.filter(|q| !q.is_empty()));
    url.set_fragment(None);
    url
}

#![allow(dead_code, unreachable_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderValue, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use parking_lot::Mutex;
use serde_json::Value;
use url::Url;

use llm_proxy::config::{Config, Settings};
use llm_proxy::proxy::router::{build_router, RouterEngine};
use llm_proxy::proxy::timeout::TimeoutConfig;
use llm_proxy::proxy::upstream::{
    OutboundBody, UpstreamClient, UpstreamError, UpstreamRequest, UpstreamResponse,
};

pub const UPSTREAM_URL: &str = "http://upstream.test";

pub fn settings(mappings: &[(&str, &str)], api_key: Option<&str>) -> Settings {
    settings_with_url(UPSTREAM_URL, mappings, api_key)
}

pub fn settings_with_url(url: &str, mappings: &[(&str, &str)], api_key: Option<&str>) -> Settings {
    Config {
        upstream_url: url.to_string(),
        upstream_api_key: api_key.map(str::to_string),
        model_mappings: mappings
            .iter()
            .map(|(alias, target)| (alias.to_string(), target.to_string()))
            .collect::<HashMap<_, _>>(),
        ..Config::default()
    }
    .validate()
    .expect("test settings should validate")
}

pub fn router(settings: &Settings, upstream: Arc<dyn UpstreamClient>) -> Router {
    router_with_timeouts(settings, upstream, TimeoutConfig::default())
}

pub fn router_with_timeouts(
    settings: &Settings,
    upstream: Arc<dyn UpstreamClient>,
    timeouts: TimeoutConfig,
) -> Router {
    let engine = RouterEngine::new(settings, upstream, timeouts).expect("engine should build");
    build_router(engine)
}

/// What the proxy sent upstream.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl CapturedRequest {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("outbound body should be JSON")
    }
}

pub struct CannedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Body,
}

impl CannedResponse {
    pub fn json(status: u16, value: Value) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Self {
            status: StatusCode::from_u16(status).unwrap(),
            headers,
            body: Body::from(value.to_string()),
        }
    }

    pub fn text(status: u16, content_type: &'static str, body: &'static str) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        Self {
            status: StatusCode::from_u16(status).unwrap(),
            headers,
            body: Body::from(body),
        }
    }

    /// Event-stream body delivered as one frame per chunk.
    pub fn chunks(chunks: Vec<&'static str>) -> Self {
        let stream = futures_util::stream::iter(
            chunks
                .into_iter()
                .map(|chunk| Ok::<_, std::io::Error>(Bytes::from(chunk))),
        );
        Self::stream(Body::from_stream(stream))
    }

    pub fn stream(body: Body) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
        Self {
            status: StatusCode::OK,
            headers,
            body,
        }
    }

    pub fn with_header(mut self, name: &'static str, value: &'static str) -> Self {
        self.headers.insert(name, HeaderValue::from_static(value));
        self
    }
}

/// Records every request and answers from a queue (200 `{}` once empty).
#[derive(Default)]
pub struct MockUpstream {
    requests: Mutex<Vec<CapturedRequest>>,
    responses: Mutex<VecDeque<CannedResponse>>,
}

impl MockUpstream {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_response(response: CannedResponse) -> Arc<Self> {
        let mock = Self::default();
        mock.responses.lock().push_back(response);
        Arc::new(mock)
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().clone()
    }

    pub fn only_request(&self) -> CapturedRequest {
        let requests = self.requests();
        assert_eq!(requests.len(), 1, "expected exactly one upstream request");
        requests.into_iter().next().unwrap()
    }
}

#[async_trait]
impl UpstreamClient for MockUpstream {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamError> {
        let body = match request.body {
            OutboundBody::Empty => Bytes::new(),
            OutboundBody::Buffered(bytes) => bytes,
            OutboundBody::Streaming(body) => body
                .collect()
                .await
                .map_err(|e| UpstreamError::Transport(e.to_string()))?
                .to_bytes(),
        };
        self.requests.lock().push(CapturedRequest {
            method: request.method,
            url: request.url,
            headers: request.headers,
            body,
        });

        let canned = self
            .responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| CannedResponse::json(200, serde_json::json!({})));
        Ok(UpstreamResponse {
            status: canned.status,
            headers: canned.headers,
            body: canned.body,
        })
    }
}

/// Fails every exchange the way a refused connection does.
pub struct UnreachableUpstream;

#[async_trait]
impl UpstreamClient for UnreachableUpstream {
    async fn send(&self, _request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamError> {
        Err(UpstreamError::Connect("connection refused".to_string()))
    }
}

/// Fails the test if the proxy contacts the upstream at all.
pub struct PanicUpstream;

#[async_trait]
impl UpstreamClient for PanicUpstream {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamError> {
        panic!("upstream must not be contacted, got {} {}", request.method, request.url);
    }
}

/// Sets its flag when dropped.
pub struct DropFlag(pub Arc<AtomicBool>);

impl DropFlag {
    pub fn new() -> (Self, Arc<AtomicBool>) {
        let flag = Arc::new(AtomicBool::new(false));
        (Self(flag.clone()), flag)
    }
}

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

pub fn post_json(path: &str, value: &Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(path)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(value.to_string()))
        .unwrap()
}

/// A request whose body never arrives.
pub fn stalled(method: Method, path: &str) -> Request<Body> {
    let body = futures_util::stream::pending::<Result<Bytes, std::io::Error>>();
    Request::builder()
        .method(method)
        .uri(path)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from_stream(body))
        .unwrap()
}

pub fn get(path: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(path)
        .body(Body::empty())
        .unwrap()
}

/// Drive one request through the router and collect the whole response.
pub async fn send(app: Router, req: Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
    let resp = tower::ServiceExt::oneshot(app, req).await.unwrap();
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, body)
}

pub fn json(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).expect("response body should be JSON")
}

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::{Body, Bytes, HttpBody as _};
use axum::extract::{Extension, State};
use axum::http::header::{InvalidHeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use http_body_util::BodyExt;
use url::Url;
use uuid::Uuid;

use crate::config::Settings;
use crate::proxy::error::{ErrorResponse, ProxyError};
use crate::proxy::headers::{relay_response_headers, HeaderPolicy};
use crate::proxy::health::HealthHandler;
use crate::proxy::model_map::ModelMap;
use crate::proxy::model_rewrite::{
    reverse_model_in_response, reverse_model_listing, rewrite_request, ModelMapping,
};
use crate::proxy::relay::RelayStream;
use crate::proxy::timeout::{BodyDeadline, BodyReadTimeout, DeadlineBody, TimeoutConfig};
use crate::proxy::upstream::{
    build_upstream_url, OutboundBody, UpstreamClient, UpstreamRequest, UpstreamResponse,
};

pub const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";
pub const MESSAGES_PATH: &str = "/v1/messages";
pub const MODELS_PATH: &str = "/v1/models";
pub const HEALTH_PATH: &str = "/health";

/// Per-request id assigned by the access-log middleware.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Endpoints whose JSON body carries a `model` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelRoute {
    ChatCompletions,
    Messages,
}

impl ModelRoute {
    pub fn path(self) -> &'static str {
        match self {
            ModelRoute::ChatCompletions => CHAT_COMPLETIONS_PATH,
            ModelRoute::Messages => MESSAGES_PATH,
        }
    }
}

/// Shared, read-only state behind every route.
#[derive(Clone)]
pub struct RouterEngine {
    health: Arc<HealthHandler>,
    upstream: Arc<dyn UpstreamClient>,
    upstream_url: Arc<Url>,
    models: Arc<ModelMap>,
    headers: Arc<HeaderPolicy>,
    body_timeout: Duration,
}

impl RouterEngine {
    pub fn new(
        settings: &Settings,
        upstream: Arc<dyn UpstreamClient>,
        timeout_config: TimeoutConfig,
    ) -> Result<Self, InvalidHeaderValue> {
        Ok(Self {
            health: Arc::new(HealthHandler::new()),
            upstream,
            upstream_url: Arc::new(settings.upstream_url.clone()),
            models: Arc::new(ModelMap::new(settings.model_mappings.clone())),
            headers: Arc::new(HeaderPolicy::new(settings.upstream_api_key.as_deref())?),
            body_timeout: timeout_config.inbound,
        })
    }

    /// Chat-completions and messages: rewrite `model`, forward, map it back.
    pub async fn forward_model_request(
        &self,
        route: ModelRoute,
        req: Request<Body>,
        request_id: &RequestId,
    ) -> Result<Response, ProxyError> {
        let (parts, body) = req.into_parts();
        let raw = self.read_body(body).await?;
        tracing::debug!(
            request_id = %request_id,
            path = route.path(),
            body = %String::from_utf8_lossy(&raw),
            "Model request body"
        );

        let rewritten = rewrite_request(&raw, &self.models)?;
        let url = build_upstream_url(&self.upstream_url, route.path(), parts.uri.query());
        let headers = self.headers.outbound_json(&parts.headers, rewritten.body.len());

        let upstream = self
            .upstream
            .send(UpstreamRequest {
                method: parts.method,
                url,
                headers,
                body: OutboundBody::Buffered(rewritten.body),
            })
            .await?;

        if route == ModelRoute::Messages && upstream.status != StatusCode::OK {
            return relay_upstream_error(upstream, request_id).await;
        }

        if rewritten.stream {
            Ok(stream_response(upstream, request_id))
        } else {
            buffered_response(upstream, &rewritten.mapping).await
        }
    }

    /// Model listing: forward unchanged, map `data[*].id` back to aliases.
    pub async fn forward_models(
        &self,
        req: Request<Body>,
        request_id: &RequestId,
    ) -> Result<Response, ProxyError> {
        let (parts, _body) = req.into_parts();
        let url = build_upstream_url(&self.upstream_url, MODELS_PATH, parts.uri.query());
        tracing::debug!(request_id = %request_id, target = %url, "Listing models");

        let UpstreamResponse {
            status,
            headers,
            body,
        } = self
            .upstream
            .send(UpstreamRequest {
                method: parts.method,
                url,
                headers: self.headers.outbound(&parts.headers),
                body: OutboundBody::Empty,
            })
            .await?;

        let bytes = body
            .collect()
            .await
            .map_err(|e| ProxyError::ReadListing(e.to_string()))?
            .to_bytes();
        match reverse_model_listing(&bytes, &self.models) {
            Some(rewritten) => {
                let mut headers = HeaderMap::new();
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                Ok(build_response(status, headers, Body::from(rewritten)))
            }
            None => Ok(build_response(
                status,
                relay_response_headers(&headers),
                Body::from(bytes),
            )),
        }
    }

    /// Anything else: same method, path and query upstream, body untouched.
    pub async fn forward_passthrough(
        &self,
        req: Request<Body>,
        request_id: &RequestId,
    ) -> Result<Response, ProxyError> {
        let deadline = req.extensions().get::<BodyDeadline>().cloned();
        let (parts, body) = req.into_parts();
        let url = build_upstream_url(&self.upstream_url, parts.uri.path(), parts.uri.query());
        tracing::debug!(
            request_id = %request_id,
            uri = %parts.uri,
            target = %url,
            "Passthrough"
        );

        let upstream = self
            .upstream
            .send(UpstreamRequest {
                method: parts.method,
                url,
                headers: self.headers.outbound(&parts.headers),
                body: if body.is_end_stream() {
                    OutboundBody::Empty
                } else {
                    OutboundBody::Streaming(body)
                },
            })
            .await
            .map_err(|e| match deadline {
                // The transport only saw a broken body; the client stalled.
                Some(deadline) if deadline.expired() => ProxyError::ReadBody(
                    BodyReadTimeout(self.body_timeout.as_secs()).to_string(),
                ),
                _ => ProxyError::from(e),
            })?;

        Ok(stream_response(upstream, request_id))
    }

    async fn read_body(&self, body: Body) -> Result<Bytes, ProxyError> {
        let collected = body
            .collect()
            .await
            .map_err(|e| ProxyError::ReadBody(e.to_string()))?;
        Ok(collected.to_bytes())
    }
}

fn build_response(status: StatusCode, headers: HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

async fn collect_upstream_body(body: Body) -> Result<Bytes, ProxyError> {
    body.collect()
        .await
        .map(|collected| collected.to_bytes())
        .map_err(|e| ProxyError::UpstreamBody(e.to_string()))
}

/// Relay the upstream body chunk by chunk. Headers go out before any byte.
fn stream_response(upstream: UpstreamResponse, request_id: &RequestId) -> Response {
    let relay = RelayStream::new(upstream.body.into_data_stream(), request_id.0.clone());
    build_response(
        upstream.status,
        relay_response_headers(&upstream.headers),
        Body::from_stream(relay),
    )
}

/// Read the whole upstream body and map `model` back when it echoes ours.
async fn buffered_response(
    upstream: UpstreamResponse,
    mapping: &ModelMapping,
) -> Result<Response, ProxyError> {
    let UpstreamResponse {
        status,
        headers,
        body,
    } = upstream;
    let bytes = collect_upstream_body(body).await?;
    let mut headers = relay_response_headers(&headers);

    let body = match reverse_model_in_response(&bytes, mapping) {
        Some(rewritten) => {
            // The upstream length described the old body; hyper recomputes it.
            headers.remove(CONTENT_LENGTH);
            rewritten
        }
        None => bytes,
    };
    Ok(build_response(status, headers, Body::from(body)))
}

/// Messages route, upstream said no: pass its status and body on as JSON.
async fn relay_upstream_error(
    upstream: UpstreamResponse,
    request_id: &RequestId,
) -> Result<Response, ProxyError> {
    let status = upstream.status;
    let bytes = collect_upstream_body(upstream.body).await?;
    tracing::error!(
        request_id = %request_id,
        status = status.as_u16(),
        body = %String::from_utf8_lossy(&bytes),
        "Upstream returned error"
    );

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(build_response(status, headers, Body::from(bytes)))
}

pub fn build_router(engine: RouterEngine) -> Router {
    let body_timeout = engine.body_timeout;
    Router::new()
        .route(HEALTH_PATH, get(health_handler).fallback(passthrough_handler))
        .route(
            CHAT_COMPLETIONS_PATH,
            post(chat_completions_handler).fallback(passthrough_handler),
        )
        .route(
            MESSAGES_PATH,
            post(messages_handler).fallback(passthrough_handler),
        )
        .route(MODELS_PATH, get(models_handler).fallback(passthrough_handler))
        .fallback(passthrough_handler)
        .with_state(engine)
        .layer(middleware::from_fn_with_state(body_timeout, read_deadline))
        .layer(middleware::from_fn(access_log))
}

async fn health_handler(State(state): State<RouterEngine>) -> Response {
    state.health.handle()
}

async fn chat_completions_handler(
    State(state): State<RouterEngine>,
    Extension(request_id): Extension<RequestId>,
    req: Request<Body>,
) -> Response {
    let result = state
        .forward_model_request(ModelRoute::ChatCompletions, req, &request_id)
        .await;
    respond(result, &request_id)
}

async fn messages_handler(
    State(state): State<RouterEngine>,
    Extension(request_id): Extension<RequestId>,
    req: Request<Body>,
) -> Response {
    let result = state
        .forward_model_request(ModelRoute::Messages, req, &request_id)
        .await;
    respond(result, &request_id)
}

async fn models_handler(
    State(state): State<RouterEngine>,
    Extension(request_id): Extension<RequestId>,
    req: Request<Body>,
) -> Response {
    let result = state.forward_models(req, &request_id).await;
    respond(result, &request_id)
}

async fn passthrough_handler(
    State(state): State<RouterEngine>,
    Extension(request_id): Extension<RequestId>,
    req: Request<Body>,
) -> Response {
    let result = state.forward_passthrough(req, &request_id).await;
    respond(result, &request_id)
}

fn respond(result: Result<Response, ProxyError>, request_id: &RequestId) -> Response {
    match result {
        Ok(resp) => resp,
        Err(e) => {
            if e.status_code().is_server_error() {
                tracing::error!(
                    request_id = %request_id,
                    error = %e,
                    error_type = %e.error_type(),
                    "Request failed"
                );
            } else {
                tracing::debug!(
                    request_id = %request_id,
                    error = %e,
                    error_type = %e.error_type(),
                    "Rejected request"
                );
            }
            ErrorResponse::from_error(&e, &request_id.0)
        }
    }
}

/// Bound the time to receive a request body, whichever route reads it.
async fn read_deadline(State(limit): State<Duration>, req: Request<Body>, next: Next) -> Response {
    if req.body().is_end_stream() {
        return next.run(req).await;
    }

    let (mut parts, body) = req.into_parts();
    let deadline = BodyDeadline::default();
    parts.extensions.insert(deadline.clone());
    let body = Body::from_stream(DeadlineBody::new(body.into_data_stream(), limit, deadline));
    next.run(Request::from_parts(parts, body)).await
}

/// Tag the request with an id and log one line per request.
async fn access_log(mut req: Request<Body>, next: Next) -> Response {
    let request_id = RequestId(Uuid::new_v4().to_string());
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    req.extensions_mut().insert(request_id.clone());

    let started = Instant::now();
    let response = next.run(req).await;

    tracing::info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        duration_ms = started.elapsed().as_millis() as u64,
        "request"
    );
    response
}

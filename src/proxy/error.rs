//! Request-time proxy errors and their client-facing responses.

use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, Response, StatusCode};
use serde::Serialize;
use thiserror::Error;

use crate::proxy::upstream::UpstreamError;

/// Every way a single proxied request can fail before a response is relayed.
///
/// An upstream non-success status is not one of these; it is relayed as-is.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("failed to read request body: {0}")]
    ReadBody(String),

    #[error("invalid request format: {0}")]
    MalformedBody(#[source] serde_json::Error),

    #[error("invalid request format: missing string `model` field")]
    MissingModelField,

    /// Re-encoding the rewritten request failed
    #[error("failed to encode request: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to build upstream request: {0}")]
    BuildRequest(#[source] UpstreamError),

    #[error("upstream request failed: {0}")]
    UpstreamUnreachable(#[source] UpstreamError),

    /// Upstream answered but its body could not be read to the end
    #[error("failed to read upstream response: {0}")]
    UpstreamBody(String),

    /// The model listing has to be read whole before ids are mapped back
    #[error("failed to read model listing: {0}")]
    ReadListing(String),
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::ReadBody(_) | ProxyError::MalformedBody(_) | ProxyError::MissingModelField => {
                StatusCode::BAD_REQUEST
            }
            ProxyError::Encode(_) | ProxyError::BuildRequest(_) | ProxyError::ReadListing(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ProxyError::UpstreamUnreachable(_) | ProxyError::UpstreamBody(_) => {
                StatusCode::BAD_GATEWAY
            }
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            ProxyError::ReadBody(_) => "read_body_failed",
            ProxyError::MalformedBody(_) => "malformed_body",
            ProxyError::MissingModelField => "missing_model_field",
            ProxyError::Encode(_) => "encode_failed",
            ProxyError::BuildRequest(_) => "build_request_failed",
            ProxyError::UpstreamUnreachable(_) => "upstream_unreachable",
            ProxyError::UpstreamBody(_) => "upstream_body_failed",
            ProxyError::ReadListing(_) => "read_listing_failed",
        }
    }
}

impl From<UpstreamError> for ProxyError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::InvalidRequest(_) => ProxyError::BuildRequest(err),
            _ => ProxyError::UpstreamUnreachable(err),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: ErrorDetail<'a>,
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    #[serde(rename = "type")]
    error_type: &'a str,
    message: String,
    request_id: &'a str,
}

pub struct ErrorResponse;

impl ErrorResponse {
    /// JSON error body with the status matching `err`.
    pub fn from_error(err: &ProxyError, request_id: &str) -> Response<Body> {
        let body = ErrorBody {
            error: ErrorDetail {
                error_type: err.error_type(),
                message: err.to_string(),
                request_id,
            },
        };
        let json = serde_json::to_vec(&body).unwrap_or_default();

        let mut response = Response::new(Body::from(json));
        *response.status_mut() = err.status_code();
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response
    }
}

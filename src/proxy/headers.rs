//! Header forwarding policy.
//!
//! Outbound requests carry every inbound header except the client's
//! `Authorization` (replaced by the configured credential when there is one),
//! `Host`, and hop-by-hop headers. Responses carry every upstream header
//! except hop-by-hop ones, which belong to the upstream connection.

use axum::http::header::{
    AUTHORIZATION, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HOST, PROXY_AUTHENTICATE,
    PROXY_AUTHORIZATION, TE, TRAILER, TRANSFER_ENCODING, UPGRADE,
};
use axum::http::header::{HeaderName, InvalidHeaderValue};
use axum::http::{HeaderMap, HeaderValue};

const KEEP_ALIVE: &str = "keep-alive";

fn is_hop_by_hop(name: &HeaderName) -> bool {
    name == CONNECTION
        || name == TE
        || name == TRAILER
        || name == TRANSFER_ENCODING
        || name == UPGRADE
        || name == PROXY_AUTHENTICATE
        || name == PROXY_AUTHORIZATION
        || name.as_str() == KEEP_ALIVE
}

#[derive(Debug, Clone, Default)]
pub struct HeaderPolicy {
    authorization: Option<HeaderValue>,
}

impl HeaderPolicy {
    pub fn new(api_key: Option<&str>) -> Result<Self, InvalidHeaderValue> {
        let authorization = api_key
            .map(|key| {
                let mut value = HeaderValue::from_str(&format!("Bearer {key}"))?;
                value.set_sensitive(true);
                Ok::<_, InvalidHeaderValue>(value)
            })
            .transpose()?;
        Ok(Self { authorization })
    }

    /// Headers for a request whose body is relayed unchanged.
    pub fn outbound(&self, inbound: &HeaderMap) -> HeaderMap {
        let mut headers = HeaderMap::with_capacity(inbound.len() + 1);
        for (name, value) in inbound {
            if name == AUTHORIZATION || name == HOST || is_hop_by_hop(name) {
                continue;
            }
            headers.append(name.clone(), value.clone());
        }
        if let Some(authorization) = &self.authorization {
            headers.insert(AUTHORIZATION, authorization.clone());
        }
        headers
    }

    /// Headers for a rewritten JSON body of `body_len` bytes.
    pub fn outbound_json(&self, inbound: &HeaderMap, body_len: usize) -> HeaderMap {
        let mut headers = self.outbound(inbound);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_LENGTH, HeaderValue::from(body_len));
        headers
    }
}

/// Upstream response headers as sent to the client.
pub fn relay_response_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(upstream.len());
    for (name, value) in upstream {
        if !is_hop_by_hop(name) {
            headers.append(name.clone(), value.clone());
        }
    }
    headers
}

//! Model name rewriting for proxied bodies.
//!
//! Requests have their `model` mapped from alias to upstream identifier before
//! they leave. Buffered responses get it mapped back, and the model listing
//! gets every `data[*].id` mapped back. Streamed bodies are never parsed: chunk
//! boundaries do not line up with JSON documents.

use axum::body::Bytes;
use serde_json::{Map, Value};

use crate::proxy::error::ProxyError;
use crate::proxy::model_map::ModelMap;

/// Forward and reverse model mapping pair for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelMapping {
    /// Model name sent upstream (e.g., "gpt-4").
    pub upstream: String,
    /// Model name the client sent (e.g., "gpt-4-my-alias").
    pub original: String,
}

impl ModelMapping {
    /// True when no alias applied and the name went upstream unchanged.
    pub fn is_identity(&self) -> bool {
        self.upstream == self.original
    }
}

/// A model-bearing request body ready to send upstream.
#[derive(Debug)]
pub struct RewrittenRequest {
    pub body: Bytes,
    pub mapping: ModelMapping,
    /// Client asked for a streamed response. Absent or non-boolean means false.
    pub stream: bool,
}

/// Decode a request body, map its `model`, and re-encode it.
///
/// Fields other than `model` are carried through without inspection.
pub fn rewrite_request(body: &[u8], models: &ModelMap) -> Result<RewrittenRequest, ProxyError> {
    let mut document: Map<String, Value> =
        serde_json::from_slice(body).map_err(ProxyError::MalformedBody)?;

    let original = match document.get("model") {
        Some(Value::String(model)) => model.clone(),
        _ => return Err(ProxyError::MissingModelField),
    };
    let stream = document
        .get("stream")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let upstream = match models.forward(&original) {
        Some(target) => {
            tracing::debug!(from = %original, to = %target, "Mapped model");
            document.insert("model".to_string(), Value::String(target.to_string()));
            target.to_string()
        }
        None => original.clone(),
    };

    let body = serde_json::to_vec(&document).map_err(ProxyError::Encode)?;
    Ok(RewrittenRequest {
        body: Bytes::from(body),
        mapping: ModelMapping { upstream, original },
        stream,
    })
}

/// Map `$.model` in a buffered response back to the client's name.
///
/// Returns `None` when the body should go out verbatim: nothing was mapped,
/// the body is not a JSON object, or the upstream echoed a different model.
pub fn reverse_model_in_response(body: &[u8], mapping: &ModelMapping) -> Option<Bytes> {
    if mapping.is_identity() {
        return None;
    }

    let mut document: Map<String, Value> = serde_json::from_slice(body).ok()?;
    match document.get("model") {
        Some(Value::String(model)) if *model == mapping.upstream => {}
        Some(Value::String(model)) => {
            tracing::debug!(
                expected = %mapping.upstream,
                found = %model,
                "Reverse mapping skipped in response"
            );
            return None;
        }
        _ => return None,
    }

    document.insert("model".to_string(), Value::String(mapping.original.clone()));
    let bytes = serde_json::to_vec(&document).ok()?;
    tracing::debug!(
        from = %mapping.upstream,
        to = %mapping.original,
        "Reverse mapped model in response"
    );
    Some(Bytes::from(bytes))
}

/// Map every `data[*].id` in a model listing back to its alias.
///
/// Returns `None` when the body is not an object with a `data` array, in which
/// case the upstream bytes are relayed untouched.
pub fn reverse_model_listing(body: &[u8], models: &ModelMap) -> Option<Bytes> {
    let mut document: Map<String, Value> = serde_json::from_slice(body).ok()?;
    let Some(Value::Array(entries)) = document.get_mut("data") else {
        return None;
    };

    for entry in entries.iter_mut() {
        let Some(record) = entry.as_object_mut() else {
            continue;
        };
        let alias = match record.get("id") {
            Some(Value::String(id)) => models.reverse(id),
            _ => None,
        };
        if let Some(alias) = alias {
            record.insert("id".to_string(), Value::String(alias.to_string()));
        }
    }

    serde_json::to_vec(&document).ok().map(Bytes::from)
}

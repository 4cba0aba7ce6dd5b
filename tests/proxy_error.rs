mod common;

use axum::http::StatusCode;
use llm_proxy::proxy::error::{ErrorResponse, ProxyError};
use llm_proxy::proxy::upstream::UpstreamError;

fn json_error() -> serde_json::Error {
    serde_json::from_str::<serde_json::Value>("{").unwrap_err()
}

#[test]
fn test_client_input_errors_are_bad_request() {
    for err in [
        ProxyError::ReadBody("eof".to_string()),
        ProxyError::MalformedBody(json_error()),
        ProxyError::MissingModelField,
    ] {
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST, "{err}");
    }
}

#[test]
fn test_transport_errors_are_bad_gateway() {
    let err = ProxyError::from(UpstreamError::Connect("refused".to_string()));
    assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    assert_eq!(err.error_type(), "upstream_unreachable");

    let err = ProxyError::from(UpstreamError::Timeout(120));
    assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);

    let err = ProxyError::UpstreamBody("reset".to_string());
    assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    assert_eq!(err.error_type(), "upstream_body_failed");
}

#[test]
fn test_internal_errors_are_server_errors() {
    let err = ProxyError::Encode(json_error());
    assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(err.error_type(), "encode_failed");

    let err = ProxyError::from(UpstreamError::InvalidRequest("bad header".to_string()));
    assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(err.error_type(), "build_request_failed");

    let err = ProxyError::ReadListing("reset".to_string());
    assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(err.error_type(), "read_listing_failed");
}

#[tokio::test]
async fn test_error_response_format() {
    let err = ProxyError::MissingModelField;
    let response = ErrorResponse::from_error(&err, "test-id-123");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response.headers().get("Content-Type").unwrap(),
        "application/json"
    );

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = common::json(&body);
    assert_eq!(body["error"]["type"], "missing_model_field");
    assert_eq!(body["error"]["request_id"], "test-id-123");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("model"));
}

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::{json, Value};

/// Failure taxonomy for proxied requests.
///
/// Only `Upstream` carries the vendor's own status and body; the other
/// variants are produced before or instead of an upstream call.
#[derive(Debug)]
pub enum ProxyError {
    /// No base URL / source resolvable. HTTP 500, descriptive message.
    Misconfigured(String),
    /// No token resolvable (no upstream call was made). HTTP 401.
    Unauthorized(String),
    /// Non-2xx upstream response, relayed verbatim.
    Upstream { status: u16, body: Value },
    /// Network failure, timeout or malformed upstream response.
    /// Surfaced as HTTP 500 with a generic message; details go to the log.
    Transport(String),
}

impl ProxyError {
    /// Best-effort parse of an upstream error body: JSON when it is JSON,
    /// otherwise the raw text wrapped in an error envelope.
    pub fn upstream(status: u16, body_text: &str) -> Self {
        let body = match serde_json::from_str::<Value>(body_text) {
            Ok(v) => v,
            Err(_) => json!({ "error": { "message": body_text } }),
        };
        ProxyError::Upstream { status, body }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        match self {
            ProxyError::Misconfigured(msg) => {
                tracing::error!("misconfigured proxy request: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": msg })),
                )
                    .into_response()
            }
            ProxyError::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, Json(json!({ "error": msg }))).into_response()
            }
            ProxyError::Upstream { status, body } => {
                let status =
                    StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
                (status, Json(body)).into_response()
            }
            ProxyError::Transport(detail) => {
                tracing::error!("upstream transport failure: {}", detail);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "upstream request failed" })),
                )
                    .into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_body_json_passthrough() {
        let err = ProxyError::upstream(409, r#"{"message":"conflict"}"#);
        match err {
            ProxyError::Upstream { status, body } => {
                assert_eq!(status, 409);
                assert_eq!(body["message"], "conflict");
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn test_upstream_body_text_wrapped() {
        let err = ProxyError::upstream(503, "Service Unavailable");
        match err {
            ProxyError::Upstream { body, .. } => {
                assert_eq!(body["error"]["message"], "Service Unavailable");
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }
}

// Central proxy handler
//
// Every platform route funnels through `forward`, so base-URL/token
// resolution and the single 401-driven refresh retry live in exactly one
// place instead of being duplicated per endpoint.

use std::collections::HashMap;

use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;

use crate::proxy::cookie_chunks::{self, parse_cookie_header};
use crate::proxy::error::ProxyError;
use crate::proxy::platform::Platform;
use crate::proxy::server::AppState;
use crate::proxy::token_manager::SessionBlob;
use crate::proxy::upstream::client::UpstreamClient;

const MAX_BODY_BYTES: usize = 100 * 1024 * 1024;

/// Optional header selecting an explicit source id for a proxied request.
pub const SOURCE_HEADER: &str = "x-veehub-source";

pub async fn vbr(
    State(state): State<AppState>,
    Path(path): Path<String>,
    request: Request,
) -> Result<Response, ProxyError> {
    forward(state, Platform::Vbr, path, request).await
}

pub async fn vb365(
    State(state): State<AppState>,
    Path(path): Path<String>,
    request: Request,
) -> Result<Response, ProxyError> {
    forward(state, Platform::Vb365, path, request).await
}

pub async fn vro(
    State(state): State<AppState>,
    Path(path): Path<String>,
    request: Request,
) -> Result<Response, ProxyError> {
    forward(state, Platform::Vro, path, request).await
}

pub async fn one(
    State(state): State<AppState>,
    Path(path): Path<String>,
    request: Request,
) -> Result<Response, ProxyError> {
    forward(state, Platform::One, path, request).await
}

pub async fn kasten(
    State(state): State<AppState>,
    Path(path): Path<String>,
    request: Request,
) -> Result<Response, ProxyError> {
    forward(state, Platform::Kasten, path, request).await
}

async fn forward(
    state: AppState,
    platform: Platform,
    path: String,
    request: Request,
) -> Result<Response, ProxyError> {
    let (parts, body) = request.into_parts();
    let method = parts.method;
    let query = parts.uri.query().map(str::to_string);
    let headers = parts.headers;
    let cookies = request_cookies(&headers);

    // Source resolution: explicit header wins, else the first configured
    // source for the platform.
    let source = match headers.get(SOURCE_HEADER).and_then(|v| v.to_str().ok()) {
        Some(id) => state.sources.get(id),
        None => state.sources.find_by_platform(platform),
    };
    let source_id = source.as_ref().map(|s| s.id.clone());

    // Base URL priority: legacy cookie override, configured source,
    // environment default.
    let base_url = cookies
        .get(&platform.url_cookie())
        .cloned()
        .or_else(|| source.as_ref().map(|s| s.base_url()))
        .or_else(|| std::env::var(platform.env_url_var()).ok())
        .ok_or_else(|| {
            ProxyError::Misconfigured(format!("no base URL configured for platform {}", platform))
        })?;

    // Token priority: managed token for the source, bearer header,
    // persisted session blob.
    let token = resolve_token(&state, platform, source_id.as_deref(), &headers, &cookies)
        .ok_or_else(|| {
            ProxyError::Unauthorized(format!("no access token available for {}", platform))
        })?;

    let body_bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| ProxyError::Transport(format!("failed to read request body: {}", e)))?;
    let body = if body_bytes.is_empty() {
        None
    } else {
        Some(body_bytes)
    };
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let url = UpstreamClient::build_url(&base_url, platform.api_prefix(), &path, query.as_deref());

    tracing::debug!("proxying {} /{} -> {}", method, path, url);

    let response = state
        .upstream
        .forward(
            method.clone(),
            &url,
            &token,
            platform.api_version_header(),
            content_type.as_deref(),
            body.clone(),
        )
        .await
        .map_err(ProxyError::Transport)?;

    // Exactly one retry: only on 401, only via refresh, only when the
    // request maps to a configured source. A failed refresh propagates the
    // original 401.
    if response.status() == reqwest::StatusCode::UNAUTHORIZED {
        if let Some(id) = source_id.as_deref() {
            if let Some(new_token) = state.token_manager.refresh_token(id).await {
                tracing::debug!("retrying {} with refreshed token for source {}", url, id);
                let retried = state
                    .upstream
                    .forward(
                        method,
                        &url,
                        &new_token,
                        platform.api_version_header(),
                        content_type.as_deref(),
                        body,
                    )
                    .await
                    .map_err(ProxyError::Transport)?;
                return relay(retried).await;
            }
        }
    }

    relay(response).await
}

fn resolve_token(
    state: &AppState,
    platform: Platform,
    source_id: Option<&str>,
    headers: &HeaderMap,
    cookies: &HashMap<String, String>,
) -> Option<String> {
    if let Some(id) = source_id {
        if let Some(token) = state.token_manager.get_token(id) {
            return Some(token);
        }
    }

    if let Some(token) = bearer_from_headers(headers) {
        return Some(token);
    }

    cookie_chunks::read_chunked(cookies, &platform.session_cookie())
        .and_then(|raw| SessionBlob::decode(&raw))
        .map(|blob| blob.access_token)
}

fn bearer_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub fn request_cookies(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .map(parse_cookie_header)
        .unwrap_or_default()
}

/// Relay an upstream response to the caller: status verbatim, body bytes
/// streamed through untouched, content headers copied. Non-2xx bodies get
/// the best-effort JSON treatment of [`ProxyError::upstream`].
async fn relay(response: reqwest::Response) -> Result<Response, ProxyError> {
    let status = response.status();

    if !status.is_success() {
        let text = response.text().await.map_err(|e| {
            ProxyError::Transport(format!("failed to read upstream error body: {}", e))
        })?;
        return Err(ProxyError::upstream(status.as_u16(), &text));
    }

    let status_code = StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = Response::builder().status(status_code);
    for name in [header::CONTENT_TYPE, header::CONTENT_DISPOSITION] {
        if let Some(value) = response.headers().get(&name) {
            builder = builder.header(name, value.clone());
        }
    }

    if status_code == StatusCode::NO_CONTENT {
        return builder
            .body(Body::empty())
            .map_err(|e| ProxyError::Transport(e.to_string()));
    }

    builder
        .body(Body::from_stream(response.bytes_stream()))
        .map_err(|e| ProxyError::Transport(e.to_string()))
}

// Management API: data source configuration, authentication, and the
// persisted session blob interface used by the dashboard frontend.

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::proxy::cookie_chunks::{self, CookieAttributes, ResponseCookies};
use crate::proxy::handlers::forward::request_cookies;
use crate::proxy::platform::Platform;
use crate::proxy::server::AppState;
use crate::proxy::source_store::Protocol;
use crate::proxy::token_manager::{SessionBlob, TokenRecord};

#[derive(Debug, Deserialize)]
pub struct CreateSourceRequest {
    pub platform: Platform,
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub protocol: Option<Protocol>,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Overrides the stored password for this grant only.
    #[serde(default)]
    pub password: Option<String>,
    /// Persist the resulting credential blob as a chunked cookie set.
    #[serde(default = "default_remember")]
    pub remember: bool,
}

impl Default for LoginRequest {
    fn default() -> Self {
        Self {
            password: None,
            remember: true,
        }
    }
}

fn default_remember() -> bool {
    true
}

pub async fn list_sources(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.sources.list())
}

pub async fn get_source(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let source = state
        .sources
        .get(&id)
        .ok_or((StatusCode::NOT_FOUND, format!("source not found: {}", id)))?;
    Ok(Json(source.summary()))
}

/// Configure a new data source and perform the initial password grant.
/// A source whose credentials fail authentication is rolled back.
pub async fn create_source(
    State(state): State<AppState>,
    Json(body): Json<CreateSourceRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if body.host.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "host must not be empty".to_string()));
    }

    let protocol = body.protocol.unwrap_or(Protocol::Https);
    let port = body.port.unwrap_or_else(|| body.platform.default_port());

    let base = format!("{}://{}:{}", protocol, body.host.trim(), port);
    Url::parse(&base)
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("invalid source address: {}", e)))?;

    let record = state
        .sources
        .add(
            body.platform,
            body.host.trim().to_string(),
            port,
            protocol,
            body.username,
            Some(body.password),
        )
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e))?;

    if let Err(e) = state.token_manager.issue_token(&record.id, None).await {
        // Roll back: a source that cannot authenticate is useless
        let _ = state.sources.remove(&record.id);
        return Err((
            StatusCode::BAD_GATEWAY,
            format!("initial authentication failed: {}", e),
        ));
    }

    Ok((StatusCode::CREATED, Json(record.summary())))
}

pub async fn delete_source(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    state
        .sources
        .remove(&id)
        .map_err(|e| (StatusCode::NOT_FOUND, e))?;
    state.token_manager.drop_token(&id);

    Ok(StatusCode::NO_CONTENT)
}

/// Re-run the password grant for a configured source, optionally with a
/// one-off password, and persist the blob as chunked cookies.
pub async fn login_source(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Option<Json<LoginRequest>>,
) -> Result<Response, (StatusCode, String)> {
    let request = body.map(|Json(b)| b).unwrap_or_default();

    let source = state
        .sources
        .get(&id)
        .ok_or((StatusCode::NOT_FOUND, format!("source not found: {}", id)))?;

    let record = state
        .token_manager
        .issue_token(&id, request.password)
        .await
        .map_err(|e| (StatusCode::BAD_GATEWAY, format!("authentication failed: {}", e)))?;

    let mut jar = ResponseCookies::new(request_cookies(&headers));
    if request.remember {
        let blob = SessionBlob::from_record(&record);
        cookie_chunks::write_chunked(
            &mut jar,
            &source.platform.session_cookie(),
            &blob.encode(),
            &CookieAttributes::session(),
        );
    }

    let response = Json(json!({
        "status": "ok",
        "source_id": id,
        "expires_in": record.expires_in,
        "expires_at": record.expires_at(),
    }))
    .into_response();

    Ok(with_cookies(response, &jar))
}

/// Explicit refresh-token grant. 401 when no refresh token is stored or
/// the upstream rejects the grant; the caller must re-authenticate.
pub async fn refresh_source(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if state.sources.get(&id).is_none() {
        return Err((StatusCode::NOT_FOUND, format!("source not found: {}", id)));
    }

    match state.token_manager.refresh_token(&id).await {
        Some(_) => {
            let record = state.token_manager.peek_record(&id);
            Ok(Json(json!({
                "status": "ok",
                "source_id": id,
                "expires_at": record.map(|r| r.expires_at()),
            })))
        }
        None => Err((
            StatusCode::UNAUTHORIZED,
            "token refresh failed; re-authenticate the source".to_string(),
        )),
    }
}

/// Read the persisted credential blob for a platform.
pub async fn get_session(
    Path(platform): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let platform = parse_platform(&platform)?;
    let cookies = request_cookies(&headers);

    let blob = cookie_chunks::read_chunked(&cookies, &platform.session_cookie())
        .and_then(|raw| SessionBlob::decode(&raw))
        .ok_or((
            StatusCode::NOT_FOUND,
            format!("no stored session for {}", platform),
        ))?;

    Ok(Json(blob))
}

/// Persist a credential blob for a platform. When a source is configured
/// for that platform the token manager is hydrated as well, so a restored
/// session is immediately serveable.
pub async fn put_session(
    State(state): State<AppState>,
    Path(platform): Path<String>,
    headers: HeaderMap,
    Json(blob): Json<SessionBlob>,
) -> Result<Response, (StatusCode, String)> {
    let platform = parse_platform(&platform)?;

    let mut jar = ResponseCookies::new(request_cookies(&headers));
    cookie_chunks::write_chunked(
        &mut jar,
        &platform.session_cookie(),
        &blob.encode(),
        &CookieAttributes::session(),
    );

    if let Some(source) = state.sources.find_by_platform(platform) {
        state.token_manager.insert_record(TokenRecord {
            source_id: source.id.clone(),
            access_token: blob.access_token.clone(),
            refresh_token: blob.refresh_token.clone().unwrap_or_default(),
            obtained_at: blob.obtained_at,
            expires_in: blob.expires_in,
        });
        tracing::debug!(
            "hydrated token cache for source {} from persisted session",
            source.id
        );
    }

    let response = Json(json!({ "status": "ok" })).into_response();
    Ok(with_cookies(response, &jar))
}

/// Drop the persisted credential blob for a platform.
pub async fn delete_session(
    Path(platform): Path<String>,
    headers: HeaderMap,
) -> Result<Response, (StatusCode, String)> {
    let platform = parse_platform(&platform)?;

    let mut jar = ResponseCookies::new(request_cookies(&headers));
    cookie_chunks::delete_chunked(
        &mut jar,
        &platform.session_cookie(),
        &CookieAttributes::session(),
    );

    let response = StatusCode::NO_CONTENT.into_response();
    Ok(with_cookies(response, &jar))
}

fn parse_platform(raw: &str) -> Result<Platform, (StatusCode, String)> {
    raw.parse::<Platform>()
        .map_err(|e| (StatusCode::BAD_REQUEST, e))
}

fn with_cookies(mut response: Response, jar: &ResponseCookies) -> Response {
    for value in jar.set_cookie_headers() {
        if let Ok(header_value) = HeaderValue::from_str(value) {
            response.headers_mut().append(header::SET_COOKIE, header_value);
        }
    }
    response
}

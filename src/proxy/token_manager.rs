//! Per-source token cache and grant orchestration.
//!
//! Each configured data source owns at most one `TokenRecord`. Reads hand
//! out immutable snapshots; the only writers are the initial password
//! grant and the refresh path. Refreshes per source are coalesced through
//! a debouncer so a single-use refresh token is never consumed twice, and
//! every grant against the rate-limited platform is serialized through the
//! process-wide FIFO limiter.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::proxy::debounce::Debouncer;
use crate::proxy::rate_limit::RateLimiter;
use crate::proxy::source_store::{SourceRecord, SourceStore};
use crate::proxy::upstream::client::{TokenResponse, UpstreamClient};

/// A token is treated as expired this many seconds before its literal
/// expiry, absorbing clock skew and in-flight latency.
pub const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;

/// Window during which concurrent refresh callers share one grant result.
const REFRESH_SHARE_WINDOW: Duration = Duration::from_secs(3);

/// Hard ceiling of the rate-limited platform's token endpoint.
const TOKEN_ENDPOINT_RATE: f64 = 1.0;

#[derive(Debug, Clone)]
pub struct TokenRecord {
    pub source_id: String,
    pub access_token: String,
    /// Empty when the upstream never issued one.
    pub refresh_token: String,
    /// Unix seconds at which the access token was obtained.
    pub obtained_at: i64,
    pub expires_in: i64,
}

impl TokenRecord {
    /// Build a record from a grant response. The returned refresh token is
    /// authoritative; the previous one is kept only when the response
    /// omits rotation.
    pub fn from_response(
        source_id: &str,
        response: &TokenResponse,
        previous_refresh: Option<&str>,
    ) -> Self {
        Self {
            source_id: source_id.to_string(),
            access_token: response.access_token.clone(),
            refresh_token: response
                .refresh_token
                .clone()
                .or_else(|| previous_refresh.map(str::to_string))
                .unwrap_or_default(),
            obtained_at: chrono::Utc::now().timestamp(),
            expires_in: response.expires_in,
        }
    }

    pub fn expires_at(&self) -> i64 {
        self.obtained_at + self.expires_in
    }

    /// Still serveable at `now` (unix seconds), honoring the safety margin.
    pub fn is_current(&self, now: i64) -> bool {
        now < self.expires_at() - TOKEN_EXPIRY_MARGIN_SECS
    }
}

/// Credential blob persisted through the chunked-cookie transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionBlob {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_in: i64,
    pub obtained_at: i64,
}

impl SessionBlob {
    pub fn from_record(record: &TokenRecord) -> Self {
        Self {
            access_token: record.access_token.clone(),
            refresh_token: if record.refresh_token.is_empty() {
                None
            } else {
                Some(record.refresh_token.clone())
            },
            expires_in: record.expires_in,
            obtained_at: record.obtained_at,
        }
    }

    /// Cookie-safe encoding: URL-safe base64 over the JSON form.
    pub fn encode(&self) -> String {
        use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
        serde_json::to_vec(self)
            .map(|bytes| URL_SAFE_NO_PAD.encode(bytes))
            .unwrap_or_default()
    }

    pub fn decode(raw: &str) -> Option<Self> {
        use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
        let bytes = URL_SAFE_NO_PAD.decode(raw).ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

pub struct TokenManager {
    tokens: DashMap<String, TokenRecord>,
    /// Per-source refresh coalescing
    refresh_guards: DashMap<String, Arc<Debouncer<TokenRecord>>>,
    sources: Arc<SourceStore>,
    upstream: Arc<UpstreamClient>,
    token_limiter: RateLimiter<Result<TokenResponse, String>>,
}

impl TokenManager {
    pub fn new(sources: Arc<SourceStore>, upstream: Arc<UpstreamClient>) -> Self {
        Self {
            tokens: DashMap::new(),
            refresh_guards: DashMap::new(),
            sources,
            upstream,
            token_limiter: RateLimiter::new(TOKEN_ENDPOINT_RATE),
        }
    }

    /// Cached access token for `source_id`, or `None` when absent or inside
    /// the expiry safety margin. Never refreshes eagerly; recovery from a
    /// stale token is the proxy layer's 401-driven refresh.
    pub fn get_token(&self, source_id: &str) -> Option<String> {
        let entry = self.tokens.get(source_id)?;
        let now = chrono::Utc::now().timestamp();
        if entry.is_current(now) {
            Some(entry.access_token.clone())
        } else {
            None
        }
    }

    pub fn peek_record(&self, source_id: &str) -> Option<TokenRecord> {
        self.tokens.get(source_id).map(|entry| entry.value().clone())
    }

    /// Install a record directly (initial issuance from a restored session
    /// blob, and tests).
    pub fn insert_record(&self, record: TokenRecord) {
        self.tokens.insert(record.source_id.clone(), record);
    }

    /// Drop cached state for a removed source.
    pub fn drop_token(&self, source_id: &str) {
        self.tokens.remove(source_id);
        self.refresh_guards.remove(source_id);
    }

    /// Initial issuance: `grant_type=password` against the source's token
    /// endpoint, populating the record. Distinct from the refresh path.
    pub async fn issue_token(
        &self,
        source_id: &str,
        password_override: Option<String>,
    ) -> Result<TokenRecord, String> {
        let source = self
            .sources
            .get(source_id)
            .ok_or_else(|| format!("source not found: {}", source_id))?;

        let password = password_override
            .or_else(|| source.password.clone())
            .ok_or_else(|| format!("no stored credentials for source {}", source_id))?;

        let response = self.password_grant(&source, password).await?;
        let record = TokenRecord::from_response(source_id, &response, None);

        tracing::info!(
            "issued {} token for source {} (expires in {}s)",
            source.platform,
            source_id,
            record.expires_in
        );

        self.tokens.insert(source_id.to_string(), record.clone());
        Ok(record)
    }

    /// Refresh-token grant for `source_id`.
    ///
    /// Returns the new access token, or `None` when no refresh token is
    /// stored or the grant fails — the caller must fall back to a full
    /// credential grant (or propagate its 401). Concurrent calls for the
    /// same source share a single upstream request.
    pub async fn refresh_token(&self, source_id: &str) -> Option<String> {
        let source = self.sources.get(source_id)?;
        let current = self.peek_record(source_id)?;
        if current.refresh_token.is_empty() {
            tracing::debug!("source {} has no refresh token stored", source_id);
            return None;
        }

        let guard = self
            .refresh_guards
            .entry(source_id.to_string())
            .or_insert_with(|| Arc::new(Debouncer::new(REFRESH_SHARE_WINDOW)))
            .clone();

        let job = {
            let upstream = self.upstream.clone();
            let limiter = self.token_limiter.clone();
            let platform = source.platform;
            let token_url = format!("{}{}", source.base_url(), platform.token_path());
            let api_version = platform.api_version_header();
            let refresh = current.refresh_token.clone();
            let source_id = source_id.to_string();

            move || async move {
                let response = if platform.rate_limited() {
                    let upstream = upstream.clone();
                    let token_url = token_url.clone();
                    let refresh_arg = refresh.clone();
                    match limiter
                        .execute(move || async move {
                            upstream
                                .refresh_grant(&token_url, &refresh_arg, api_version)
                                .await
                        })
                        .await
                    {
                        Ok(result) => result,
                        Err(cancelled) => Err(cancelled.to_string()),
                    }
                } else {
                    upstream
                        .refresh_grant(&token_url, &refresh, api_version)
                        .await
                }?;

                Ok(TokenRecord::from_response(
                    &source_id,
                    &response,
                    Some(&refresh),
                ))
            }
        };

        match guard.execute(job).await {
            Ok(record) => {
                let access_token = record.access_token.clone();
                tracing::debug!(
                    "refreshed token for source {} (expires in {}s)",
                    source_id,
                    record.expires_in
                );
                self.tokens.insert(source_id.to_string(), record);
                Some(access_token)
            }
            Err(e) => {
                tracing::warn!("token refresh failed for source {}: {}", source_id, e);
                None
            }
        }
    }

    async fn password_grant(
        &self,
        source: &SourceRecord,
        password: String,
    ) -> Result<TokenResponse, String> {
        let platform = source.platform;
        let token_url = format!("{}{}", source.base_url(), platform.token_path());
        let api_version = platform.api_version_header();

        if platform.rate_limited() {
            let upstream = self.upstream.clone();
            let username = source.username.clone();
            match self
                .token_limiter
                .execute(move || async move {
                    upstream
                        .password_grant(&token_url, &username, &password, api_version)
                        .await
                })
                .await
            {
                Ok(result) => result,
                Err(cancelled) => Err(cancelled.to_string()),
            }
        } else {
            self.upstream
                .password_grant(&token_url, &source.username, &password, api_version)
                .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::platform::Platform;
    use crate::proxy::source_store::Protocol;

    fn manager() -> (Arc<SourceStore>, TokenManager) {
        let sources = Arc::new(SourceStore::new(None));
        let upstream = Arc::new(UpstreamClient::new(5, false));
        let manager = TokenManager::new(sources.clone(), upstream);
        (sources, manager)
    }

    fn record(source_id: &str, obtained_at: i64, expires_in: i64) -> TokenRecord {
        TokenRecord {
            source_id: source_id.to_string(),
            access_token: "access".to_string(),
            refresh_token: "refresh".to_string(),
            obtained_at,
            expires_in,
        }
    }

    #[test]
    fn test_get_token_honors_safety_margin() {
        let (_sources, manager) = manager();
        let now = chrono::Utc::now().timestamp();

        // 30s of literal validity left: not yet expired, but inside the margin
        manager.insert_record(record("s1", now - 70, 100));
        assert_eq!(manager.get_token("s1"), None);

        // Plenty of validity left
        manager.insert_record(record("s2", now, 900));
        assert_eq!(manager.get_token("s2").as_deref(), Some("access"));
    }

    #[test]
    fn test_get_token_absent_source() {
        let (_sources, manager) = manager();
        assert_eq!(manager.get_token("unknown"), None);
    }

    #[tokio::test]
    async fn test_refresh_without_record_is_absent() {
        let (sources, manager) = manager();
        let source = sources
            .add(
                Platform::Vbr,
                "vbr.local".to_string(),
                9419,
                Protocol::Https,
                "admin".to_string(),
                None,
            )
            .unwrap();

        assert_eq!(manager.refresh_token(&source.id).await, None);
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token_is_absent() {
        let (sources, manager) = manager();
        let source = sources
            .add(
                Platform::Vbr,
                "vbr.local".to_string(),
                9419,
                Protocol::Https,
                "admin".to_string(),
                None,
            )
            .unwrap();

        let now = chrono::Utc::now().timestamp();
        let mut stale = record(&source.id, now - 3600, 900);
        stale.refresh_token = String::new();
        manager.insert_record(stale);

        assert_eq!(manager.refresh_token(&source.id).await, None);
    }

    #[test]
    fn test_rotation_keeps_previous_when_response_omits() {
        let response = TokenResponse {
            access_token: "new-access".to_string(),
            refresh_token: None,
            expires_in: 900,
        };
        let record = TokenRecord::from_response("s1", &response, Some("old-refresh"));
        assert_eq!(record.refresh_token, "old-refresh");

        let rotated = TokenResponse {
            access_token: "new-access".to_string(),
            refresh_token: Some("new-refresh".to_string()),
            expires_in: 900,
        };
        let record = TokenRecord::from_response("s1", &rotated, Some("old-refresh"));
        assert_eq!(record.refresh_token, "new-refresh");
    }

    #[test]
    fn test_session_blob_roundtrip() {
        let now = chrono::Utc::now().timestamp();
        let blob = SessionBlob {
            access_token: "a".repeat(4096),
            refresh_token: Some("r".repeat(2048)),
            expires_in: 900,
            obtained_at: now,
        };

        let encoded = blob.encode();
        assert!(!encoded.contains(';'));
        assert_eq!(SessionBlob::decode(&encoded), Some(blob));
    }

    #[test]
    fn test_session_blob_decode_garbage() {
        assert_eq!(SessionBlob::decode("not-base64!!!"), None);
        assert_eq!(SessionBlob::decode(""), None);
    }
}

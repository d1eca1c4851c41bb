// Upstream client implementation
// Shared HTTP client for proxied resource calls and token grants

use bytes::Bytes;
use reqwest::{header, Client, Method, Response};
use serde::{Deserialize, Serialize};
use tokio::time::Duration;

/// JSON body returned by every platform's form-encoded token endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_expires_in")]
    pub expires_in: i64,
}

fn default_expires_in() -> i64 {
    900
}

pub struct UpstreamClient {
    http_client: Client,
}

impl UpstreamClient {
    pub fn new(request_timeout_secs: u64, verify_tls: bool) -> Self {
        let builder = Client::builder()
            .connect_timeout(Duration::from_secs(20))
            .pool_max_idle_per_host(16)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .timeout(Duration::from_secs(request_timeout_secs))
            // Veeam appliances ship self-signed certificates
            .danger_accept_invalid_certs(!verify_tls);

        let http_client = builder.build().expect("Failed to create HTTP client");

        Self { http_client }
    }

    /// Join base URL, platform API prefix, resource path and query string.
    pub fn build_url(base_url: &str, prefix: &str, path: &str, query: Option<&str>) -> String {
        let base = base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');

        let mut url = if path.is_empty() {
            format!("{}{}", base, prefix)
        } else {
            format!("{}{}/{}", base, prefix, path)
        };

        if let Some(qs) = query {
            url.push('?');
            url.push_str(qs);
        }

        url
    }

    /// Forward a proxied resource request.
    ///
    /// The response is returned whatever its status; only transport-level
    /// failures (connect, timeout) become errors here.
    pub async fn forward(
        &self,
        method: Method,
        url: &str,
        access_token: &str,
        api_version: Option<(&str, &str)>,
        content_type: Option<&str>,
        body: Option<Bytes>,
    ) -> Result<Response, String> {
        let mut request = self
            .http_client
            .request(method, url)
            .header(
                header::AUTHORIZATION,
                format!("Bearer {}", access_token),
            )
            .header(header::ACCEPT, "application/json");

        if let Some((name, value)) = api_version {
            request = request.header(name, value);
        }

        if let Some(bytes) = body {
            request = request
                .header(
                    header::CONTENT_TYPE,
                    content_type.unwrap_or("application/json"),
                )
                .body(bytes);
        }

        request
            .send()
            .await
            .map_err(|e| format!("HTTP request failed at {}: {}", url, e))
    }

    /// `grant_type=password` call against a platform token endpoint.
    pub async fn password_grant(
        &self,
        token_url: &str,
        username: &str,
        password: &str,
        api_version: Option<(&str, &str)>,
    ) -> Result<TokenResponse, String> {
        let form = [
            ("grant_type", "password"),
            ("username", username),
            ("password", password),
        ];
        self.token_request(token_url, &form, api_version).await
    }

    /// `grant_type=refresh_token` call against a platform token endpoint.
    pub async fn refresh_grant(
        &self,
        token_url: &str,
        refresh_token: &str,
        api_version: Option<(&str, &str)>,
    ) -> Result<TokenResponse, String> {
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        self.token_request(token_url, &form, api_version).await
    }

    async fn token_request(
        &self,
        token_url: &str,
        form: &[(&str, &str)],
        api_version: Option<(&str, &str)>,
    ) -> Result<TokenResponse, String> {
        let mut request = self
            .http_client
            .post(token_url)
            .header(header::ACCEPT, "application/json")
            .form(form);

        if let Some((name, value)) = api_version {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| format!("token request failed at {}: {}", token_url, e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(format!(
                "token endpoint {} returned {}: {}",
                token_url, status, text
            ));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| format!("malformed token response from {}: {}", token_url, e))
    }
}

use serde::{Deserialize, Serialize};

/// Proxy service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Allow LAN access
    /// - false: bind 127.0.0.1 only (default, privacy first)
    /// - true: bind 0.0.0.0
    #[serde(default)]
    pub allow_lan_access: bool,

    /// Listen port
    pub port: u16,

    /// Upstream request timeout (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    /// Verify upstream TLS certificates.
    /// Veeam appliances ship self-signed certificates, so this defaults to off.
    #[serde(default)]
    pub verify_tls: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            allow_lan_access: false,
            port: 8065,
            request_timeout: default_request_timeout(),
            verify_tls: false,
        }
    }
}

fn default_request_timeout() -> u64 {
    120
}

impl ProxyConfig {
    /// Actual bind address for the configured access mode
    pub fn get_bind_address(&self) -> &str {
        if self.allow_lan_access {
            "0.0.0.0"
        } else {
            "127.0.0.1"
        }
    }
}

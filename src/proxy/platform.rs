use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Upstream product families the proxy can front.
///
/// Each platform maps to a fixed token endpoint, API path prefix and
/// (where the product mandates one) an API version header. Resource
/// payloads themselves are opaque and passed through verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Veeam Backup & Replication
    Vbr,
    /// Veeam Backup for Microsoft 365
    Vb365,
    /// Veeam Recovery Orchestrator
    Vro,
    /// Veeam ONE
    One,
    /// Kasten K10
    Kasten,
}

impl Platform {
    pub const ALL: [Platform; 5] = [
        Platform::Vbr,
        Platform::Vb365,
        Platform::Vro,
        Platform::One,
        Platform::Kasten,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Vbr => "vbr",
            Platform::Vb365 => "vb365",
            Platform::Vro => "vro",
            Platform::One => "one",
            Platform::Kasten => "kasten",
        }
    }

    /// Default REST port of the product
    pub fn default_port(&self) -> u16 {
        match self {
            Platform::Vbr => 9419,
            Platform::Vb365 => 4443,
            Platform::Vro => 9898,
            Platform::One => 1239,
            Platform::Kasten => 443,
        }
    }

    /// Form-encoded OAuth-style token endpoint, relative to the base URL
    pub fn token_path(&self) -> &'static str {
        match self {
            Platform::Vbr => "/api/oauth2/token",
            Platform::Vb365 => "/v7/token",
            Platform::Vro => "/api/token",
            Platform::One => "/api/token",
            Platform::Kasten => "/k10/auth/token",
        }
    }

    /// Path prefix prepended to every proxied resource path
    pub fn api_prefix(&self) -> &'static str {
        match self {
            Platform::Vbr => "/api/v1",
            Platform::Vb365 => "/v7",
            Platform::Vro => "/api/v7",
            Platform::One => "/api/v2.2",
            Platform::Kasten => "/k10",
        }
    }

    /// API version header the upstream mandates, if any
    pub fn api_version_header(&self) -> Option<(&'static str, &'static str)> {
        match self {
            Platform::Vbr => Some(("x-api-version", "1.1-rev1")),
            _ => None,
        }
    }

    /// VB365 enforces a hard 1-request-per-second ceiling; its token and
    /// refresh grants must flow through the process rate limiter.
    pub fn rate_limited(&self) -> bool {
        matches!(self, Platform::Vb365)
    }

    /// Environment variable consulted as the last-resort base URL
    pub fn env_url_var(&self) -> &'static str {
        match self {
            Platform::Vbr => "VEEHUB_VBR_URL",
            Platform::Vb365 => "VEEHUB_VB365_URL",
            Platform::Vro => "VEEHUB_VRO_URL",
            Platform::One => "VEEHUB_ONE_URL",
            Platform::Kasten => "VEEHUB_KASTEN_URL",
        }
    }

    /// Legacy per-request base URL override cookie
    pub fn url_cookie(&self) -> String {
        format!("veehub_{}_url", self.as_str())
    }

    /// Logical name of the chunked credential blob cookie
    pub fn session_cookie(&self) -> String {
        format!("veehub_{}_session", self.as_str())
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vbr" => Ok(Platform::Vbr),
            "vb365" => Ok(Platform::Vb365),
            "vro" => Ok(Platform::Vro),
            "one" => Ok(Platform::One),
            "kasten" => Ok(Platform::Kasten),
            other => Err(format!("unknown platform: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_roundtrip() {
        for platform in Platform::ALL {
            assert_eq!(platform.as_str().parse::<Platform>(), Ok(platform));
        }
        assert!("veeam-cloud".parse::<Platform>().is_err());
    }

    #[test]
    fn test_only_vb365_is_rate_limited() {
        let limited: Vec<_> = Platform::ALL.iter().filter(|p| p.rate_limited()).collect();
        assert_eq!(limited, vec![&Platform::Vb365]);
    }
}

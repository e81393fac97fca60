use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::{SystemTime, UNIX_EPOCH};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::WarpError;

/// Hostname must be a dotted sequence of DNS labels, already lowercased.
static DOMAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-z0-9]([a-z0-9-]*[a-z0-9])?\.)+[a-z0-9]([a-z0-9-]*[a-z0-9])?$")
        .expect("domain regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    #[default]
    Https,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = WarpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Protocol::Http),
            "https" => Ok(Protocol::Https),
            other => Err(WarpError::Config(format!("invalid protocol: {other}"))),
        }
    }
}

/// One upstream origin as stored in the token directory and the DB file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenEntry {
    pub domain: String,
    pub protocol: Protocol,
    /// Last-access instant, Unix milliseconds. Refreshed on every lookup.
    pub timestamp: u64,
}

impl TokenEntry {
    pub fn new(domain: impl Into<String>, protocol: Protocol) -> Self {
        Self {
            domain: domain.into(),
            protocol,
            timestamp: now_ms(),
        }
    }

    /// Root URL of the upstream, e.g. `https://example.com/`.
    pub fn origin_root(&self) -> String {
        format!("{}://{}/", self.protocol, self.domain)
    }

    pub fn touch(&mut self) {
        self.timestamp = now_ms();
    }
}

/// Current wall time in Unix milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub fn normalize_domain(domain: &str) -> String {
    domain.trim().trim_end_matches('.').to_ascii_lowercase()
}

pub fn is_valid_domain(domain: &str) -> bool {
    !domain.is_empty() && domain.len() <= 253 && DOMAIN_RE.is_match(domain)
}

/// URL of `path_and_query` as served through the proxied subdomain.
/// A leading `/` is guaranteed whenever a path is supplied.
pub fn proxy_url(base_domain: &str, token: &str, path_and_query: &str) -> String {
    let mut url = format!("https://{token}.{base_domain}");
    if !path_and_query.is_empty() {
        if !path_and_query.starts_with('/') {
            url.push('/');
        }
        url.push_str(path_and_query);
    }
    url
}

// ---- Wire models ----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertResponse {
    pub original: String,
    pub domain: String,
    pub token: String,
    pub proxy: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestTokenResponse {
    pub token: String,
    pub target_info: TokenEntry,
    pub proxy_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub base_domain: String,
    pub port: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_round_trip() {
        assert_eq!(serde_json::to_string(&Protocol::Https).unwrap(), "\"https\"");
        let p: Protocol = serde_json::from_str("\"http\"").unwrap();
        assert_eq!(p, Protocol::Http);
        assert_eq!("https".parse::<Protocol>().unwrap(), Protocol::Https);
        assert!("ftp".parse::<Protocol>().is_err());
    }

    #[test]
    fn test_token_entry_db_shape() {
        let entry = TokenEntry {
            domain: "example.com".to_string(),
            protocol: Protocol::Https,
            timestamp: 1700000000000,
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"domain\":\"example.com\""));
        assert!(json.contains("\"protocol\":\"https\""));
        assert!(json.contains("\"timestamp\":1700000000000"));
    }

    #[test]
    fn test_normalize_domain() {
        assert_eq!(normalize_domain("  WWW.Example.COM. "), "www.example.com");
        assert_eq!(normalize_domain("example.com"), "example.com");
    }

    #[test]
    fn test_valid_domains() {
        assert!(is_valid_domain("example.com"));
        assert!(is_valid_domain("sub.example.co.uk"));
        assert!(is_valid_domain("a-b.example.com"));
        assert!(is_valid_domain("127.0.0.1"));
    }

    #[test]
    fn test_invalid_domains() {
        assert!(!is_valid_domain(""));
        assert!(!is_valid_domain("localhost"));
        assert!(!is_valid_domain("EXAMPLE.com"));
        assert!(!is_valid_domain("-bad.example.com"));
        assert!(!is_valid_domain("bad-.example.com"));
        assert!(!is_valid_domain("exa mple.com"));
        assert!(!is_valid_domain("example.com:8080"));
    }

    #[test]
    fn test_proxy_url_leading_slash() {
        assert_eq!(
            proxy_url("proxywarp.com", "abc123", "/foo?bar=1"),
            "https://abc123.proxywarp.com/foo?bar=1"
        );
        assert_eq!(
            proxy_url("proxywarp.com", "abc123", "foo"),
            "https://abc123.proxywarp.com/foo"
        );
        assert_eq!(proxy_url("proxywarp.com", "abc123", ""), "https://abc123.proxywarp.com");
    }

    #[test]
    fn test_test_token_response_camel_case() {
        let resp = TestTokenResponse {
            token: "abc123".to_string(),
            target_info: TokenEntry::new("example.com", Protocol::Https),
            proxy_url: "https://abc123.proxywarp.com".to_string(),
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"targetInfo\""));
        assert!(json.contains("\"proxyUrl\""));
        assert!(!json.contains("\"proxy_url\""));
    }
}

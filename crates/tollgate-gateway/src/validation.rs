use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use url::Url;

use crate::error::GatewayError;

const MAX_SEGMENT_LEN: usize = 512;

/// The (owner, api slug, endpoint path) triple a call is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteKey {
    pub owner: String,
    pub api_slug: String,
    pub path: String,
}

impl RouteKey {
    /// Validate the three route parts. Values are kept verbatim; matching
    /// against the registry is exact and case-sensitive.
    pub fn new(owner: &str, api_slug: &str, path: &str) -> Result<Self, GatewayError> {
        check_segment("owner", owner)?;
        check_segment("api", api_slug)?;
        check_segment("endpoint path", path)?;
        if owner.contains('/') || api_slug.contains('/') {
            return Err(GatewayError::InvalidRequest(
                "owner and api must be single path segments".to_string(),
            ));
        }
        if path.split('/').any(|s| s == "..") {
            return Err(GatewayError::InvalidRequest(
                "path traversal not allowed".to_string(),
            ));
        }
        Ok(Self {
            owner: owner.to_string(),
            api_slug: api_slug.to_string(),
            path: path.to_string(),
        })
    }
}

impl std::fmt::Display for RouteKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.owner, self.api_slug, self.path)
    }
}

fn check_segment(what: &str, value: &str) -> Result<(), GatewayError> {
    if value.is_empty() {
        return Err(GatewayError::InvalidRequest(format!("{what} is empty")));
    }
    if value.len() > MAX_SEGMENT_LEN {
        return Err(GatewayError::InvalidRequest(format!("{what} is too long")));
    }
    // CRLF, NUL and other control characters
    if value.chars().any(char::is_control) {
        return Err(GatewayError::InvalidRequest(format!(
            "{what} must not contain control characters"
        )));
    }
    Ok(())
}

/// Check if an IPv4 address is private, loopback, or otherwise non-routable.
pub fn is_private_ipv4(ip: &Ipv4Addr) -> bool {
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_broadcast()
        || ip.is_unspecified()
        // 100.64.0.0/10 (CGNAT)
        || ip.octets()[0] == 100 && (ip.octets()[1] & 0xC0) == 64
}

/// Check if an IPv6 address is private, loopback, or otherwise non-routable.
pub fn is_private_ipv6(ip: &Ipv6Addr) -> bool {
    let segments = ip.segments();
    ip.is_loopback()
        || ip.is_unspecified()
        // fc00::/7 unique local
        || (segments[0] & 0xFE00) == 0xFC00
        // fe80::/10 link-local
        || (segments[0] & 0xFFC0) == 0xFE80
        || ip.to_ipv4_mapped().is_some_and(|v4| is_private_ipv4(&v4))
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_private_ipv4(v4),
        IpAddr::V6(v6) => is_private_ipv6(v6),
    }
}

/// Parse an origin URL and apply the static checks: http(s) only, a host,
/// and (unless `allow_private`) no literal private address or local name.
pub fn parse_origin_url(raw: &str, allow_private: bool) -> Result<Url, GatewayError> {
    let url = Url::parse(raw)
        .map_err(|e| GatewayError::BadOrigin(format!("invalid origin URL: {e}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(GatewayError::BadOrigin(format!(
            "unsupported origin scheme '{}'",
            url.scheme()
        )));
    }

    let host = url
        .host()
        .ok_or_else(|| GatewayError::BadOrigin("origin URL has no host".to_string()))?;
    if allow_private {
        return Ok(url);
    }

    let private = match host {
        url::Host::Ipv4(ip) => is_private_ipv4(&ip),
        url::Host::Ipv6(ip) => is_private_ipv6(&ip),
        url::Host::Domain(domain) => {
            let domain = domain.to_ascii_lowercase();
            domain == "localhost"
                || domain.ends_with(".localhost")
                || domain.ends_with(".local")
                || domain.ends_with(".internal")
        }
    };
    if private {
        return Err(GatewayError::BadOrigin(
            "origin points at a private or local address".to_string(),
        ));
    }
    Ok(url)
}

/// Resolve the origin host and refuse it if any address is private. Guards
/// against names that resolve to internal addresses (DNS rebinding).
pub async fn check_resolved_origin(url: &Url) -> Result<(), GatewayError> {
    let host = match url.host() {
        Some(url::Host::Domain(domain)) => domain.to_string(),
        // Literal IPs were already checked by parse_origin_url
        Some(_) => return Ok(()),
        None => return Err(GatewayError::BadOrigin("origin URL has no host".to_string())),
    };
    let port = url.port_or_known_default().unwrap_or(443);

    let addrs = tokio::net::lookup_host((host.as_str(), port))
        .await
        .map_err(|e| GatewayError::BadOrigin(format!("DNS resolution failed for {host}: {e}")))?;

    let mut resolved_any = false;
    for addr in addrs {
        resolved_any = true;
        if is_private_ip(&addr.ip()) {
            return Err(GatewayError::BadOrigin(format!(
                "origin host {host} resolves to a private address"
            )));
        }
    }
    if !resolved_any {
        return Err(GatewayError::BadOrigin(format!(
            "origin host {host} did not resolve"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_key_accepts_nested_paths() {
        let key = RouteKey::new("alice", "weather", "v1/forecast").unwrap();
        assert_eq!(key.to_string(), "alice/weather/v1/forecast");
    }

    #[test]
    fn test_route_key_is_case_sensitive() {
        let key = RouteKey::new("Alice", "Weather", "Today").unwrap();
        assert_eq!(key.owner, "Alice");
        assert_eq!(key.path, "Today");
    }

    #[test]
    fn test_route_key_rejects_bad_input() {
        assert!(RouteKey::new("", "weather", "today").is_err());
        assert!(RouteKey::new("alice", "weather", "").is_err());
        assert!(RouteKey::new("alice", "weather", "a\r\nb").is_err());
        assert!(RouteKey::new("alice", "weather", "a\0b").is_err());
        assert!(RouteKey::new("alice", "weather", "../admin").is_err());
        assert!(RouteKey::new("alice", "weather", &"x".repeat(600)).is_err());
    }

    #[test]
    fn test_route_key_allows_dots_inside_names() {
        assert!(RouteKey::new("alice", "weather", "v1..2").is_ok());
        assert!(RouteKey::new("alice", "weather", "data.json").is_ok());
    }

    #[test]
    fn test_private_ipv4() {
        assert!(is_private_ipv4(&"127.0.0.1".parse().unwrap()));
        assert!(is_private_ipv4(&"10.0.0.1".parse().unwrap()));
        assert!(is_private_ipv4(&"192.168.1.1".parse().unwrap()));
        assert!(is_private_ipv4(&"169.254.169.254".parse().unwrap()));
        assert!(is_private_ipv4(&"100.64.0.1".parse().unwrap()));
        assert!(!is_private_ipv4(&"8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn test_private_ipv6() {
        assert!(is_private_ipv6(&"::1".parse().unwrap()));
        assert!(is_private_ipv6(&"fd00::1".parse().unwrap()));
        assert!(is_private_ipv6(&"fe80::1".parse().unwrap()));
        assert!(is_private_ipv6(&"::ffff:127.0.0.1".parse().unwrap()));
        assert!(!is_private_ipv6(&"2001:4860:4860::8888".parse().unwrap()));
    }

    #[test]
    fn test_parse_origin_url() {
        assert!(parse_origin_url("https://api.example.com/v1/data", false).is_ok());
        assert!(parse_origin_url("http://api.example.com", false).is_ok());
        assert!(parse_origin_url("ftp://api.example.com", false).is_err());
        assert!(parse_origin_url("not a url", false).is_err());
        assert!(parse_origin_url("http://127.0.0.1:8080/x", false).is_err());
        assert!(parse_origin_url("http://localhost:8080/x", false).is_err());
        assert!(parse_origin_url("http://db.internal/x", false).is_err());
        assert!(parse_origin_url("http://[::1]/x", false).is_err());
    }

    #[test]
    fn test_parse_origin_url_private_allowed() {
        assert!(parse_origin_url("http://127.0.0.1:8080/x", true).is_ok());
        assert!(parse_origin_url("ftp://127.0.0.1", true).is_err());
    }

    #[tokio::test]
    async fn test_resolved_literal_ip_skips_lookup() {
        let url = Url::parse("http://8.8.8.8/").unwrap();
        assert!(check_resolved_origin(&url).await.is_ok());
    }

    #[tokio::test]
    async fn test_resolved_localhost_rejected() {
        let url = Url::parse("http://localhost:9/").unwrap();
        assert!(check_resolved_origin(&url).await.is_err());
    }
}

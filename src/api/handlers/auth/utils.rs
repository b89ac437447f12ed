//! Header, cookie and client-address helpers shared by the auth endpoints.

use axum::http::{
    header::{InvalidHeaderValue, AUTHORIZATION, COOKIE},
    HeaderMap, HeaderValue,
};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::config::AdmissionConfig;

pub const ACCESS_COOKIE_NAME: &str = "custodia_access";
pub const REFRESH_COOKIE_NAME: &str = "custodia_refresh";

/// Rate-limit key when the server was not given the socket address.
const UNKNOWN_CLIENT: &str = "unknown";

fn canonical(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(ip, IpAddr::V4),
        IpAddr::V4(_) => ip,
    }
}

fn header_ip(headers: &HeaderMap, name: &str) -> Option<IpAddr> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<IpAddr>().ok())
        .map(canonical)
}

/// Client address used for rate limiting.
///
/// The socket peer is the client unless it is a trusted proxy. Behind a
/// trusted proxy `X-Forwarded-For` is read right to left and the first hop
/// that is not itself a trusted proxy wins; entries left of it are whatever
/// the client chose to send and are ignored.
pub fn extract_client_ip(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trusted: &[IpAddr],
) -> String {
    let Some(peer) = peer.map(|addr| canonical(addr.ip())) else {
        return UNKNOWN_CLIENT.to_string();
    };
    if !trusted.contains(&peer) {
        return peer.to_string();
    }

    let hops: Vec<&str> = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|hop| !hop.is_empty())
        .collect();
    for hop in hops.iter().rev() {
        match hop.parse::<IpAddr>().map(canonical) {
            Ok(ip) if trusted.contains(&ip) => {}
            Ok(ip) => return ip.to_string(),
            Err(_) => break,
        }
    }

    header_ip(headers, "x-real-ip")
        .filter(|ip| !trusted.contains(ip))
        .unwrap_or(peer)
        .to_string()
}

pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|header| header.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Bearer header first, then the access cookie.
pub fn extract_access_token(headers: &HeaderMap) -> Option<String> {
    extract_bearer_token(headers).or_else(|| cookie_value(headers, ACCESS_COOKIE_NAME))
}

/// Build an `HttpOnly` cookie carrying a token.
pub fn token_cookie(
    config: &AdmissionConfig,
    name: &str,
    token: &str,
    max_age: Duration,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!(
        "{name}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        max_age.as_secs()
    );
    if config.cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub fn clear_cookie(config: &AdmissionConfig, name: &str) -> Result<HeaderValue, InvalidHeaderValue> {
    token_cookie(config, name, "", Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn config(frontend: &str) -> AdmissionConfig {
        AdmissionConfig::new(SecretString::from("k".to_string()), frontend.to_string())
    }

    fn peer(addr: &str) -> Option<SocketAddr> {
        addr.parse().ok()
    }

    fn proxies() -> Vec<IpAddr> {
        ["10.0.0.1", "10.0.0.2"]
            .iter()
            .filter_map(|ip| ip.parse().ok())
            .collect()
    }

    #[test]
    fn direct_peer_ignores_forwarding_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9"));
        headers.insert("x-real-ip", HeaderValue::from_static("203.0.113.10"));
        assert_eq!(
            extract_client_ip(&headers, peer("198.51.100.4:5123"), &proxies()),
            "198.51.100.4"
        );
        assert_eq!(
            extract_client_ip(&headers, peer("198.51.100.4:5123"), &[]),
            "198.51.100.4"
        );
    }

    #[test]
    fn trusted_proxy_yields_rightmost_untrusted_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("1.1.1.1, 203.0.113.9, 10.0.0.2"),
        );
        assert_eq!(
            extract_client_ip(&headers, peer("10.0.0.1:443"), &proxies()),
            "203.0.113.9"
        );
    }

    #[test]
    fn trusted_proxy_without_hops_falls_back_to_real_ip_then_peer() {
        let mut headers = HeaderMap::new();
        assert_eq!(
            extract_client_ip(&headers, peer("10.0.0.1:443"), &proxies()),
            "10.0.0.1"
        );
        headers.insert("x-real-ip", HeaderValue::from_static(" 203.0.113.7 "));
        assert_eq!(
            extract_client_ip(&headers, peer("10.0.0.1:443"), &proxies()),
            "203.0.113.7"
        );
    }

    #[test]
    fn garbage_hop_stops_the_walk() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.9, not-an-ip"),
        );
        assert_eq!(
            extract_client_ip(&headers, peer("10.0.0.1:443"), &proxies()),
            "10.0.0.1"
        );
    }

    #[test]
    fn mapped_ipv6_peer_is_reported_as_ipv4() {
        let headers = HeaderMap::new();
        assert_eq!(
            extract_client_ip(&headers, peer("[::ffff:198.51.100.4]:80"), &[]),
            "198.51.100.4"
        );
        assert_eq!(extract_client_ip(&headers, None, &[]), "unknown");
    }

    #[test]
    fn bearer_header_wins_over_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("theme=dark; custodia_access=from-cookie"));
        assert_eq!(extract_access_token(&headers).as_deref(), Some("from-cookie"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        assert_eq!(extract_access_token(&headers).as_deref(), Some("from-header"));
    }

    #[test]
    fn empty_bearer_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer   "));
        assert!(extract_bearer_token(&headers).is_none());
    }

    #[test]
    fn cookies_are_secure_only_over_https() -> anyhow::Result<()> {
        let plain = token_cookie(&config("http://localhost:3000"), "c", "v", Duration::from_secs(60))?;
        assert_eq!(plain, "c=v; Path=/; HttpOnly; SameSite=Lax; Max-Age=60");

        let cleared = clear_cookie(&config("https://app.example.com"), "c")?;
        assert_eq!(cleared, "c=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0; Secure");
        Ok(())
    }
}

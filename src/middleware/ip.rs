use axum::{
    extract::{connect_info::ConnectInfo, Request},
    http::HeaderMap,
};
use std::net::SocketAddr;

/// Returned when neither a proxy header nor the peer address is available.
pub const UNKNOWN_IP: &str = "unknown";

/// Proxy headers in trust order. The edge proxy's own header comes first so a
/// client cannot override it by sending a forged `X-Forwarded-For`.
const CF_CONNECTING_IP: &str = "cf-connecting-ip";
const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

/// Derives the caller IP from proxy headers and optional transport metadata.
///
/// Precedence, first match wins:
/// 1. `CF-Connecting-IP`
/// 2. `X-Forwarded-For` (first comma-separated entry, trimmed)
/// 3. `X-Real-IP`
/// 4. the transport peer address
/// 5. `"unknown"`
///
/// Values are not parsed as IP addresses; the result is only ever used as a
/// rate-limit and audit key.
pub fn extract_ip_from_headers(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(ip) = header_str(headers, CF_CONNECTING_IP) {
        return ip.to_string();
    }
    if let Some(h) = header_str(headers, X_FORWARDED_FOR) {
        if let Some(first) = h.split(',').next().map(str::trim).filter(|s| !s.is_empty()) {
            return first.to_string();
        }
    }
    if let Some(ip) = header_str(headers, X_REAL_IP) {
        return ip.to_string();
    }
    if let Some(addr) = peer {
        return addr.ip().to_string();
    }
    UNKNOWN_IP.to_string()
}

/// Convenience wrapper reading the peer address from axum's `ConnectInfo`
/// extension when the server was started with connect info.
pub fn client_ip(req: &Request) -> String {
    let peer = req.extensions().get::<ConnectInfo<SocketAddr>>().map(|info| info.0);
    extract_ip_from_headers(req.headers(), peer)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|hv| hv.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

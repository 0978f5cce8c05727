//! Security headers for HTTP responses.
//!
//! [`build_security_headers`] and [`build_api_headers`] are pure functions of
//! their inputs. The middleware generates a CSP nonce per request, exposes it
//! to handlers through request extensions, and applies one of the two header
//! sets to every response, rejections included.

use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, EXPIRES, PRAGMA};
use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;

use crate::state::SecurityState;

/// Two years, as recommended for HSTS preload.
pub const HSTS_MAX_AGE: u64 = 63_072_000;

const PERMISSIONS_POLICY: &str =
    "camera=(), microphone=(), geolocation=(), payment=(), usb=(), magnetometer=(), gyroscope=(), interest-cohort=()";

/// Per-request CSP nonce, readable by handlers that render inline scripts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CspNonce(pub String);

/// 16 random bytes, base64-encoded.
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    STANDARD.encode(bytes)
}

/// The Content-Security-Policy value.
///
/// With a nonce, scripts are limited to `'self'` plus that nonce; without one
/// the policy falls back to `'unsafe-inline' 'unsafe-eval'`.
pub fn content_security_policy(nonce: Option<&str>, production: bool) -> String {
    let script_src = match nonce {
        Some(n) => format!("script-src 'self' 'nonce-{}'", n),
        None => "script-src 'self' 'unsafe-inline' 'unsafe-eval'".to_string(),
    };
    let mut directives = vec![
        "default-src 'self'".to_string(),
        script_src,
        "style-src 'self' 'unsafe-inline'".to_string(),
        "img-src 'self' data: blob:".to_string(),
        "font-src 'self' data:".to_string(),
        "connect-src 'self'".to_string(),
        "frame-ancestors 'none'".to_string(),
        "object-src 'none'".to_string(),
        "base-uri 'self'".to_string(),
        "form-action 'self'".to_string(),
    ];
    if production {
        directives.push("upgrade-insecure-requests".to_string());
    }
    directives.join("; ")
}

fn hsts(production: bool) -> HeaderValue {
    if production {
        HeaderValue::from_static("max-age=63072000; includeSubDomains; preload")
    } else {
        HeaderValue::from_static("max-age=0")
    }
}

fn insert_common(headers: &mut HeaderMap, production: bool) {
    headers.insert(HeaderName::from_static("x-frame-options"), HeaderValue::from_static("DENY"));
    headers.insert(HeaderName::from_static("x-content-type-options"), HeaderValue::from_static("nosniff"));
    headers.insert(
        HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(HeaderName::from_static("strict-transport-security"), hsts(production));
}

/// Full header set for documents and assets.
pub fn build_security_headers(nonce: Option<&str>, production: bool) -> HeaderMap {
    let mut headers = HeaderMap::new();

    // A nonce that is not a valid header value falls back to the nonce-less policy
    let csp = HeaderValue::from_str(&content_security_policy(nonce, production))
        .or_else(|_| HeaderValue::from_str(&content_security_policy(None, production)))
        .unwrap_or_else(|_| HeaderValue::from_static("default-src 'self'"));
    headers.insert(HeaderName::from_static("content-security-policy"), csp);

    insert_common(&mut headers, production);
    headers.insert(HeaderName::from_static("permissions-policy"), HeaderValue::from_static(PERMISSIONS_POLICY));
    headers.insert(HeaderName::from_static("x-dns-prefetch-control"), HeaderValue::from_static("off"));
    headers.insert(HeaderName::from_static("x-xss-protection"), HeaderValue::from_static("1; mode=block"));
    headers
}

/// Narrower set for JSON API responses: no CSP, never cached.
pub fn build_api_headers(production: bool) -> HeaderMap {
    let mut headers = HeaderMap::new();
    insert_common(&mut headers, production);
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store, no-cache, must-revalidate, private"));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(EXPIRES, HeaderValue::from_static("0"));
    headers
}

fn is_json(res: &Response) -> bool {
    // Invalid UTF-8 in Content-Type counts as non-JSON
    res.headers()
        .get(CONTENT_TYPE)
        .and_then(|ct| ct.to_str().ok())
        .map(|s| s.starts_with("application/json"))
        .unwrap_or(false)
}

/// Adds security headers to every response.
///
/// JSON responses get [`build_api_headers`]; everything else gets
/// [`build_security_headers`] with this request's nonce.
pub async fn security_headers_middleware(
    State(state): State<SecurityState>,
    mut req: Request,
    next: Next,
) -> Response {
    let nonce = generate_nonce();
    req.extensions_mut().insert(CspNonce(nonce.clone()));

    let production = state.config.security.production;
    let mut res = next.run(req).await;

    let set = if is_json(&res) {
        build_api_headers(production)
    } else {
        build_security_headers(Some(&nonce), production)
    };
    res.headers_mut().extend(set);
    res
}

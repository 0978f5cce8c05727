//! Cross-Site Request Forgery (CSRF) protection.
//!
//! Tokens are stateless: `nonce:timestamp:signature`, where the signature is
//! HMAC-SHA256 over `nonce:timestamp` with a server secret. Nothing is stored
//! server-side; a token's lifetime is bounded only by its embedded timestamp.
//! Tokens are read from the `X-CSRF-Token` header only, never from the body or
//! query string, so they do not end up in cached URLs or access logs.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;

use crate::audit::{EventContext, NewSecurityEvent};
use crate::clock::Clock;
use crate::error::AppError;
use crate::state::SecurityState;

type HmacSha256 = Hmac<Sha256>;

pub const CSRF_HEADER: &str = "x-csrf-token";
const NONCE_BYTES: usize = 32;
/// Tolerated clock skew for timestamps slightly in the future.
const MAX_FUTURE_SKEW_MS: u64 = 60_000;

/// Generates and validates signed, time-limited anti-forgery tokens.
#[derive(Clone)]
pub struct CsrfCodec {
    secret: Arc<Vec<u8>>,
    expiry: Duration,
    clock: Arc<dyn Clock>,
}

impl CsrfCodec {
    pub fn new(secret: impl AsRef<[u8]>, expiry: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { secret: Arc::new(secret.as_ref().to_vec()), expiry, clock }
    }

    pub fn expiry(&self) -> Duration {
        self.expiry
    }

    /// Produces a fresh `nonce:timestamp:signature` token.
    pub fn generate(&self) -> String {
        let mut nonce = [0u8; NONCE_BYTES];
        rand::thread_rng().fill_bytes(&mut nonce);
        let nonce = hex::encode(nonce);
        let timestamp = self.clock.now_millis();
        let payload = format!("{}:{}", nonce, timestamp);
        let signature = self.sign(&payload);
        format!("{}:{}", payload, signature)
    }

    /// Returns `true` only for a well-formed, unexpired token carrying a valid
    /// signature. Every failure mode resolves to `false`.
    pub fn validate(&self, token: &str) -> bool {
        let parts: Vec<&str> = token.split(':').collect();
        let [nonce, timestamp, signature] = parts.as_slice() else {
            return false;
        };
        if nonce.is_empty() {
            return false;
        }
        // Digits only: `u64::from_str` would also accept a leading '+'
        if timestamp.is_empty() || !timestamp.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
        let Ok(issued_at) = timestamp.parse::<u64>() else {
            return false;
        };

        let now = self.clock.now_millis();
        if issued_at > now.saturating_add(MAX_FUTURE_SKEW_MS) {
            return false;
        }
        if now.saturating_sub(issued_at) > self.expiry.as_millis() as u64 {
            return false;
        }

        let expected = self.sign(&format!("{}:{}", nonce, timestamp));
        let (expected, supplied) = (expected.as_bytes(), signature.as_bytes());
        // Length mismatch is rejected before the constant-time path
        if expected.len() != supplied.len() {
            return false;
        }
        expected.ct_eq(supplied).into()
    }

    /// Reads the token from the dedicated request header.
    pub fn extract(headers: &HeaderMap) -> Option<&str> {
        headers.get(CSRF_HEADER).and_then(|v| v.to_str().ok()).map(str::trim).filter(|s| !s.is_empty())
    }

    /// Safe methods always pass; state-changing ones need a valid token.
    pub fn verify(&self, method: &Method, headers: &HeaderMap) -> bool {
        if !is_state_changing(method) {
            return true;
        }
        Self::extract(headers).map(|token| self.validate(token)).unwrap_or(false)
    }

    fn sign(&self, payload: &str) -> String {
        // HMAC accepts keys of any length, so this cannot fail
        let mut mac = match HmacSha256::new_from_slice(&self.secret) {
            Ok(mac) => mac,
            Err(_) => return String::new(),
        };
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

pub fn is_state_changing(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH | Method::DELETE)
}

/// CSRF protection middleware for state-changing operations.
///
/// Rejects POST/PUT/PATCH/DELETE requests without a valid `X-CSRF-Token`
/// header with `403 Forbidden` and records a `CsrfViolation` audit event.
pub async fn csrf_protection_middleware(
    State(state): State<SecurityState>,
    req: Request,
    next: Next,
) -> Response {
    if state.csrf.verify(req.method(), req.headers()) {
        return next.run(req).await;
    }

    let reason = if CsrfCodec::extract(req.headers()).is_some() {
        "invalid or expired token"
    } else {
        "missing token"
    };
    let ctx = EventContext::from_request(&req);
    state.audit.record(NewSecurityEvent::csrf_violation(&ctx, reason));
    state.metrics.inc_csrf_rejected();

    AppError::CsrfRejected(format!("CSRF token {}. Include a valid '{}' header", reason, CSRF_HEADER))
        .into_response()
}

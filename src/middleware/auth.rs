use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;

use crate::audit::{EventContext, NewSecurityEvent};
use crate::error::AppError;
use crate::state::SecurityState;

/// Guards the admin API with a static bearer token.
///
/// Without a configured `security.admin_token` the admin API is disabled and
/// every request is refused with `403`. A missing or wrong token answers
/// `401` and records an `UnauthorizedAccess` audit event.
pub async fn admin_auth_middleware(
    State(state): State<SecurityState>,
    req: Request,
    next: Next,
) -> Response {
    let expected = match state.config.security.admin_token.as_deref() {
        Some(t) if !t.is_empty() => t,
        _ => {
            return AppError::Forbidden("Admin API is disabled: no admin token configured".to_string())
                .into_response()
        }
    };

    let provided = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        Some(token) if token_matches(token, expected) => next.run(req).await,
        other => {
            let reason = if other.is_some() { "invalid admin token" } else { "missing admin token" };
            let ctx = EventContext::from_request(&req);
            state.audit.record(NewSecurityEvent::unauthorized_access(&ctx, reason));
            AppError::Unauthorized(reason.to_string()).into_response()
        }
    }
}

fn token_matches(provided: &str, expected: &str) -> bool {
    let (a, b) = (provided.as_bytes(), expected.as_bytes());
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_matches() {
        assert!(token_matches("s3cret", "s3cret"));
        assert!(!token_matches("s3cret", "s3creT"));
        assert!(!token_matches("s3cre", "s3cret"));
        assert!(!token_matches("", "s3cret"));
    }
}

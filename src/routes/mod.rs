//! HTTP route handlers.
//!
//! - `health`: liveness, version and metrics endpoints
//! - `security`: CSRF token issuance and the admin security API

pub mod health;
pub mod security;

use axum::{
    middleware::from_fn_with_state,
    routing::{delete, get, post},
    Router,
};

use crate::middleware;
use crate::state::SecurityState;

/// The full router with the security layers applied.
///
/// Layers run outermost first: security headers, rate limiting, CSRF,
/// request validation. `/admin/*` additionally requires the admin token.
pub fn router(state: SecurityState) -> Router {
    let admin = Router::new()
        .route("/security/events", get(security::list_events))
        .route("/security/stats", get(security::stats))
        .route("/security/blacklist", post(security::add_to_blacklist))
        .route("/security/blacklist/{ip}", delete(security::remove_from_blacklist))
        .route("/security/rate-limits/{identifier}", delete(security::reset_rate_limit))
        .route_layer(from_fn_with_state(state.clone(), middleware::admin_auth_middleware));

    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/version", get(health::version))
        .route("/metrics", get(health::metrics))
        .route("/metrics/prometheus", get(health::metrics_prometheus))
        .route("/csrf-token", get(security::csrf_token))
        .nest("/admin", admin)
        .layer(from_fn_with_state(state.clone(), middleware::validate_request_middleware))
        .layer(from_fn_with_state(state.clone(), middleware::csrf_protection_middleware))
        .layer(from_fn_with_state(state.clone(), middleware::rate_limit_middleware))
        .layer(from_fn_with_state(state.clone(), middleware::security_headers_middleware))
        .with_state(state)
}

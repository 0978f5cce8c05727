use crate::state::SecurityState;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};

// Liveness probe - lightweight, exempt from rate limiting
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

// Metrics endpoint: returns JSON snapshot
pub async fn metrics(State(state): State<SecurityState>) -> impl IntoResponse {
    Json(state.metrics_snapshot())
}

// Prometheus-compatible text exposition format
pub async fn metrics_prometheus(State(state): State<SecurityState>) -> impl IntoResponse {
    let m = state.metrics_snapshot();
    let body = format!(
        "# HELP wachposten_requests_checked Requests checked against rate limits\n# TYPE wachposten_requests_checked counter\nwachposten_requests_checked {}\n\
# HELP wachposten_requests_rate_limited Requests rejected by a rate limit\n# TYPE wachposten_requests_rate_limited counter\nwachposten_requests_rate_limited {}\n\
# HELP wachposten_requests_blacklisted Requests rejected from blacklisted IPs\n# TYPE wachposten_requests_blacklisted counter\nwachposten_requests_blacklisted {}\n\
# HELP wachposten_ips_blacklisted IPs promoted to the blacklist\n# TYPE wachposten_ips_blacklisted counter\nwachposten_ips_blacklisted {}\n\
# HELP wachposten_csrf_rejected Requests rejected by CSRF protection\n# TYPE wachposten_csrf_rejected counter\nwachposten_csrf_rejected {}\n\
# HELP wachposten_threats_detected Requests rejected by input analysis\n# TYPE wachposten_threats_detected counter\nwachposten_threats_detected {}\n\
# HELP wachposten_tracked_identifiers Rate-limit identifiers in memory\n# TYPE wachposten_tracked_identifiers gauge\nwachposten_tracked_identifiers {}\n\
# HELP wachposten_blacklist_size Blacklist entries in memory\n# TYPE wachposten_blacklist_size gauge\nwachposten_blacklist_size {}\n\
# HELP wachposten_audit_events Audit events retained\n# TYPE wachposten_audit_events gauge\nwachposten_audit_events {}\n\
# HELP wachposten_uptime_seconds Uptime seconds\n# TYPE wachposten_uptime_seconds gauge\nwachposten_uptime_seconds {}\n",
        m.requests_checked,
        m.requests_rate_limited,
        m.requests_blacklisted,
        m.ips_blacklisted,
        m.csrf_rejected,
        m.threats_detected,
        m.tracked_identifiers,
        m.blacklist_size,
        m.audit_events,
        m.uptime_seconds,
    );
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}

// Version/Build info endpoint (JSON)
pub async fn version() -> impl IntoResponse {
    let body = serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "package": {
            "description": env!("CARGO_PKG_DESCRIPTION"),
            "license": env!("CARGO_PKG_LICENSE"),
        },
        "build": {
            "profile": if cfg!(debug_assertions) { "debug" } else { "release" },
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
        }
    });
    (StatusCode::OK, Json(body))
}

use std::net::IpAddr;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use crate::audit::Severity;
use crate::error::{AppError, AppResult, OptionExt};
use crate::state::SecurityState;
use crate::types::{
    BlacklistRequest, BlacklistResponse, CsrfTokenResponse, EventsQuery, EventsResponse, StatsResponse,
    DEFAULT_EVENT_LIMIT, MAX_EVENT_LIMIT,
};

// Issues a fresh anti-forgery token. Clients echo it in `X-CSRF-Token`.
pub async fn csrf_token(State(state): State<SecurityState>) -> impl IntoResponse {
    Json(CsrfTokenResponse {
        csrf_token: state.csrf.generate(),
        expires_in: state.csrf.expiry().as_secs(),
    })
}

pub async fn list_events(
    State(state): State<SecurityState>,
    Query(q): Query<EventsQuery>,
) -> AppResult<Json<EventsResponse>> {
    let limit = q.limit.unwrap_or(DEFAULT_EVENT_LIMIT).clamp(1, MAX_EVENT_LIMIT);
    let severity = match q.severity.as_deref() {
        Some(s) => Some(s.parse::<Severity>().map_err(|_| AppError::ValidationError {
            field: "severity".to_string(),
            message: format!("unknown severity '{}'", s),
        })?),
        None => None,
    };

    let items = state.audit.query(limit, severity);
    Ok(Json(EventsResponse { count: items.len(), items }))
}

pub async fn stats(State(state): State<SecurityState>) -> impl IntoResponse {
    Json(StatsResponse {
        audit: state.audit.stats(),
        blacklist_size: state.guard.blacklist().len(),
        tracked_identifiers: state.guard.limiter().len(),
    })
}

pub async fn add_to_blacklist(
    State(state): State<SecurityState>,
    Json(req): Json<BlacklistRequest>,
) -> AppResult<impl IntoResponse> {
    let ip = req.ip.trim();
    if ip.parse::<IpAddr>().is_err() {
        return Err(AppError::ValidationError {
            field: "ip".to_string(),
            message: format!("'{}' is not a valid IP address", ip),
        });
    }
    let duration_secs = match req.duration_secs {
        Some(0) => {
            return Err(AppError::ValidationError {
                field: "duration_secs".to_string(),
                message: "must be > 0".to_string(),
            })
        }
        Some(secs) => secs,
        None => state.guard.blacklist_duration().as_secs(),
    };

    state.guard.blacklist().add(ip, Duration::from_secs(duration_secs));
    state.metrics.inc_ips_blacklisted();
    Ok((StatusCode::CREATED, Json(BlacklistResponse { ip: ip.to_string(), duration_secs })))
}

pub async fn remove_from_blacklist(
    State(state): State<SecurityState>,
    Path(ip): Path<String>,
) -> AppResult<StatusCode> {
    state.guard.blacklist().remove(&ip).then_some(()).ok_or_not_found("Blacklist entry")?;
    tracing::info!(ip = %ip, "IP removed from blacklist");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn reset_rate_limit(
    State(state): State<SecurityState>,
    Path(identifier): Path<String>,
) -> AppResult<StatusCode> {
    state.guard.reset(&identifier).then_some(()).ok_or_not_found("Rate-limit entry")?;
    tracing::info!(identifier = %identifier, "Rate-limit entry reset");
    Ok(StatusCode::NO_CONTENT)
}

use serde::{Deserialize, Serialize};

use crate::audit::{AuditStats, SecurityEvent};

/// Default and ceiling for `GET /admin/security/events?limit=`.
pub const DEFAULT_EVENT_LIMIT: usize = 100;
pub const MAX_EVENT_LIMIT: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsrfTokenResponse {
    pub csrf_token: String,
    /// Seconds until the token expires.
    pub expires_in: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventsQuery {
    pub limit: Option<usize>,
    pub severity: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventsResponse {
    pub items: Vec<SecurityEvent>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub audit: AuditStats,
    pub blacklist_size: usize,
    pub tracked_identifiers: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlacklistRequest {
    pub ip: String,
    /// Defaults to `rate_limits.blacklist_secs`.
    pub duration_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlacklistResponse {
    pub ip: String,
    pub duration_secs: u64,
}

//! Fixed-window rate limiting with a punitive block period.
//!
//! Each identifier gets a counter that opens a window on its first request.
//! Once the window's budget is spent, the next request blocks the identifier
//! for the policy's block duration. Bursts straddling a window boundary can
//! reach up to twice the nominal rate; that is the price of O(1) state per
//! identifier and is accepted here.

use std::{
    collections::HashMap,
    fmt,
    str::FromStr,
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::{
    extract::{Request, State},
    http::{HeaderName, HeaderValue, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::blacklist::Blacklist;
use super::csrf::is_state_changing;
use crate::audit::{EventContext, NewSecurityEvent};
use crate::clock::Clock;
use crate::config::{PolicyLimits, RateLimitSettings};
use crate::error::AppError;
use crate::lock_utils::lock_or_recover;
use crate::state::SecurityState;

/// Named rate-limit budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    Login,
    Api,
    Mutation,
    Sensitive,
}

impl Policy {
    pub const ALL: [Policy; 4] = [Policy::Login, Policy::Api, Policy::Mutation, Policy::Sensitive];

    pub fn as_str(&self) -> &'static str {
        match self {
            Policy::Login => "login",
            Policy::Api => "api",
            Policy::Mutation => "mutation",
            Policy::Sensitive => "sensitive",
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Policy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Policy::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("unknown rate-limit policy: {}", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Ip,
    User,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Ip => "ip",
            Scope::User => "user",
        }
    }
}

/// A rate-limit key: `<policy>:<scope>:<value>`.
///
/// Uniqueness is purely string-based, so the same IP under two policies has
/// two independent budgets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
    pub policy: Policy,
    pub scope: Scope,
    pub value: String,
}

impl Identifier {
    pub fn ip(policy: Policy, ip: &str) -> Self {
        Self { policy, scope: Scope::Ip, value: ip.to_string() }
    }

    pub fn user(policy: Policy, user_id: &str) -> Self {
        Self { policy, scope: Scope::User, value: user_id.to_string() }
    }

    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.policy, self.scope.as_str(), self.value)
    }
}

/// Budget for one policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub max_attempts: u32,
    pub window: Duration,
    pub block_duration: Duration,
}

impl RateLimitConfig {
    pub const fn new(max_attempts: u32, window_secs: u64, block_secs: u64) -> Self {
        Self {
            max_attempts,
            window: Duration::from_secs(window_secs),
            block_duration: Duration::from_secs(block_secs),
        }
    }
}

impl From<PolicyLimits> for RateLimitConfig {
    fn from(limits: PolicyLimits) -> Self {
        Self::new(limits.max_attempts, limits.window_secs, limits.block_secs)
    }
}

/// Lookup table from policy name to budget.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    limits: HashMap<Policy, RateLimitConfig>,
}

impl PolicyTable {
    pub fn from_settings(settings: &RateLimitSettings) -> Self {
        let limits = HashMap::from([
            (Policy::Login, settings.login.into()),
            (Policy::Api, settings.api.into()),
            (Policy::Mutation, settings.mutation.into()),
            (Policy::Sensitive, settings.sensitive.into()),
        ]);
        Self { limits }
    }

    pub fn get(&self, policy: Policy) -> RateLimitConfig {
        self.limits.get(&policy).copied().unwrap_or_else(|| Self::default().limits[&policy])
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        let limits = HashMap::from([
            (Policy::Login, RateLimitConfig::new(5, 15 * 60, 30 * 60)),
            (Policy::Api, RateLimitConfig::new(100, 60, 5 * 60)),
            (Policy::Mutation, RateLimitConfig::new(30, 60, 10 * 60)),
            (Policy::Sensitive, RateLimitConfig::new(3, 60 * 60, 24 * 60 * 60)),
        ]);
        Self { limits }
    }
}

/// Per-identifier counter state. All instants are epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitEntry {
    /// Allowed attempts in the current window.
    pub count: u32,
    pub reset_time: u64,
    pub first_attempt: u64,
    /// Never earlier than `reset_time` at the moment it is set.
    pub blocked_until: Option<u64>,
    /// Every attempt since `first_attempt`, denied ones included.
    pub total_attempts: u32,
}

impl RateLimitEntry {
    fn fresh(now: u64, window: Duration) -> Self {
        Self {
            count: 1,
            reset_time: now.saturating_add(window.as_millis() as u64),
            first_attempt: now,
            blocked_until: None,
            total_attempts: 1,
        }
    }

    fn expires_at(&self) -> u64 {
        self.reset_time.max(self.blocked_until.unwrap_or(0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    Blacklisted,
    IpLimit,
    UserLimit,
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    /// Seconds until the caller may retry, rounded up. Set on every deny.
    pub retry_after: Option<u64>,
    pub is_blocked: bool,
    /// Cumulative attempts recorded for the identifier that decided.
    pub attempts: u32,
    pub denied_by: Option<DenyReason>,
    /// The IP was promoted to the blacklist by this very check.
    pub escalated: bool,
}

impl RateLimitDecision {
    fn allow(remaining: u32, attempts: u32) -> Self {
        Self {
            allowed: true,
            remaining,
            retry_after: None,
            is_blocked: false,
            attempts,
            denied_by: None,
            escalated: false,
        }
    }

    fn blocked(retry_after_ms: u64, attempts: u32) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            retry_after: Some(retry_after_ms.div_ceil(1000)),
            is_blocked: true,
            attempts,
            denied_by: None,
            escalated: false,
        }
    }
}

/// A thread-safe fixed-window rate limiter keyed by identifier strings.
#[derive(Clone)]
pub struct RateLimiter {
    entries: Arc<Mutex<HashMap<String, RateLimitEntry>>>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { entries: Arc::new(Mutex::new(HashMap::new())), clock }
    }

    /// Records one attempt for `identifier` and decides whether it may proceed.
    ///
    /// The whole read-modify-write happens under one lock, so two concurrent
    /// calls for the same identifier can never both slip past the limit.
    pub fn check(&self, identifier: &str, config: &RateLimitConfig) -> RateLimitDecision {
        let now = self.clock.now_millis();
        let mut entries = lock_or_recover(&self.entries, "rate limiter");

        if let Some(entry) = entries.get_mut(identifier) {
            if let Some(blocked_until) = entry.blocked_until.filter(|&until| until > now) {
                entry.total_attempts = entry.total_attempts.saturating_add(1);
                return RateLimitDecision::blocked(blocked_until - now, entry.total_attempts);
            }

            if now <= entry.reset_time {
                entry.total_attempts = entry.total_attempts.saturating_add(1);
                if entry.count >= config.max_attempts {
                    let blocked_until =
                        now.saturating_add(config.block_duration.as_millis() as u64).max(entry.reset_time);
                    entry.blocked_until = Some(blocked_until);
                    return RateLimitDecision::blocked(blocked_until - now, entry.total_attempts);
                }
                entry.count += 1;
                return RateLimitDecision::allow(
                    config.max_attempts - entry.count,
                    entry.total_attempts,
                );
            }
        }

        entries.insert(identifier.to_string(), RateLimitEntry::fresh(now, config.window));
        RateLimitDecision::allow(config.max_attempts.saturating_sub(1), 1)
    }

    /// Forgets `identifier`, e.g. after a successful login.
    pub fn reset(&self, identifier: &str) -> bool {
        lock_or_recover(&self.entries, "rate limiter").remove(identifier).is_some()
    }

    pub fn peek(&self, identifier: &str) -> Option<RateLimitEntry> {
        lock_or_recover(&self.entries, "rate limiter").get(identifier).copied()
    }

    pub fn len(&self) -> usize {
        lock_or_recover(&self.entries, "rate limiter").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evicts entries whose window and block have both been over for longer
    /// than `margin`. Returns how many were removed.
    pub fn cleanup_expired(&self, margin: Duration) -> usize {
        let now = self.clock.now_millis();
        let margin_ms = margin.as_millis() as u64;
        let mut entries = lock_or_recover(&self.entries, "rate limiter");
        let before = entries.len();
        entries.retain(|_, entry| now <= entry.expires_at().saturating_add(margin_ms));
        before - entries.len()
    }
}

/// Combines the blacklist with per-IP and per-user budgets.
#[derive(Clone)]
pub struct RateLimitGuard {
    limiter: RateLimiter,
    blacklist: Blacklist,
    policies: PolicyTable,
    blacklist_duration: Duration,
    escalation_factor: u32,
    eviction_margin: Duration,
}

impl RateLimitGuard {
    pub fn new(limiter: RateLimiter, blacklist: Blacklist, settings: &RateLimitSettings) -> Self {
        Self {
            limiter,
            blacklist,
            policies: PolicyTable::from_settings(settings),
            blacklist_duration: settings.blacklist_duration(),
            escalation_factor: settings.escalation_factor,
            eviction_margin: settings.eviction_margin(),
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn blacklist(&self) -> &Blacklist {
        &self.blacklist
    }

    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    pub fn blacklist_duration(&self) -> Duration {
        self.blacklist_duration
    }

    /// Blacklist → IP budget → user budget. The first deny wins.
    ///
    /// An IP that keeps hammering a policy after being blocked, past
    /// `escalation_factor × max_attempts` cumulative attempts, is promoted to
    /// the blacklist.
    pub fn check_multiple(&self, ip: &str, policy: Policy, user_id: Option<&str>) -> RateLimitDecision {
        if self.blacklist.is_member(ip) {
            return RateLimitDecision {
                allowed: false,
                remaining: 0,
                retry_after: Some(self.blacklist_duration.as_secs()),
                is_blocked: true,
                attempts: 0,
                denied_by: Some(DenyReason::Blacklisted),
                escalated: false,
            };
        }

        let config = self.policies.get(policy);
        let mut ip_decision = self.limiter.check(&Identifier::ip(policy, ip).key(), &config);
        if !ip_decision.allowed {
            ip_decision.denied_by = Some(DenyReason::IpLimit);
            let threshold = config.max_attempts.saturating_mul(self.escalation_factor);
            if ip_decision.attempts > threshold {
                tracing::warn!(
                    ip,
                    policy = policy.as_str(),
                    attempts = ip_decision.attempts,
                    "Rate-limit abuse persists, escalating to blacklist"
                );
                self.blacklist.add(ip, self.blacklist_duration);
                ip_decision.escalated = true;
            }
            return ip_decision;
        }

        if let Some(user_id) = user_id {
            let mut user_decision = self.limiter.check(&Identifier::user(policy, user_id).key(), &config);
            if !user_decision.allowed {
                user_decision.denied_by = Some(DenyReason::UserLimit);
                return user_decision;
            }
            // Report the tighter of the two budgets
            if user_decision.remaining < ip_decision.remaining {
                return user_decision;
            }
        }

        ip_decision
    }

    pub fn reset(&self, identifier: &str) -> bool {
        self.limiter.reset(identifier)
    }

    /// One sweep over both stores.
    pub fn cleanup(&self) -> (usize, usize) {
        let entries = self.limiter.cleanup_expired(self.eviction_margin);
        let listed = self.blacklist.cleanup_expired();
        (entries, listed)
    }
}

/// Path prefixes of credential-changing operations.
const SENSITIVE_PREFIXES: &[&str] = &["/auth/password", "/auth/mfa", "/account/password", "/account/email"];

/// Picks the budget for a request. `None` exempts it from rate limiting.
/// Admin API mutations fall under `mutation`.
pub fn select_policy(method: &Method, path: &str) -> Option<Policy> {
    if path == "/healthz" {
        return None;
    }
    if path.starts_with("/auth/login") {
        return Some(Policy::Login);
    }
    if !is_state_changing(method) {
        return Some(Policy::Api);
    }
    if SENSITIVE_PREFIXES.iter().any(|p| path.starts_with(p)) {
        Some(Policy::Sensitive)
    } else {
        Some(Policy::Mutation)
    }
}

/// Applies the blacklist and the per-IP and per-user budgets to every request.
///
/// Denials answer `429` with `Retry-After` and are recorded in the audit log;
/// rejections of an already blacklisted IP at most once per
/// `audit.blacklisted_report_secs`.
/// Allowed responses carry the remaining budget in `X-RateLimit-Remaining`.
pub async fn rate_limit_middleware(
    State(state): State<SecurityState>,
    req: Request,
    next: Next,
) -> Response {
    let Some(policy) = select_policy(req.method(), req.uri().path()) else {
        return next.run(req).await;
    };
    state.metrics.inc_requests_checked();

    let ctx = EventContext::from_request(&req);
    let decision = state.guard.check_multiple(&ctx.ip, policy, ctx.user_id.as_deref());

    if decision.allowed {
        let mut res = next.run(req).await;
        res.headers_mut().insert(
            HeaderName::from_static("x-ratelimit-remaining"),
            HeaderValue::from(decision.remaining),
        );
        return res;
    }

    if decision.denied_by == Some(DenyReason::Blacklisted) {
        state.metrics.inc_requests_blacklisted();
        let interval = state.config.audit.blacklisted_report_interval();
        if state.guard.blacklist().take_report_slot(&ctx.ip, interval) {
            state
                .audit
                .record(NewSecurityEvent::blacklisted_request(&ctx, policy.as_str(), decision.retry_after));
        } else {
            tracing::debug!(ip = %ctx.ip, "Request from blacklisted IP rejected");
        }
    } else {
        state.metrics.inc_requests_rate_limited();
        state
            .audit
            .record(NewSecurityEvent::rate_limit_exceeded(&ctx, policy.as_str(), decision.retry_after));
    }

    if decision.escalated {
        state.metrics.inc_ips_blacklisted();
        state.audit.record(NewSecurityEvent::ip_blacklisted(
            &ctx,
            policy.as_str(),
            state.guard.blacklist_duration().as_secs(),
        ));
    }

    AppError::RateLimited { retry_after_seconds: decision.retry_after.unwrap_or(1) }.into_response()
}

/// Spawns the periodic sweep. It stops as soon as `shutdown` is cancelled.
pub fn spawn_cleanup_task(
    guard: RateLimitGuard,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // The first tick completes immediately
        interval.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!("Rate-limit cleanup task stopped");
                    break;
                }
                _ = interval.tick() => {
                    let (entries, listed) = guard.cleanup();
                    if entries > 0 || listed > 0 {
                        tracing::debug!(entries, listed, "Evicted expired rate-limit state");
                    }
                }
            }
        }
    })
}

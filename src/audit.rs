//! Bounded in-memory audit log of security events.
//!
//! Events are appended once and never mutated. When the buffer is full the
//! oldest event is evicted. Every recorded event is also emitted through
//! `tracing` at a level chosen by its severity, and forwarded to an external
//! [`AuditSink`] when running in production.

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    fmt,
    str::FromStr,
    sync::{Arc, Mutex},
};

use axum::extract::Request;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::lock_utils::lock_or_recover;
use crate::middleware::ip::client_ip;

pub const DEFAULT_CAPACITY: usize = 10_000;
const HOUR_MS: u64 = 60 * 60 * 1000;
const DAY_MS: u64 = 24 * HOUR_MS;
const TOP_IPS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityEventType {
    LoginSuccess,
    LoginFailure,
    RateLimitExceeded,
    IpBlacklisted,
    CsrfViolation,
    SuspiciousInput,
    SqlInjectionAttempt,
    UnauthorizedAccess,
}

impl SecurityEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEventType::LoginSuccess => "LOGIN_SUCCESS",
            SecurityEventType::LoginFailure => "LOGIN_FAILURE",
            SecurityEventType::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            SecurityEventType::IpBlacklisted => "IP_BLACKLISTED",
            SecurityEventType::CsrfViolation => "CSRF_VIOLATION",
            SecurityEventType::SuspiciousInput => "SUSPICIOUS_INPUT",
            SecurityEventType::SqlInjectionAttempt => "SQL_INJECTION_ATTEMPT",
            SecurityEventType::UnauthorizedAccess => "UNAUTHORIZED_ACCESS",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INFO" => Ok(Severity::Info),
            "WARNING" | "WARN" => Ok(Severity::Warning),
            "ERROR" => Ok(Severity::Error),
            "CRITICAL" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {}", other)),
        }
    }
}

/// Request attributes every event carries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventContext {
    pub ip: String,
    pub user_agent: String,
    pub path: String,
    pub method: String,
    pub user_id: Option<String>,
}

impl EventContext {
    pub fn from_request(req: &Request) -> Self {
        let user_agent = req
            .headers()
            .get("user-agent")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string();
        let user_id = req.extensions().get::<AuthenticatedUser>().map(|u| u.0.clone());
        Self {
            ip: client_ip(req),
            user_agent,
            path: req.uri().path().to_string(),
            method: req.method().to_string(),
            user_id,
        }
    }
}

/// Identity placed in request extensions by the authentication layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub String);

/// An event about to be recorded. The audit log stamps the time.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSecurityEvent {
    event_type: SecurityEventType,
    severity: Severity,
    ip: String,
    user_agent: String,
    user_id: Option<String>,
    username: Option<String>,
    path: String,
    method: String,
    details: Option<serde_json::Value>,
    message: String,
}

impl NewSecurityEvent {
    fn from_context(
        ctx: &EventContext,
        event_type: SecurityEventType,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            severity,
            ip: ctx.ip.clone(),
            user_agent: ctx.user_agent.clone(),
            user_id: ctx.user_id.clone(),
            username: None,
            path: ctx.path.clone(),
            method: ctx.method.clone(),
            details: None,
            message: message.into(),
        }
    }

    fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn login_success(ctx: &EventContext, username: &str, user_id: &str) -> Self {
        let mut event = Self::from_context(
            ctx,
            SecurityEventType::LoginSuccess,
            Severity::Info,
            format!("User {} logged in", username),
        );
        event.username = Some(username.to_string());
        event.user_id = Some(user_id.to_string());
        event
    }

    pub fn login_failure(ctx: &EventContext, username: &str, reason: &str) -> Self {
        let mut event = Self::from_context(
            ctx,
            SecurityEventType::LoginFailure,
            Severity::Warning,
            format!("Failed login attempt for user {}", username),
        )
        .with_details(serde_json::json!({ "reason": reason }));
        event.username = Some(username.to_string());
        event
    }

    pub fn rate_limit_exceeded(ctx: &EventContext, policy: &str, retry_after: Option<u64>) -> Self {
        Self::from_context(
            ctx,
            SecurityEventType::RateLimitExceeded,
            Severity::Warning,
            format!("Rate limit exceeded for {} policy", policy),
        )
        .with_details(serde_json::json!({ "policy": policy, "retry_after_seconds": retry_after }))
    }

    /// A request rejected because its IP is already blacklisted.
    pub fn blacklisted_request(ctx: &EventContext, policy: &str, retry_after: Option<u64>) -> Self {
        Self::from_context(
            ctx,
            SecurityEventType::RateLimitExceeded,
            Severity::Warning,
            format!("Request from blacklisted IP {} rejected", ctx.ip),
        )
        .with_details(serde_json::json!({
            "policy": policy,
            "reason": "blacklisted",
            "retry_after_seconds": retry_after,
        }))
    }

    pub fn ip_blacklisted(ctx: &EventContext, policy: &str, duration_secs: u64) -> Self {
        Self::from_context(
            ctx,
            SecurityEventType::IpBlacklisted,
            Severity::Error,
            format!("IP {} blacklisted after persistent abuse", ctx.ip),
        )
        .with_details(serde_json::json!({ "policy": policy, "duration_seconds": duration_secs }))
    }

    pub fn csrf_violation(ctx: &EventContext, reason: &str) -> Self {
        Self::from_context(ctx, SecurityEventType::CsrfViolation, Severity::Error, "CSRF token validation failed")
            .with_details(serde_json::json!({ "reason": reason }))
    }

    pub fn suspicious_input(ctx: &EventContext, threats: &[String], sample: &str) -> Self {
        Self::from_context(
            ctx,
            SecurityEventType::SuspiciousInput,
            Severity::Warning,
            "Suspicious input detected",
        )
        .with_details(serde_json::json!({ "threats": threats, "input": sample }))
    }

    pub fn sql_injection_attempt(ctx: &EventContext, sample: &str) -> Self {
        Self::from_context(
            ctx,
            SecurityEventType::SqlInjectionAttempt,
            Severity::Critical,
            "SQL injection attempt detected",
        )
        .with_details(serde_json::json!({ "input": sample }))
    }

    pub fn unauthorized_access(ctx: &EventContext, reason: &str) -> Self {
        Self::from_context(ctx, SecurityEventType::UnauthorizedAccess, Severity::Warning, reason)
    }

    pub fn event_type(&self) -> SecurityEventType {
        self.event_type
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }
}

/// A recorded, immutable security event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: SecurityEventType,
    pub severity: Severity,
    pub ip: String,
    pub user_agent: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub path: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub message: String,
}

/// Destination for events outside the process (SIEM, log shipper, ...).
pub trait AuditSink: Send + Sync {
    fn forward(&self, event: &SecurityEvent);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl AuditSink for NoopSink {
    fn forward(&self, _event: &SecurityEvent) {}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WindowStats {
    pub total: usize,
    pub by_type: BTreeMap<SecurityEventType, usize>,
    pub by_severity: BTreeMap<Severity, usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IpCount {
    pub ip: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditStats {
    /// Events currently retained.
    pub total: usize,
    pub last_24h: WindowStats,
    pub last_hour: WindowStats,
    /// Top 10 IPs by event count over the last 24 hours.
    pub top_ips: Vec<IpCount>,
}

#[derive(Clone)]
pub struct AuditLog {
    events: Arc<Mutex<VecDeque<SecurityEvent>>>,
    capacity: usize,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn AuditSink>,
    forward_to_sink: bool,
}

impl AuditLog {
    pub fn new(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)))),
            capacity,
            clock,
            sink: Arc::new(NoopSink),
            forward_to_sink: false,
        }
    }

    /// Forwards every recorded event to `sink` when `enabled` is set.
    pub fn with_sink(mut self, sink: Arc<dyn AuditSink>, enabled: bool) -> Self {
        self.sink = sink;
        self.forward_to_sink = enabled;
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        lock_or_recover(&self.events, "audit log").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn record(&self, event: NewSecurityEvent) -> SecurityEvent {
        let timestamp = millis_to_datetime(self.clock.now_millis());
        let event = SecurityEvent {
            timestamp,
            event_type: event.event_type,
            severity: event.severity,
            ip: event.ip,
            user_agent: event.user_agent,
            user_id: event.user_id,
            username: event.username,
            path: event.path,
            method: event.method,
            details: event.details,
            message: event.message,
        };

        {
            let mut events = lock_or_recover(&self.events, "audit log");
            events.push_back(event.clone());
            while events.len() > self.capacity {
                events.pop_front();
            }
        }

        emit(&event);
        if self.forward_to_sink {
            self.sink.forward(&event);
        }
        event
    }

    /// Up to `limit` most recent events, newest first.
    pub fn query(&self, limit: usize, severity: Option<Severity>) -> Vec<SecurityEvent> {
        lock_or_recover(&self.events, "audit log")
            .iter()
            .rev()
            .filter(|e| severity.map_or(true, |s| e.severity == s))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> AuditStats {
        let now = self.clock.now_millis();
        let day_cutoff = millis_to_datetime(now.saturating_sub(DAY_MS));
        let hour_cutoff = millis_to_datetime(now.saturating_sub(HOUR_MS));

        let events = lock_or_recover(&self.events, "audit log");
        let mut last_24h = WindowStats::default();
        let mut last_hour = WindowStats::default();
        let mut ips: HashMap<&str, usize> = HashMap::new();

        for event in events.iter().filter(|e| e.timestamp >= day_cutoff) {
            tally(&mut last_24h, event);
            *ips.entry(event.ip.as_str()).or_default() += 1;
            if event.timestamp >= hour_cutoff {
                tally(&mut last_hour, event);
            }
        }

        let mut top_ips: Vec<IpCount> =
            ips.into_iter().map(|(ip, count)| IpCount { ip: ip.to_string(), count }).collect();
        top_ips.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.ip.cmp(&b.ip)));
        top_ips.truncate(TOP_IPS);

        AuditStats { total: events.len(), last_24h, last_hour, top_ips }
    }
}

fn tally(stats: &mut WindowStats, event: &SecurityEvent) {
    stats.total += 1;
    *stats.by_type.entry(event.event_type).or_default() += 1;
    *stats.by_severity.entry(event.severity).or_default() += 1;
}

fn emit(event: &SecurityEvent) {
    let event_type = event.event_type.as_str();
    match event.severity {
        Severity::Critical | Severity::Error => tracing::error!(
            target: "security_audit",
            event_type,
            ip = %event.ip,
            path = %event.path,
            method = %event.method,
            "{}",
            event.message
        ),
        Severity::Warning => tracing::warn!(
            target: "security_audit",
            event_type,
            ip = %event.ip,
            path = %event.path,
            method = %event.method,
            "{}",
            event.message
        ),
        Severity::Info => tracing::info!(
            target: "security_audit",
            event_type,
            ip = %event.ip,
            path = %event.path,
            method = %event.method,
            "{}",
            event.message
        ),
    }
}

fn millis_to_datetime(millis: u64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis as i64).single().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const START: u64 = 1_700_000_000_000;

    fn ctx(ip: &str) -> EventContext {
        EventContext {
            ip: ip.to_string(),
            user_agent: "test-agent".to_string(),
            path: "/auth/login".to_string(),
            method: "POST".to_string(),
            user_id: None,
        }
    }

    fn log(capacity: usize) -> (Arc<ManualClock>, AuditLog) {
        let clock = Arc::new(ManualClock::new(START));
        (clock.clone(), AuditLog::new(capacity, clock))
    }

    #[test]
    fn test_capacity_evicts_oldest_first() {
        let (_, log) = log(5);
        for i in 0..6 {
            log.record(NewSecurityEvent::login_failure(&ctx(&format!("10.0.0.{}", i)), "bob", "bad password"));
        }
        assert_eq!(log.len(), 5);
        assert_eq!(log.stats().total, 5);

        let events = log.query(10, None);
        assert_eq!(events.len(), 5);
        assert_eq!(events[0].ip, "10.0.0.5");
        assert_eq!(events[4].ip, "10.0.0.1");
    }

    #[test]
    fn test_query_filters_by_severity() {
        let (_, log) = log(100);
        let c = ctx("1.1.1.1");
        log.record(NewSecurityEvent::login_success(&c, "alice", "7"));
        log.record(NewSecurityEvent::sql_injection_attempt(&c, "1 OR 1=1"));
        log.record(NewSecurityEvent::csrf_violation(&c, "missing token"));
        log.record(NewSecurityEvent::rate_limit_exceeded(&c, "login", Some(900)));

        let critical = log.query(10, Some(Severity::Critical));
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0].event_type, SecurityEventType::SqlInjectionAttempt);

        let recent = log.query(2, None);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].event_type, SecurityEventType::RateLimitExceeded);
        assert_eq!(recent[1].event_type, SecurityEventType::CsrfViolation);
    }

    #[test]
    fn test_convenience_constructors_fix_shape() {
        let c = ctx("1.1.1.1");
        let ok = NewSecurityEvent::login_success(&c, "alice", "7");
        assert_eq!(ok.event_type(), SecurityEventType::LoginSuccess);
        assert_eq!(ok.severity(), Severity::Info);

        let failed = NewSecurityEvent::login_failure(&c, "alice", "bad password");
        assert_eq!(failed.severity(), Severity::Warning);
        assert_eq!(NewSecurityEvent::csrf_violation(&c, "x").severity(), Severity::Error);
        assert_eq!(NewSecurityEvent::sql_injection_attempt(&c, "x").severity(), Severity::Critical);
    }

    #[test]
    fn test_stats_windows_and_top_ips() {
        let (clock, log) = log(1000);
        // Outside the 24h window once the clock moves on
        log.record(NewSecurityEvent::login_failure(&ctx("9.9.9.9"), "old", "x"));
        clock.advance(Duration::from_secs(23 * 3600));
        for _ in 0..3 {
            log.record(NewSecurityEvent::login_failure(&ctx("2.2.2.2"), "eve", "x"));
        }
        clock.advance(Duration::from_secs(2 * 3600));
        log.record(NewSecurityEvent::csrf_violation(&ctx("3.3.3.3"), "missing token"));
        for i in 0..12 {
            log.record(NewSecurityEvent::rate_limit_exceeded(&ctx(&format!("4.4.4.{}", i)), "api", None));
        }

        let stats = log.stats();
        assert_eq!(stats.total, 17);
        assert_eq!(stats.last_24h.total, 16);
        assert_eq!(stats.last_hour.total, 13);
        assert_eq!(stats.last_24h.by_type.get(&SecurityEventType::LoginFailure), Some(&3));
        assert_eq!(stats.last_hour.by_type.get(&SecurityEventType::LoginFailure), None);
        assert_eq!(stats.last_hour.by_severity.get(&Severity::Error), Some(&1));

        assert_eq!(stats.top_ips.len(), 10);
        assert_eq!(stats.top_ips[0], IpCount { ip: "2.2.2.2".to_string(), count: 3 });
        assert!(stats.top_ips.iter().all(|c| c.ip != "9.9.9.9"));
    }

    #[test]
    fn test_sink_only_in_production() {
        struct Counting(AtomicUsize);
        impl AuditSink for Counting {
            fn forward(&self, _event: &SecurityEvent) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let clock = Arc::new(ManualClock::new(START));
        let sink = Arc::new(Counting(AtomicUsize::new(0)));
        let dev = AuditLog::new(10, clock.clone()).with_sink(sink.clone(), false);
        dev.record(NewSecurityEvent::csrf_violation(&ctx("1.1.1.1"), "x"));
        assert_eq!(sink.0.load(Ordering::SeqCst), 0);

        let prod = AuditLog::new(10, clock).with_sink(sink.clone(), true);
        prod.record(NewSecurityEvent::csrf_violation(&ctx("1.1.1.1"), "x"));
        assert_eq!(sink.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_event_serialization() {
        let (_, log) = log(10);
        let event = log.record(NewSecurityEvent::rate_limit_exceeded(&ctx("1.1.1.1"), "api", Some(60)));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "RATE_LIMIT_EXCEEDED");
        assert_eq!(json["severity"], "WARNING");
        assert_eq!(json["userAgent"], "test-agent");
        assert!(json.get("userId").is_none());
        assert_eq!(json["details"]["retry_after_seconds"], 60);
    }

    #[test]
    fn test_severity_parsing() {
        assert_eq!("critical".parse::<Severity>(), Ok(Severity::Critical));
        assert_eq!("warn".parse::<Severity>(), Ok(Severity::Warning));
        assert!("loud".parse::<Severity>().is_err());
    }
}

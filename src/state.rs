use std::sync::Arc;
use std::time::Duration;

use crate::audit::{AuditLog, AuditSink, EventContext, NewSecurityEvent};
use crate::clock::{Clock, SystemClock};
use crate::config::AppConfig;
use crate::metrics::{Metrics, MetricsSnapshot, StoreGauges};
use crate::middleware::blacklist::Blacklist;
use crate::middleware::csrf::CsrfCodec;
use crate::middleware::rate_limit::{Identifier, Policy, RateLimitGuard, RateLimiter};

/// The shared security state.
///
/// Every store lives behind this explicitly constructed value rather than a
/// process-wide static, so tests and multi-tenant hosts can run isolated
/// instances side by side. Cloning is cheap: all stores are `Arc`-backed.
#[derive(Clone)]
pub struct SecurityState {
    /// The application configuration.
    pub config: Arc<AppConfig>,
    /// Time source shared by every store.
    pub clock: Arc<dyn Clock>,
    /// Blacklist plus per-IP and per-user budgets.
    pub guard: RateLimitGuard,
    /// Stateless anti-forgery tokens.
    pub csrf: CsrfCodec,
    /// Bounded buffer of recorded security events.
    pub audit: AuditLog,
    pub metrics: Metrics,
}

impl SecurityState {
    /// Creates the state on the system clock.
    pub fn new(config: AppConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates the state on an arbitrary clock, e.g. a `ManualClock` in tests.
    pub fn with_clock(config: AppConfig, clock: Arc<dyn Clock>) -> Self {
        let guard = RateLimitGuard::new(
            RateLimiter::new(clock.clone()),
            Blacklist::new(clock.clone()),
            &config.rate_limits,
        );
        let csrf = CsrfCodec::new(
            config.security.csrf_secret.as_bytes(),
            Duration::from_secs(config.security.csrf_expiry_secs),
            clock.clone(),
        );
        let audit = AuditLog::new(config.audit.capacity, clock.clone());

        Self { config: Arc::new(config), clock, guard, csrf, audit, metrics: Metrics::new() }
    }

    /// Installs an external audit sink. It only receives events in production.
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        let production = self.config.security.production;
        self.audit = self.audit.with_sink(sink, production);
        self
    }

    /// Records a successful login and clears the login budgets of the IP and
    /// the user, so earlier failed attempts do not count against them.
    pub fn record_login_success(&self, ctx: &EventContext, username: &str, user_id: &str) {
        self.guard.reset(&Identifier::ip(Policy::Login, &ctx.ip).key());
        self.guard.reset(&Identifier::user(Policy::Login, user_id).key());
        self.audit.record(NewSecurityEvent::login_success(ctx, username, user_id));
    }

    pub fn record_login_failure(&self, ctx: &EventContext, username: &str, reason: &str) {
        self.audit.record(NewSecurityEvent::login_failure(ctx, username, reason));
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.get_snapshot(StoreGauges {
            tracked_identifiers: self.guard.limiter().len(),
            blacklist_size: self.guard.blacklist().len(),
            audit_events: self.audit.len(),
        })
    }
}

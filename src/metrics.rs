use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Counters for the security middleware
#[derive(Clone)]
pub struct Metrics {
    pub requests_checked: Arc<AtomicU64>,
    pub requests_rate_limited: Arc<AtomicU64>,
    pub requests_blacklisted: Arc<AtomicU64>,
    pub ips_blacklisted: Arc<AtomicU64>,
    pub csrf_rejected: Arc<AtomicU64>,
    pub threats_detected: Arc<AtomicU64>,
    pub start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            requests_checked: Arc::new(AtomicU64::new(0)),
            requests_rate_limited: Arc::new(AtomicU64::new(0)),
            requests_blacklisted: Arc::new(AtomicU64::new(0)),
            ips_blacklisted: Arc::new(AtomicU64::new(0)),
            csrf_rejected: Arc::new(AtomicU64::new(0)),
            threats_detected: Arc::new(AtomicU64::new(0)),
            start_time: Instant::now(),
        }
    }

    pub fn inc_requests_checked(&self) {
        self.requests_checked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_requests_rate_limited(&self) {
        self.requests_rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_requests_blacklisted(&self) {
        self.requests_blacklisted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_ips_blacklisted(&self) {
        self.ips_blacklisted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_csrf_rejected(&self) {
        self.csrf_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_threats_detected(&self) {
        self.threats_detected.fetch_add(1, Ordering::Relaxed);
    }

    /// Counter values plus the gauges the caller reads from the stores.
    pub fn get_snapshot(&self, gauges: StoreGauges) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_checked: self.requests_checked.load(Ordering::Relaxed),
            requests_rate_limited: self.requests_rate_limited.load(Ordering::Relaxed),
            requests_blacklisted: self.requests_blacklisted.load(Ordering::Relaxed),
            ips_blacklisted: self.ips_blacklisted.load(Ordering::Relaxed),
            csrf_rejected: self.csrf_rejected.load(Ordering::Relaxed),
            threats_detected: self.threats_detected.load(Ordering::Relaxed),
            tracked_identifiers: gauges.tracked_identifiers,
            blacklist_size: gauges.blacklist_size,
            audit_events: gauges.audit_events,
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StoreGauges {
    pub tracked_identifiers: usize,
    pub blacklist_size: usize,
    pub audit_events: usize,
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub requests_checked: u64,
    pub requests_rate_limited: u64,
    pub requests_blacklisted: u64,
    pub ips_blacklisted: u64,
    pub csrf_rejected: u64,
    pub threats_detected: u64,
    pub tracked_identifiers: usize,
    pub blacklist_size: usize,
    pub audit_events: usize,
    pub uptime_seconds: u64,
}

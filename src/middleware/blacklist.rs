//! In-memory IP blacklist with timed expiry.
//!
//! Membership short-circuits every rate-limit policy. Entries carry their own
//! expiry instant: a lookup after that instant treats the IP as absent, and
//! the periodic sweep drops it. Adding an IP again replaces (cancels) the
//! previously scheduled removal. Nothing is persisted across restarts.
//!
//! Each entry also remembers when a rejection of that IP was last reported,
//! so callers can audit a still-active banned client without one event per
//! request.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use crate::clock::Clock;
use crate::lock_utils::lock_or_recover;

#[derive(Debug, Clone, Copy)]
struct Listing {
    expires_at: u64,
    last_reported: Option<u64>,
}

#[derive(Clone)]
pub struct Blacklist {
    entries: Arc<Mutex<HashMap<String, Listing>>>,
    clock: Arc<dyn Clock>,
}

impl Blacklist {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { entries: Arc::new(Mutex::new(HashMap::new())), clock }
    }

    /// Blacklists `ip` for `duration`, replacing any earlier expiry.
    pub fn add(&self, ip: &str, duration: Duration) {
        let expires_at = self.clock.now_millis().saturating_add(duration.as_millis() as u64);
        lock_or_recover(&self.entries, "blacklist")
            .insert(ip.to_string(), Listing { expires_at, last_reported: None });
        tracing::warn!(ip, duration_secs = duration.as_secs(), "IP blacklisted");
    }

    /// Removes `ip` before its scheduled expiry. Returns whether it was listed.
    pub fn remove(&self, ip: &str) -> bool {
        let now = self.clock.now_millis();
        match lock_or_recover(&self.entries, "blacklist").remove(ip) {
            Some(listing) => listing.expires_at > now,
            None => false,
        }
    }

    pub fn is_member(&self, ip: &str) -> bool {
        let now = self.clock.now_millis();
        lock_or_recover(&self.entries, "blacklist")
            .get(ip)
            .map(|l| l.expires_at > now)
            .unwrap_or(false)
    }

    /// Time until `ip` is released, if it is currently listed.
    pub fn remaining(&self, ip: &str) -> Option<Duration> {
        let now = self.clock.now_millis();
        lock_or_recover(&self.entries, "blacklist")
            .get(ip)
            .filter(|l| l.expires_at > now)
            .map(|l| Duration::from_millis(l.expires_at - now))
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        let now = self.clock.now_millis();
        lock_or_recover(&self.entries, "blacklist").values().filter(|l| l.expires_at > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops expired entries. Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let mut entries = lock_or_recover(&self.entries, "blacklist");
        let before = entries.len();
        entries.retain(|_, l| l.expires_at > now);
        before - entries.len()
    }

    /// Whether a rejection of the listed `ip` should be reported now: true for
    /// the first rejection and then at most once per `interval`. Marks the
    /// entry as reported when it returns true. Unlisted IPs are never reported.
    pub fn take_report_slot(&self, ip: &str, interval: Duration) -> bool {
        let now = self.clock.now_millis();
        let mut entries = lock_or_recover(&self.entries, "blacklist");
        let Some(listing) = entries.get_mut(ip).filter(|l| l.expires_at > now) else {
            return false;
        };
        let due = match listing.last_reported {
            Some(at) => now.saturating_sub(at) >= interval.as_millis() as u64,
            None => true,
        };
        if due {
            listing.last_reported = Some(now);
        }
        due
    }
}

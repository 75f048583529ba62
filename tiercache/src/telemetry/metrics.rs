//! Atomic counters for cache activity.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use super::StatsSnapshot;

/// Counters shared by every clone of an orchestrator.
///
/// All counters use relaxed ordering; they are for observation, not
/// synchronization.
#[derive(Debug)]
pub struct CacheStats {
    requests: AtomicU64,
    local_hits: AtomicU64,
    shared_hits: AtomicU64,
    negative_hits: AtomicU64,
    loads: AtomicU64,
    loads_not_found: AtomicU64,
    load_failures: AtomicU64,
    write_failures: AtomicU64,
    cancelled: AtomicU64,
    started_at: Instant,
}

impl CacheStats {
    pub fn new() -> Self {
        Self {
            requests: AtomicU64::new(0),
            local_hits: AtomicU64::new(0),
            shared_hits: AtomicU64::new(0),
            negative_hits: AtomicU64::new(0),
            loads: AtomicU64::new(0),
            loads_not_found: AtomicU64::new(0),
            load_failures: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub(crate) fn request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn local_hit(&self) {
        self.local_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn shared_hit(&self) {
        self.shared_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// A negative marker answered the request.
    pub(crate) fn negative_hit(&self) {
        self.negative_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// A loader was invoked.
    pub(crate) fn load(&self) {
        self.loads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn load_not_found(&self) {
        self.loads_not_found.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn load_failure(&self) {
        self.load_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// A tier write during population failed and was swallowed.
    pub(crate) fn write_failure(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn cancellation(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of loader invocations so far.
    pub fn loads(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    /// Take a point-in-time copy of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            local_hits: self.local_hits.load(Ordering::Relaxed),
            shared_hits: self.shared_hits.load(Ordering::Relaxed),
            negative_hits: self.negative_hits.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            loads_not_found: self.loads_not_found.load(Ordering::Relaxed),
            load_failures: self.load_failures.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            uptime: self.started_at.elapsed(),
        }
    }
}

impl Default for CacheStats {
    fn default() -> Self {
        Self::new()
    }
}

//! Point-in-time view of cache counters.

use std::fmt;
use std::time::Duration;

/// Copy of [`CacheStats`](super::CacheStats) at one moment.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StatsSnapshot {
    /// Calls to `get` and its variants.
    pub requests: u64,
    pub local_hits: u64,
    pub shared_hits: u64,
    /// Requests answered by a cached negative marker.
    pub negative_hits: u64,
    /// Loader invocations.
    pub loads: u64,
    /// Loads that reported the entry does not exist.
    pub loads_not_found: u64,
    pub load_failures: u64,
    /// Tier writes that failed during population.
    pub write_failures: u64,
    /// Calls that gave up on a deadline or cancellation.
    pub cancelled: u64,
    pub uptime: Duration,
}

impl StatsSnapshot {
    /// Fraction of requests answered from a tier (value or negative marker).
    pub fn hit_rate(&self) -> f64 {
        if self.requests == 0 {
            return 0.0;
        }
        let hits = self.local_hits + self.shared_hits + self.negative_hits;
        hits as f64 / self.requests as f64
    }

    /// Requests per second since the stats were created.
    pub fn requests_per_second(&self) -> f64 {
        let secs = self.uptime.as_secs_f64();
        if secs <= 0.0 {
            0.0
        } else {
            self.requests as f64 / secs
        }
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "requests={} local_hits={} shared_hits={} negative_hits={} loads={} \
             not_found={} load_failures={} write_failures={} cancelled={} hit_rate={:.1}%",
            self.requests,
            self.local_hits,
            self.shared_hits,
            self.negative_hits,
            self.loads,
            self.loads_not_found,
            self.load_failures,
            self.write_failures,
            self.cancelled,
            self.hit_rate() * 100.0
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let snapshot = StatsSnapshot {
            requests: 10,
            local_hits: 5,
            shared_hits: 2,
            negative_hits: 1,
            ..Default::default()
        };
        assert!((snapshot.hit_rate() - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn test_display() {
        let snapshot = StatsSnapshot {
            requests: 4,
            local_hits: 2,
            loads: 2,
            ..Default::default()
        };
        let text = snapshot.to_string();
        assert!(text.starts_with("requests=4 local_hits=2"));
        assert!(text.contains("loads=2"));
        assert!(text.ends_with("hit_rate=50.0%"));
    }
}

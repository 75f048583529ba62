//! Expiration policies and TTL jitter.
//!
//! A fixed TTL makes every entry loaded at the same moment expire at the
//! same moment, which sends a burst of loads to the backing source.
//! [`Expiration::Jitter`] spreads expiry by drawing each TTL uniformly from
//! `[min, max)`.

use std::time::Duration;

use rand::Rng;

/// How long a cached value lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expiration {
    /// The entry never expires.
    #[default]
    Never,

    /// The entry expires after a fixed duration. A zero duration means
    /// the entry never expires.
    After(Duration),

    /// The entry expires after a duration drawn uniformly from
    /// `[min, max)` on every write. If `max <= min` this behaves like
    /// `After(min)`.
    Jitter { min: Duration, max: Duration },
}

impl Expiration {
    /// Fixed expiration.
    pub fn after(ttl: Duration) -> Self {
        Expiration::After(ttl)
    }

    /// Jittered expiration in `[min, max)`.
    pub fn jitter(min: Duration, max: Duration) -> Self {
        Expiration::Jitter { min, max }
    }

    /// Draw the TTL for one write.
    ///
    /// Returns `None` when the entry should never expire.
    pub fn sample(&self) -> Option<Duration> {
        match *self {
            Expiration::Never => None,
            Expiration::After(ttl) => non_zero(ttl),
            Expiration::Jitter { min, max } if max <= min => non_zero(min),
            Expiration::Jitter { min, max } => {
                let ttl = rand::rng().random_range(min..max);
                // A zero draw would read as "never expires".
                Some(ttl.max(Duration::from_nanos(1)))
            }
        }
    }
}

fn non_zero(ttl: Duration) -> Option<Duration> {
    if ttl.is_zero() {
        None
    } else {
        Some(ttl)
    }
}

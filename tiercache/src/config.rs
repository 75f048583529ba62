//! Orchestrator configuration.
//!
//! `CacheConfig` collects the behavior switches of an
//! [`Orchestrator`](crate::Orchestrator). Tiers, loaders and the single-flight
//! provider are components, not settings; they are supplied through
//! [`OrchestratorBuilder`](crate::OrchestratorBuilder).

use std::time::Duration;

use crate::codec::CodecKind;
use crate::expiration::Expiration;

/// Default TTL for entries written to the local tier.
///
/// The local tier is a short-lived copy of the shared tier. Keeping the TTL
/// short bounds how long one process can serve a value another process has
/// already replaced.
pub const DEFAULT_LOCAL_TTL: Duration = Duration::from_secs(1);

/// Default TTL for negative markers in the shared tier.
pub const DEFAULT_NEGATIVE_TTL: Duration = Duration::from_secs(5);

/// Behavior settings for an orchestrator.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL for values and negative markers written to the local tier.
    pub local_ttl: Duration,

    /// Whether loader "not found" results are written to the shared tier.
    ///
    /// The local tier always records them for `local_ttl`.
    pub cache_negative: bool,

    /// TTL for negative markers in the shared tier.
    pub negative_ttl: Duration,

    /// Expiration for loaded values when the loader does not set one.
    pub default_expiration: Expiration,

    /// Give every caller its own copy of the result.
    pub isolate_results: bool,

    /// Codec used to copy results when `isolate_results` is on.
    pub isolation_codec: CodecKind,

    /// Delete the shared entry when a load fails.
    pub invalidate_on_load_error: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            local_ttl: DEFAULT_LOCAL_TTL,
            cache_negative: true,
            negative_ttl: DEFAULT_NEGATIVE_TTL,
            default_expiration: Expiration::Never,
            isolate_results: false,
            isolation_codec: CodecKind::default(),
            invalidate_on_load_error: false,
        }
    }
}

impl CacheConfig {
    /// Set the local tier TTL. A zero duration keeps the default.
    pub fn with_local_ttl(mut self, ttl: Duration) -> Self {
        if !ttl.is_zero() {
            self.local_ttl = ttl;
        }
        self
    }

    /// Enable negative caching in the shared tier with the given TTL.
    /// A zero duration keeps the current TTL.
    pub fn with_negative_caching(mut self, ttl: Duration) -> Self {
        self.cache_negative = true;
        if !ttl.is_zero() {
            self.negative_ttl = ttl;
        }
        self
    }

    /// Keep negative markers out of the shared tier.
    pub fn without_negative_caching(mut self) -> Self {
        self.cache_negative = false;
        self
    }

    /// Set the expiration used when a loader does not specify one.
    pub fn with_default_expiration(mut self, expiration: Expiration) -> Self {
        self.default_expiration = expiration;
        self
    }

    /// Copy results per caller using the given codec.
    pub fn with_isolation(mut self, codec: CodecKind) -> Self {
        self.isolate_results = true;
        self.isolation_codec = codec;
        self
    }

    /// Delete the shared entry when a load fails.
    pub fn with_invalidate_on_load_error(mut self, enabled: bool) -> Self {
        self.invalidate_on_load_error = enabled;
        self
    }
}

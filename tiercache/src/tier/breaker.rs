//! Circuit breaker around a tier.
//!
//! A remote tier that is down tends to fail slowly (connection timeouts).
//! The breaker counts consecutive backend failures and, once the threshold
//! is reached, "opens" so calls fail fast with [`TierError::CircuitOpen`]
//! instead of waiting on a dead backend. The orchestrator already treats a
//! failing shared tier as a miss on the read path, so an open circuit turns
//! into direct loads at full speed.
//!
//! # State Machine
//!
//! ```text
//! Closed --[failure_threshold consecutive failures]--> Open
//! Open --[open_duration elapsed]--> HalfOpen
//! HalfOpen --[call succeeds]--> Closed
//! HalfOpen --[call fails]--> Open (reset)
//! ```
//!
//! Only backend failures count. Contract results such as
//! [`TierError::Unsupported`] or codec errors say nothing about the
//! backend's health and pass through without touching the state.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{info, warn};

use super::{BoxFuture, Entry, Lookup, Tier, TierError};
use crate::query::Query;

/// Configuration for the circuit breaker.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures that trip the circuit (default: 5).
    pub failure_threshold: u32,
    /// How long the circuit stays open before probing (default: 5s).
    pub open_duration: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(5),
        }
    }
}

impl BreakerConfig {
    /// Set the failure threshold (minimum 1).
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Set how long the circuit stays open.
    pub fn with_open_duration(mut self, duration: Duration) -> Self {
        self.open_duration = duration;
        self
    }
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through (normal operation).
    Closed,
    /// Calls are rejected without reaching the tier.
    Open,
    /// One probe call passes through; its outcome decides the state.
    HalfOpen,
}

impl CircuitState {
    /// Short status string for logs and reports.
    pub fn display_status(&self) -> &'static str {
        match self {
            CircuitState::Closed => "healthy",
            CircuitState::Open => "failing fast",
            CircuitState::HalfOpen => "probing",
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_started: Option<Instant>,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            probe_started: None,
        }
    }
}

/// Tier decorator that fails fast while its inner tier is unhealthy.
pub struct BreakerTier<T> {
    inner_tier: T,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl<T> std::fmt::Debug for BreakerTier<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakerTier")
            .field("config", &self.config)
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

impl<T> BreakerTier<T> {
    /// Wrap `tier` with a circuit breaker.
    pub fn new(tier: T, config: BreakerConfig) -> Self {
        Self {
            inner_tier: tier,
            config,
            inner: Mutex::new(BreakerInner::new()),
        }
    }

    /// Current circuit state.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// The wrapped tier.
    pub fn inner_tier(&self) -> &T {
        &self.inner_tier
    }

    /// Decide whether a call may proceed, moving Open to HalfOpen once the
    /// open duration has elapsed. Half-open admits a single probe.
    fn admit(&self, tier_name: &str) -> Result<(), TierError> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::HalfOpen => {
                // A probe whose caller went away never records an outcome.
                let stale = inner
                    .probe_started
                    .map(|at| at.elapsed() >= self.config.open_duration)
                    .unwrap_or(true);
                if stale {
                    inner.probe_started = Some(Instant::now());
                    Ok(())
                } else {
                    Err(TierError::CircuitOpen {
                        tier: tier_name.to_string(),
                    })
                }
            }
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.config.open_duration)
                    .unwrap_or(true);
                if elapsed {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_started = Some(Instant::now());
                    info!(tier = tier_name, "Circuit breaker: probing tier");
                    Ok(())
                } else {
                    Err(TierError::CircuitOpen {
                        tier: tier_name.to_string(),
                    })
                }
            }
        }
    }

    fn record<R>(&self, tier_name: &str, result: &Result<R, TierError>) {
        let failed = matches!(result, Err(TierError::Backend(_) | TierError::CircuitOpen { .. }));
        let mut inner = self.inner.lock();

        if !failed {
            if inner.state != CircuitState::Closed {
                info!(tier = tier_name, "Circuit breaker: tier recovered, closing");
            }
            inner.state = CircuitState::Closed;
            inner.consecutive_failures = 0;
            inner.opened_at = None;
            inner.probe_started = None;
            return;
        }

        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        let trip = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.consecutive_failures >= self.config.failure_threshold,
            CircuitState::Open => false,
        };

        if trip {
            warn!(
                tier = tier_name,
                failures = inner.consecutive_failures,
                open_for_ms = self.config.open_duration.as_millis() as u64,
                "Circuit breaker: opening"
            );
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            inner.probe_started = None;
        }
    }
}

impl<T: Sync> BreakerTier<T> {
    fn guarded<'a, R: Send + 'a>(
        &'a self,
        name: &'a str,
        call: BoxFuture<'a, Result<R, TierError>>,
    ) -> BoxFuture<'a, Result<R, TierError>> {
        Box::pin(async move {
            self.admit(name)?;
            let result = call.await;
            self.record(name, &result);
            result
        })
    }
}

impl<V, T> Tier<V> for BreakerTier<T>
where
    V: Send + Sync + 'static,
    T: Tier<V>,
{
    fn name(&self) -> &str {
        self.inner_tier.name()
    }

    fn get<'a>(&'a self, query: &'a Query) -> BoxFuture<'a, Result<Lookup<V>, TierError>> {
        self.guarded(self.inner_tier.name(), self.inner_tier.get(query))
    }

    fn set<'a>(
        &'a self,
        query: &'a Query,
        entry: Entry<V>,
        ttl: Option<Duration>,
    ) -> BoxFuture<'a, Result<(), TierError>> {
        self.guarded(self.inner_tier.name(), self.inner_tier.set(query, entry, ttl))
    }

    fn delete<'a>(&'a self, query: &'a Query) -> BoxFuture<'a, Result<(), TierError>> {
        self.guarded(self.inner_tier.name(), self.inner_tier.delete(query))
    }

    fn delete_namespace<'a>(&'a self, namespace: &'a str) -> BoxFuture<'a, Result<(), TierError>> {
        self.guarded(self.inner_tier.name(), self.inner_tier.delete_namespace(namespace))
    }
}

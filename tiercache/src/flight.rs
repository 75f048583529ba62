//! Single-flight load coordination.
//!
//! When many callers miss on the same key at once, only one of them should
//! reach the loader. [`FlightGroup`] keeps one shared future per in-flight
//! key; later callers join it and receive a clone of the same result.
//!
//! # Detached Execution
//!
//! The work is spawned on the Tokio runtime when the flight starts. Callers
//! only hold a handle to its result, so a caller that gives up (deadline,
//! cancellation, dropped future) never cancels the load or the cache
//! population that follows it. The in-flight entry is removed by the task
//! itself once the work has finished.

use std::fmt;
use std::sync::Arc;

use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use futures::future::{FutureExt, Shared};
use thiserror::Error;
use tracing::{debug, warn};

use crate::tier::BoxFuture;

/// The spawned flight task ended without producing a result (it panicked or
/// the runtime shut down).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("in-flight load aborted: {reason}")]
pub struct FlightAborted {
    pub reason: String,
}

impl FlightAborted {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Coordinates executions of work keyed by a string.
///
/// Implementations must run `work` to completion even if the returned
/// future is dropped.
pub trait SingleFlight<T>: Send + Sync {
    /// Run `work` for `key`, or join an execution already running for it.
    fn run(
        &self,
        key: &str,
        work: BoxFuture<'static, T>,
    ) -> BoxFuture<'static, Result<T, FlightAborted>>;

    /// Number of keys currently in flight.
    fn in_flight(&self) -> usize {
        0
    }
}

type SharedFlight<T> = Shared<BoxFuture<'static, Result<T, FlightAborted>>>;

/// Deduplicating single-flight group.
pub struct FlightGroup<T>
where
    T: Clone + Send + Sync + 'static,
{
    flights: Arc<DashMap<String, SharedFlight<T>>>,
}

impl<T> FlightGroup<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            flights: Arc::new(DashMap::new()),
        }
    }
}

impl<T> Default for FlightGroup<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for FlightGroup<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlightGroup")
            .field("in_flight", &self.flights.len())
            .finish()
    }
}

/// Removes the flight entry when the spawned task ends, including by panic.
struct FlightCleanup<T>
where
    T: Clone + Send + Sync + 'static,
{
    flights: Arc<DashMap<String, SharedFlight<T>>>,
    key: String,
}

impl<T> Drop for FlightCleanup<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.flights.remove(&self.key);
    }
}

impl<T> SingleFlight<T> for FlightGroup<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn run(
        &self,
        key: &str,
        work: BoxFuture<'static, T>,
    ) -> BoxFuture<'static, Result<T, FlightAborted>> {
        let flight = match self.flights.entry(key.to_string()) {
            MapEntry::Occupied(occupied) => {
                debug!(key = %key, "Joining in-flight load");
                occupied.get().clone()
            }
            MapEntry::Vacant(vacant) => {
                let cleanup = FlightCleanup {
                    flights: Arc::clone(&self.flights),
                    key: key.to_string(),
                };
                // The entry lock is held until the insert below, so the
                // cleanup cannot run before the flight is visible.
                let handle = tokio::spawn(async move {
                    let _cleanup = cleanup;
                    work.await
                });

                let owned_key = key.to_string();
                let joined: BoxFuture<'static, Result<T, FlightAborted>> =
                    Box::pin(async move {
                        handle.await.map_err(|e| {
                            warn!(key = %owned_key, error = %e, "In-flight load aborted");
                            FlightAborted::new(e.to_string())
                        })
                    });
                let flight = joined.shared();
                vacant.insert(flight.clone());
                flight
            }
        };

        Box::pin(flight)
    }

    fn in_flight(&self) -> usize {
        self.flights.len()
    }
}

/// Pass-through coordinator: every call runs its own work.
///
/// Work is still spawned, so dropping the caller does not cancel it.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDedup;

impl<T> SingleFlight<T> for NoDedup
where
    T: Send + 'static,
{
    fn run(
        &self,
        _key: &str,
        work: BoxFuture<'static, T>,
    ) -> BoxFuture<'static, Result<T, FlightAborted>> {
        let handle = tokio::spawn(work);
        Box::pin(async move { handle.await.map_err(|e| FlightAborted::new(e.to_string())) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counted_work(
        counter: Arc<AtomicUsize>,
        delay: Duration,
        value: u32,
    ) -> BoxFuture<'static, u32> {
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            value
        })
    }

    #[tokio::test]
    async fn test_flight_group_deduplicates_concurrent_calls() {
        let group = Arc::new(FlightGroup::<u32>::new());
        let executions = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let group = Arc::clone(&group);
            let executions = Arc::clone(&executions);
            handles.push(tokio::spawn(async move {
                group
                    .run("k", counted_work(executions, Duration::from_millis(50), 7))
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(7));
        }
        assert_eq!(executions.load(Ordering::SeqCst), 1);
        assert_eq!(group.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_flight_group_distinct_keys_run_separately() {
        let group = FlightGroup::<u32>::new();
        let executions = Arc::new(AtomicUsize::new(0));

        let a = group.run("a", counted_work(Arc::clone(&executions), Duration::from_millis(20), 1));
        let b = group.run("b", counted_work(Arc::clone(&executions), Duration::from_millis(20), 2));
        assert_eq!(group.in_flight(), 2);

        let (a, b) = tokio::join!(a, b);
        assert_eq!((a, b), (Ok(1), Ok(2)));
        assert_eq!(executions.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_flight_group_sequential_calls_run_again() {
        let group = FlightGroup::<u32>::new();
        let executions = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let result = group
                .run("k", counted_work(Arc::clone(&executions), Duration::ZERO, 1))
                .await;
            assert_eq!(result, Ok(1));
        }
        assert_eq!(executions.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_flight_continues_after_caller_drops() {
        let group = FlightGroup::<u32>::new();
        let executions = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));

        let done = Arc::clone(&finished);
        let work = counted_work(Arc::clone(&executions), Duration::from_millis(30), 1);
        let caller = group.run(
            "k",
            Box::pin(async move {
                let value = work.await;
                done.fetch_add(1, Ordering::SeqCst);
                value
            }),
        );
        drop(caller);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(group.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_flight_panic_is_reported_and_cleared() {
        let group = FlightGroup::<u32>::new();

        let work: BoxFuture<'static, u32> = Box::pin(async {
            let explode = true;
            if explode {
                panic!("loader blew up");
            }
            0
        });
        let result = group.run("k", work).await;
        assert!(result.is_err());
        assert_eq!(group.in_flight(), 0);

        let result = group.run("k", Box::pin(async { 5u32 })).await;
        assert_eq!(result, Ok(5));
    }

    #[tokio::test]
    async fn test_no_dedup_runs_every_call() {
        let flights = NoDedup;
        let executions = Arc::new(AtomicUsize::new(0));

        let delay = Duration::from_millis(20);
        let a = flights.run("k", counted_work(Arc::clone(&executions), delay, 1));
        let b = flights.run("k", counted_work(Arc::clone(&executions), delay, 1));
        let (a, b) = tokio::join!(a, b);

        assert_eq!((a, b), (Ok(1), Ok(1)));
        assert_eq!(executions.load(Ordering::SeqCst), 2);
        assert_eq!(SingleFlight::<u32>::in_flight(&flights), 0);
    }
}

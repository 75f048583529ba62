//! Read-through cache orchestration.
//!
//! The [`Orchestrator`] answers `get` calls from a local tier, then a shared
//! tier, and on a miss from the loader registered for the query's namespace.
//! Concurrent misses on one key share a single load.
//!
//! # Read Path
//!
//! ```text
//! get(query)
//!   │
//!   ├─► local tier ──── Found ─────────────────────────────► deliver
//!   │        │          NegativeFound ─────────────────────► NotFound
//!   │        ▼ miss / error
//!   ├─► shared tier ─── Found ──► backfill local ──────────► deliver
//!   │        │          NegativeFound ──► backfill local ──► NotFound
//!   │        ▼ miss / error (remembered)
//!   └─► single-flight(full_key)
//!            ├─► re-check tiers
//!            ├─► loader.load(query)
//!            ├─► populate shared + local (failures logged)
//!            └─► result fanned out to every waiting caller
//! ```
//!
//! # Result Sharing
//!
//! By default every caller receives the same `Arc<V>`. With
//! [`CacheConfig::isolate_results`] the flight result is encoded once and
//! each caller decodes a private copy, so nothing one caller does to its
//! value can be observed by another.

mod context;

pub use context::CallContext;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::codec::Codec;
use crate::config::CacheConfig;
use crate::error::{CacheError, SharedError};
use crate::expiration::Expiration;
use crate::flight::{FlightGroup, NoDedup, SingleFlight};
use crate::loader::{FnLoader, LoadError, Loader, LoaderRegistry};
use crate::query::Query;
use crate::telemetry::CacheStats;
use crate::tier::{
    BoxFuture, Entry, Lookup, MemoryTier, MemoryTierConfig, NoopTier, Tier, TierError,
};

/// Values the orchestrator can cache.
///
/// Serialization is needed for result isolation and for tiers that store
/// encoded bytes.
pub trait CacheValue: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

/// A value produced by a flight, ready to be handed to callers.
pub struct Delivery<V> {
    value: Arc<V>,
    /// Encoded copy, present when results are isolated.
    encoded: Option<Arc<[u8]>>,
}

impl<V> Clone for Delivery<V> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            encoded: self.encoded.clone(),
        }
    }
}

impl<V> fmt::Debug for Delivery<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("encoded_len", &self.encoded.as_ref().map(|b| b.len()))
            .finish_non_exhaustive()
    }
}

/// Result shared by every caller of one flight.
pub type FlightResult<V> = Result<Delivery<V>, CacheError>;

/// Outcome of checking the tiers for a query.
enum Probe<V> {
    Hit(Arc<V>),
    Negative,
    /// Nothing cached; carries the shared tier's read error, if any.
    Miss(Option<TierError>),
}

struct Inner<V> {
    shared: Arc<dyn Tier<V>>,
    local: Arc<dyn Tier<V>>,
    registry: LoaderRegistry<V>,
    flights: Arc<dyn SingleFlight<FlightResult<V>>>,
    config: CacheConfig,
    stats: CacheStats,
}

/// Read-through cache over a local and a shared tier.
///
/// Cloning is cheap; clones share tiers, loaders, in-flight loads and stats.
pub struct Orchestrator<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for Orchestrator<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> fmt::Debug for Orchestrator<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("shared", &self.inner.shared.name())
            .field("local", &self.inner.local.name())
            .field("loaders", &self.inner.registry)
            .field("config", &self.inner.config)
            .finish()
    }
}

impl<V: CacheValue> Orchestrator<V> {
    /// Orchestrator over `shared` with default settings and no local tier.
    pub fn new<T>(shared: T) -> Self
    where
        T: Tier<V> + 'static,
    {
        OrchestratorBuilder::new(shared).build()
    }

    /// Orchestrator whose shared tier is an in-process moka cache.
    pub fn in_memory(config: MemoryTierConfig) -> Self {
        Self::new(MemoryTier::new(config))
    }

    /// Orchestrator that caches nothing; every `get` loads.
    ///
    /// Single-flight still applies to concurrent calls.
    pub fn uncached() -> Self {
        Self::new(NoopTier)
    }

    /// Start building an orchestrator over `shared`.
    pub fn builder<T>(shared: T) -> OrchestratorBuilder<V>
    where
        T: Tier<V> + 'static,
    {
        OrchestratorBuilder::new(shared)
    }

    /// Register `loader` for the namespace it names, replacing any previous
    /// loader for that namespace.
    pub fn register_loader<L>(&self, loader: L) -> Option<Arc<dyn Loader<V>>>
    where
        L: Loader<V> + 'static,
    {
        self.inner.registry.register(Arc::new(loader))
    }

    /// The loader registry.
    pub fn loaders(&self) -> &LoaderRegistry<V> {
        &self.inner.registry
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> &CacheStats {
        &self.inner.stats
    }

    /// Get the value for `query`, loading it with the namespace's registered
    /// loader on a miss.
    pub async fn get(&self, query: &Query) -> Result<Arc<V>, CacheError> {
        self.inner.get(query, None).await
    }

    /// Get the value for `query`, loading it with `loader` on a miss.
    ///
    /// The loader's name is ignored; the query's namespace decides the key.
    pub async fn get_with_loader(
        &self,
        query: &Query,
        loader: Arc<dyn Loader<V>>,
    ) -> Result<Arc<V>, CacheError> {
        self.inner.get(query, Some(loader)).await
    }

    /// Get the value for `query`, loading it with `load_fn` on a miss.
    pub async fn get_with_fn<F, Fut>(
        &self,
        query: &Query,
        load_fn: F,
    ) -> Result<Arc<V>, CacheError>
    where
        F: Fn(Query) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, LoadError>> + Send + 'static,
    {
        self.get_with_loader(query, Arc::new(FnLoader::anonymous(load_fn)))
            .await
    }

    /// Get the value for `query` into `dest`.
    ///
    /// `dest` is left untouched on error.
    pub async fn get_into(&self, query: &Query, dest: &mut V) -> Result<(), CacheError>
    where
        V: Clone,
    {
        let value = self.get(query).await?;
        *dest = Arc::unwrap_or_clone(value);
        Ok(())
    }

    /// [`get_into`](Self::get_into) bounded by `ctx`.
    ///
    /// `dest` is left untouched when the call is cancelled.
    pub async fn get_into_with_context(
        &self,
        ctx: &CallContext,
        query: &Query,
        dest: &mut V,
    ) -> Result<(), CacheError>
    where
        V: Clone,
    {
        let value = self.get_with_context(ctx, query).await?;
        *dest = Arc::unwrap_or_clone(value);
        Ok(())
    }

    /// [`get`](Self::get) bounded by `ctx`.
    pub async fn get_with_context(
        &self,
        ctx: &CallContext,
        query: &Query,
    ) -> Result<Arc<V>, CacheError> {
        let inner = Arc::clone(&self.inner);
        let query = query.clone();
        self.bounded(ctx, async move { inner.get(&query, None).await })
            .await
    }

    /// [`get_with_fn`](Self::get_with_fn) bounded by `ctx`.
    pub async fn get_with_fn_and_context<F, Fut>(
        &self,
        ctx: &CallContext,
        query: &Query,
        load_fn: F,
    ) -> Result<Arc<V>, CacheError>
    where
        F: Fn(Query) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, LoadError>> + Send + 'static,
    {
        let loader: Arc<dyn Loader<V>> = Arc::new(FnLoader::anonymous(load_fn));
        self.get_with_loader_and_context(ctx, query, loader).await
    }

    /// [`get_with_loader`](Self::get_with_loader) bounded by `ctx`.
    pub async fn get_with_loader_and_context(
        &self,
        ctx: &CallContext,
        query: &Query,
        loader: Arc<dyn Loader<V>>,
    ) -> Result<Arc<V>, CacheError> {
        let inner = Arc::clone(&self.inner);
        let query = query.clone();
        self.bounded(ctx, async move { inner.get(&query, Some(loader)).await })
            .await
    }

    /// Store `value` with the default expiration.
    pub async fn set(&self, query: &Query, value: V) -> Result<(), CacheError> {
        self.set_entry(query, Entry::value(value), None).await
    }

    /// Store `value` with an explicit expiration.
    pub async fn set_with_expiration(
        &self,
        query: &Query,
        value: V,
        expiration: Expiration,
    ) -> Result<(), CacheError> {
        self.set_entry(query, Entry::value(value), Some(expiration))
            .await
    }

    /// Record that the entry for `query` does not exist.
    pub async fn set_absent(&self, query: &Query) -> Result<(), CacheError> {
        self.set_entry(query, Entry::Absent, None).await
    }

    /// Store `entry` for `query`.
    ///
    /// Values go to the shared tier with `expiration` (or the default one),
    /// then to the local tier. Negative markers go to the shared tier only
    /// when negative caching is enabled; the local tier always records them.
    /// A shared tier failure is returned; local failures are logged.
    pub async fn set_entry(
        &self,
        query: &Query,
        entry: Entry<V>,
        expiration: Option<Expiration>,
    ) -> Result<(), CacheError> {
        self.inner.set_entry(query, entry, expiration).await
    }

    /// [`set_entry`](Self::set_entry) bounded by `ctx`.
    pub async fn set_entry_with_context(
        &self,
        ctx: &CallContext,
        query: &Query,
        entry: Entry<V>,
        expiration: Option<Expiration>,
    ) -> Result<(), CacheError> {
        let inner = Arc::clone(&self.inner);
        let query = query.clone();
        self.bounded(ctx, async move {
            inner.set_entry(&query, entry, expiration).await
        })
        .await
    }

    /// Remove the entry for `query` from both tiers.
    pub async fn delete(&self, query: &Query) -> Result<(), CacheError> {
        self.inner.delete(query).await
    }

    /// [`delete`](Self::delete) bounded by `ctx`.
    pub async fn delete_with_context(
        &self,
        ctx: &CallContext,
        query: &Query,
    ) -> Result<(), CacheError> {
        let inner = Arc::clone(&self.inner);
        let query = query.clone();
        self.bounded(ctx, async move { inner.delete(&query).await })
            .await
    }

    /// Remove every entry under `namespace` from both tiers.
    pub async fn delete_namespace(&self, namespace: &str) -> Result<(), CacheError> {
        self.inner.delete_namespace(namespace).await
    }

    /// [`delete_namespace`](Self::delete_namespace) bounded by `ctx`.
    pub async fn delete_namespace_with_context(
        &self,
        ctx: &CallContext,
        namespace: &str,
    ) -> Result<(), CacheError> {
        let inner = Arc::clone(&self.inner);
        let namespace = namespace.to_string();
        self.bounded(ctx, async move { inner.delete_namespace(&namespace).await })
            .await
    }

    async fn bounded<T, F>(&self, ctx: &CallContext, work: F) -> Result<T, CacheError>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, CacheError>> + Send + 'static,
    {
        let result = ctx.run(work).await;
        if let Err(CacheError::Cancelled(reason)) = &result {
            self.inner.stats.cancellation();
            debug!(reason = %reason, "Caller stopped waiting");
        }
        result
    }
}

impl<V: CacheValue> Inner<V> {
    async fn get(
        self: &Arc<Self>,
        query: &Query,
        loader: Option<Arc<dyn Loader<V>>>,
    ) -> Result<Arc<V>, CacheError> {
        self.stats.request();

        let delivery = match self.probe(query, true).await {
            Probe::Hit(value) => Delivery {
                value,
                encoded: None,
            },
            Probe::Negative => return Err(CacheError::not_found(query.full_key())),
            Probe::Miss(shared_error) => self.coordinate(query, loader, shared_error).await?,
        };

        self.deliver(delivery)
    }

    /// Check the local tier, then (if `check_shared`) the shared tier.
    async fn probe(&self, query: &Query, check_shared: bool) -> Probe<V> {
        match self.local.get(query).await {
            Ok(Lookup::Found(value)) => {
                self.stats.local_hit();
                return Probe::Hit(value);
            }
            Ok(Lookup::NegativeFound) => {
                self.stats.negative_hit();
                return Probe::Negative;
            }
            Ok(Lookup::NotFound) => {}
            Err(e) => {
                debug!(
                    key = %query,
                    tier = self.local.name(),
                    error = %e,
                    "Local tier read failed"
                );
            }
        }

        if !check_shared {
            return Probe::Miss(None);
        }

        match self.shared.get(query).await {
            Ok(Lookup::Found(value)) => {
                self.stats.shared_hit();
                self.write_local(query, Entry::Value(Arc::clone(&value)), None)
                    .await;
                Probe::Hit(value)
            }
            Ok(Lookup::NegativeFound) => {
                self.stats.negative_hit();
                self.write_local(query, Entry::Absent, None).await;
                Probe::Negative
            }
            Ok(Lookup::NotFound) => Probe::Miss(None),
            Err(e) => {
                warn!(
                    key = %query,
                    tier = self.shared.name(),
                    error = %e,
                    "Shared tier read failed"
                );
                Probe::Miss(Some(e))
            }
        }
    }

    async fn coordinate(
        self: &Arc<Self>,
        query: &Query,
        loader: Option<Arc<dyn Loader<V>>>,
        shared_error: Option<TierError>,
    ) -> FlightResult<V> {
        let loader = loader
            .or_else(|| self.registry.lookup(query.namespace()))
            .ok_or_else(|| CacheError::LoaderMissing {
                namespace: query.namespace().to_string(),
            })?;

        let inner = Arc::clone(self);
        let flight_query = query.clone();
        let work: BoxFuture<'static, FlightResult<V>> = Box::pin(async move {
            inner.fly(&flight_query, loader, shared_error).await
        });

        self.flights
            .run(query.full_key(), work)
            .await
            .unwrap_or_else(|aborted| Err(aborted.into()))
    }

    /// Body of a flight: re-check the tiers, load, populate.
    async fn fly(
        &self,
        query: &Query,
        loader: Arc<dyn Loader<V>>,
        shared_error: Option<TierError>,
    ) -> FlightResult<V> {
        // A flight that finished just before this one started has already
        // populated the tiers.
        let shared_error = match self.probe(query, shared_error.is_none()).await {
            Probe::Hit(value) => return self.package(value),
            Probe::Negative => return Err(CacheError::not_found(query.full_key())),
            Probe::Miss(error) => error.or(shared_error),
        };

        self.stats.load();
        debug!(key = %query, loader = loader.name(), "Loading");

        match loader.load(query).await {
            Ok(value) => {
                let value = Arc::new(value);
                let expiration = loader
                    .expiration()
                    .unwrap_or(self.config.default_expiration);
                self.populate(query, Entry::Value(Arc::clone(&value)), expiration.sample())
                    .await;
                self.package(value)
            }
            Err(LoadError::NotFound) => {
                self.stats.load_not_found();
                debug!(key = %query, "Loader reported entry not found");
                if self.config.cache_negative {
                    self.populate(query, Entry::Absent, Some(self.config.negative_ttl))
                        .await;
                } else {
                    self.write_local(query, Entry::Absent, None).await;
                }
                Err(CacheError::not_found(query.full_key()))
            }
            Err(LoadError::Failed(source)) => {
                self.stats.load_failure();
                let source: SharedError = Arc::from(source);
                warn!(
                    key = %query,
                    loader = loader.name(),
                    error = %source,
                    "Loader failed"
                );

                if self.config.invalidate_on_load_error {
                    if let Err(e) = self.shared.delete(query).await {
                        warn!(key = %query, error = %e, "Failed to invalidate shared entry");
                    }
                }

                let key = query.full_key().to_string();
                Err(match shared_error {
                    Some(tier_error) => CacheError::SharedTierAndLoader {
                        key,
                        source: tier_error,
                        loader: source,
                    },
                    None => CacheError::Loader { key, source },
                })
            }
        }
    }

    /// Write a loaded entry to both tiers. Failures are logged, not returned.
    async fn populate(&self, query: &Query, entry: Entry<V>, ttl: Option<Duration>) {
        if let Err(e) = self.shared.set(query, entry.clone(), ttl).await {
            self.stats.write_failure();
            warn!(
                key = %query,
                tier = self.shared.name(),
                error = %e,
                "Shared tier write failed"
            );
        }
        self.write_local(query, entry, ttl).await;
    }

    /// Write to the local tier for at most the local TTL.
    async fn write_local(&self, query: &Query, entry: Entry<V>, ttl: Option<Duration>) {
        let ttl = match ttl {
            Some(ttl) => ttl.min(self.config.local_ttl),
            None => self.config.local_ttl,
        };
        if let Err(e) = self.local.set(query, entry, Some(ttl)).await {
            self.stats.write_failure();
            warn!(
                key = %query,
                tier = self.local.name(),
                error = %e,
                "Local tier write failed"
            );
        }
    }

    /// Prepare a flight result for fan-out.
    fn package(&self, value: Arc<V>) -> FlightResult<V> {
        let encoded = if self.config.isolate_results {
            let bytes = self.config.isolation_codec.encode(value.as_ref())?;
            Some(Arc::from(bytes))
        } else {
            None
        };
        Ok(Delivery { value, encoded })
    }

    /// Hand a result to one caller.
    fn deliver(&self, delivery: Delivery<V>) -> Result<Arc<V>, CacheError> {
        if !self.config.isolate_results {
            return Ok(delivery.value);
        }

        let codec = self.config.isolation_codec;
        let bytes = match delivery.encoded {
            Some(bytes) => bytes,
            None => Arc::from(codec.encode(delivery.value.as_ref())?),
        };
        Ok(Arc::new(codec.decode(&bytes)?))
    }

    async fn set_entry(
        &self,
        query: &Query,
        entry: Entry<V>,
        expiration: Option<Expiration>,
    ) -> Result<(), CacheError> {
        let ttl = match (&entry, expiration) {
            (_, Some(expiration)) => expiration.sample(),
            (Entry::Value(_), None) => self.config.default_expiration.sample(),
            (Entry::Absent, None) => Some(self.config.negative_ttl),
        };

        if entry.is_absent() && !self.config.cache_negative {
            self.write_local(query, entry, ttl).await;
            return Ok(());
        }

        self.shared
            .set(query, entry.clone(), ttl)
            .await
            .map_err(|source| CacheError::Store {
                key: query.full_key().to_string(),
                source,
            })?;
        self.write_local(query, entry, ttl).await;
        Ok(())
    }

    async fn delete(&self, query: &Query) -> Result<(), CacheError> {
        let shared = self.shared.delete(query).await;
        if let Err(e) = self.local.delete(query).await {
            warn!(
                key = %query,
                tier = self.local.name(),
                error = %e,
                "Local tier delete failed"
            );
        }
        shared.map_err(|source| CacheError::Store {
            key: query.full_key().to_string(),
            source,
        })
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<(), CacheError> {
        let shared = self.shared.delete_namespace(namespace).await;
        if let Err(e) = self.local.delete_namespace(namespace).await {
            warn!(
                namespace = %namespace,
                tier = self.local.name(),
                error = %e,
                "Local tier namespace delete failed"
            );
        }
        debug!(namespace = %namespace, ok = shared.is_ok(), "Namespace deleted");
        shared.map_err(|source| CacheError::Store {
            key: namespace.to_string(),
            source,
        })
    }
}

/// Builder for [`Orchestrator`].
///
/// ```ignore
/// let cache = Orchestrator::builder(EncodedTier::new(store, JsonCodec))
///     .local_memory(MemoryTierConfig::default())
///     .config(CacheConfig::default().with_local_ttl(Duration::from_millis(500)))
///     .loader(FnLoader::new("user", load_user))
///     .build();
/// ```
pub struct OrchestratorBuilder<V> {
    shared: Arc<dyn Tier<V>>,
    local: Option<Arc<dyn Tier<V>>>,
    config: CacheConfig,
    flights: Option<Arc<dyn SingleFlight<FlightResult<V>>>>,
    loaders: Vec<Arc<dyn Loader<V>>>,
}

impl<V: CacheValue> OrchestratorBuilder<V> {
    pub fn new<T>(shared: T) -> Self
    where
        T: Tier<V> + 'static,
    {
        Self {
            shared: Arc::new(shared),
            local: None,
            config: CacheConfig::default(),
            flights: None,
            loaders: Vec::new(),
        }
    }

    /// Use `tier` as the local tier (default: [`NoopTier`]).
    pub fn local_tier<T>(mut self, tier: T) -> Self
    where
        T: Tier<V> + 'static,
    {
        self.local = Some(Arc::new(tier));
        self
    }

    /// Use an in-process moka cache as the local tier.
    pub fn local_memory(self, config: MemoryTierConfig) -> Self {
        self.local_tier(MemoryTier::new(config))
    }

    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a custom single-flight coordinator.
    pub fn single_flight<S>(mut self, flights: S) -> Self
    where
        S: SingleFlight<FlightResult<V>> + 'static,
    {
        self.flights = Some(Arc::new(flights));
        self
    }

    /// Let every miss run its own load.
    pub fn without_dedup(self) -> Self {
        self.single_flight(NoDedup)
    }

    /// Register a loader at construction.
    pub fn loader<L>(mut self, loader: L) -> Self
    where
        L: Loader<V> + 'static,
    {
        self.loaders.push(Arc::new(loader));
        self
    }

    pub fn build(self) -> Orchestrator<V> {
        let registry = LoaderRegistry::new();
        for loader in self.loaders {
            registry.register(loader);
        }

        let local = self.local.unwrap_or_else(|| Arc::new(NoopTier));
        let flights = self
            .flights
            .unwrap_or_else(|| Arc::new(FlightGroup::<FlightResult<V>>::new()));

        debug!(
            shared = self.shared.name(),
            local = local.name(),
            negative_caching = self.config.cache_negative,
            isolate_results = self.config.isolate_results,
            "Orchestrator built"
        );

        Orchestrator {
            inner: Arc::new(Inner {
                shared: self.shared,
                local,
                registry,
                flights,
                config: self.config,
                stats: CacheStats::new(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_loader(counter: Arc<AtomicUsize>) -> impl Loader<String> {
        FnLoader::new("user", move |query: Query| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                match query.params()[0].as_str() {
                    "missing" => Err(LoadError::NotFound),
                    "broken" => Err(LoadError::failed("backend down")),
                    id => Ok(format!("user-{id}")),
                }
            }
        })
    }

    fn cache(counter: Arc<AtomicUsize>) -> Orchestrator<String> {
        Orchestrator::builder(MemoryTier::default())
            .local_memory(MemoryTierConfig::default())
            .loader(counting_loader(counter))
            .build()
    }

    #[tokio::test]
    async fn test_get_loads_once_then_hits() {
        let loads = Arc::new(AtomicUsize::new(0));
        let cache = cache(Arc::clone(&loads));
        let query = Query::new("user", ["42"]);

        assert_eq!(cache.get(&query).await.unwrap().as_str(), "user-42");
        assert_eq!(cache.get(&query).await.unwrap().as_str(), "user-42");
        assert_eq!(loads.load(Ordering::SeqCst), 1);

        let stats = cache.stats().snapshot();
        assert_eq!(stats.requests, 2);
        assert_eq!(stats.local_hits, 1);
        assert_eq!(stats.loads, 1);
    }

    #[tokio::test]
    async fn test_shared_hit_backfills_local() {
        let loads = Arc::new(AtomicUsize::new(0));
        let shared = Arc::new(MemoryTier::<String>::default());
        let local = Arc::new(MemoryTier::<String>::default());
        let cache = Orchestrator::<String>::builder(Arc::clone(&shared))
            .local_tier(Arc::clone(&local))
            .loader(counting_loader(Arc::clone(&loads)))
            .build();
        let query = Query::new("user", ["7"]);

        shared
            .set(&query, Entry::value("cached".to_string()), None)
            .await
            .unwrap();

        assert_eq!(cache.get(&query).await.unwrap().as_str(), "cached");
        assert!(local.get(&query).await.unwrap().is_found());
        assert_eq!(loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_not_found_is_cached() {
        let loads = Arc::new(AtomicUsize::new(0));
        let cache = cache(Arc::clone(&loads));
        let query = Query::new("user", ["missing"]);

        assert!(cache.get(&query).await.unwrap_err().is_not_found());
        assert!(cache.get(&query).await.unwrap_err().is_not_found());
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_loader_failure_is_not_cached() {
        let loads = Arc::new(AtomicUsize::new(0));
        let cache = cache(Arc::clone(&loads));
        let query = Query::new("user", ["broken"]);

        let err = cache.get(&query).await.unwrap_err();
        assert!(matches!(err, CacheError::Loader { .. }));
        let err = cache.get(&query).await.unwrap_err();
        assert!(matches!(err, CacheError::Loader { .. }));
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_loader_missing() {
        let cache = Orchestrator::<String>::in_memory(MemoryTierConfig::default());
        let err = cache.get(&Query::new("order", ["1"])).await.unwrap_err();
        assert!(
            matches!(err, CacheError::LoaderMissing { ref namespace } if namespace == "order")
        );
    }

    #[tokio::test]
    async fn test_get_with_fn_uses_payload() {
        let cache = Orchestrator::<String>::uncached();
        let query = Query::new("greeting", ["en"]).with_payload("hello".to_string());

        let value = cache
            .get_with_fn(&query, |query: Query| async move {
                Ok::<_, LoadError>(query.payload::<String>().cloned().unwrap_or_default())
            })
            .await
            .unwrap();
        assert_eq!(value.as_str(), "hello");
    }

    #[tokio::test]
    async fn test_get_into() {
        let loads = Arc::new(AtomicUsize::new(0));
        let cache = cache(loads);
        let mut dest = String::from("untouched");

        cache
            .get_into(&Query::new("user", ["9"]), &mut dest)
            .await
            .unwrap();
        assert_eq!(dest, "user-9");

        let err = cache
            .get_into(&Query::new("user", ["missing"]), &mut dest)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(dest, "user-9");
    }

    #[tokio::test]
    async fn test_set_then_get_skips_loader() {
        let loads = Arc::new(AtomicUsize::new(0));
        let cache = cache(Arc::clone(&loads));
        let query = Query::new("user", ["1"]);

        cache.set(&query, "written".to_string()).await.unwrap();
        assert_eq!(cache.get(&query).await.unwrap().as_str(), "written");

        cache.set_absent(&query).await.unwrap();
        assert!(cache.get(&query).await.unwrap_err().is_not_found());
        assert_eq!(loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_delete_forces_reload() {
        let loads = Arc::new(AtomicUsize::new(0));
        let cache = cache(Arc::clone(&loads));
        let query = Query::new("user", ["3"]);

        cache.get(&query).await.unwrap();
        cache.delete(&query).await.unwrap();
        cache.get(&query).await.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_isolated_results_are_private_copies() {
        let cache = Orchestrator::<Vec<u32>>::builder(MemoryTier::default())
            .config(CacheConfig::default().with_isolation(crate::codec::CodecKind::Json))
            .build();
        let query = Query::new("list", ["1"]);
        cache.set(&query, vec![1, 2, 3]).await.unwrap();

        let a = cache.get(&query).await.unwrap();
        let b = cache.get(&query).await.unwrap();
        assert_eq!(a, b);
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_debug_names_tiers() {
        let cache = Orchestrator::<String>::uncached();
        let text = format!("{cache:?}");
        assert!(text.contains("noop"));
    }
}

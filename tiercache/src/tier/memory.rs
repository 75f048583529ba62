//! In-process tier using moka.
//!
//! This tier wraps `moka::future::Cache` to provide an async-safe,
//! lock-free in-memory cache. Unlike a cache with one global TTL, every
//! entry carries its own expiry so the orchestrator can give values, negative
//! markers and backfilled copies different lifetimes.
//!
//! # Namespace Deletion
//!
//! Keys are `(namespace, path)` pairs. Deleting a namespace registers a moka
//! invalidation predicate; matching entries stop being visible immediately
//! and are reclaimed by moka's maintenance tasks.

use std::time::{Duration, Instant};

use moka::future::Cache as MokaCache;
use moka::Expiry;

use super::{BoxFuture, Entry, Lookup, Tier, TierError};
use crate::query::Query;

/// Default maximum number of entries held by a [`MemoryTier`].
pub const DEFAULT_MAX_ENTRIES: u64 = 100_000;

/// Configuration for [`MemoryTier`].
#[derive(Debug, Clone)]
pub struct MemoryTierConfig {
    /// Maximum number of entries before moka starts evicting.
    pub max_entries: u64,
}

impl Default for MemoryTierConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

impl MemoryTierConfig {
    /// Set the maximum number of entries.
    pub fn with_max_entries(mut self, max_entries: u64) -> Self {
        self.max_entries = max_entries;
        self
    }
}

type SlotKey = (String, String);

/// A stored entry together with the TTL it was written with.
struct Slot<V> {
    entry: Entry<V>,
    ttl: Option<Duration>,
}

impl<V> Clone for Slot<V> {
    fn clone(&self) -> Self {
        Self {
            entry: self.entry.clone(),
            ttl: self.ttl,
        }
    }
}

/// Per-entry expiry: every write restarts the clock with the slot's TTL.
struct SlotExpiry;

impl<V> Expiry<SlotKey, Slot<V>> for SlotExpiry {
    fn expire_after_create(
        &self,
        _key: &SlotKey,
        value: &Slot<V>,
        _created_at: Instant,
    ) -> Option<Duration> {
        value.ttl
    }

    fn expire_after_update(
        &self,
        _key: &SlotKey,
        value: &Slot<V>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.ttl
    }
}

/// In-memory tier backed by moka.
pub struct MemoryTier<V> {
    cache: MokaCache<SlotKey, Slot<V>>,
}

impl<V> MemoryTier<V>
where
    V: Send + Sync + 'static,
{
    /// Create a new memory tier.
    pub fn new(config: MemoryTierConfig) -> Self {
        let cache = MokaCache::builder()
            .max_capacity(config.max_entries)
            .expire_after(SlotExpiry)
            .support_invalidation_closures()
            .build();

        Self { cache }
    }

    /// Number of entries (eventually consistent, see moka docs).
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Run moka's pending maintenance work (expiry, eviction, invalidation).
    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }

    fn slot_key(query: &Query) -> SlotKey {
        (query.namespace().to_owned(), query.path().to_owned())
    }
}

impl<V> Default for MemoryTier<V>
where
    V: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(MemoryTierConfig::default())
    }
}

impl<V> Tier<V> for MemoryTier<V>
where
    V: Send + Sync + 'static,
{
    fn name(&self) -> &str {
        "memory"
    }

    fn get<'a>(&'a self, query: &'a Query) -> BoxFuture<'a, Result<Lookup<V>, TierError>> {
        let key = Self::slot_key(query);
        Box::pin(async move {
            Ok(match self.cache.get(&key).await {
                Some(slot) => slot.entry.into(),
                None => Lookup::NotFound,
            })
        })
    }

    fn set<'a>(
        &'a self,
        query: &'a Query,
        entry: Entry<V>,
        ttl: Option<Duration>,
    ) -> BoxFuture<'a, Result<(), TierError>> {
        let key = Self::slot_key(query);
        let ttl = ttl.filter(|ttl| !ttl.is_zero());
        Box::pin(async move {
            self.cache.insert(key, Slot { entry, ttl }).await;
            Ok(())
        })
    }

    fn delete<'a>(&'a self, query: &'a Query) -> BoxFuture<'a, Result<(), TierError>> {
        let key = Self::slot_key(query);
        Box::pin(async move {
            self.cache.invalidate(&key).await;
            Ok(())
        })
    }

    fn delete_namespace<'a>(&'a self, namespace: &'a str) -> BoxFuture<'a, Result<(), TierError>> {
        let namespace = namespace.to_owned();
        Box::pin(async move {
            self.cache
                .invalidate_entries_if(move |key, _| key.0 == namespace)
                .map(|_| ())
                .map_err(|e| TierError::Backend(e.to_string()))
        })
    }
}

//! Storage tiers.
//!
//! A tier is one layer of the cache hierarchy. The orchestrator wires two of
//! them: a *local* tier (process-private, short TTL) and a *shared* tier
//! (authoritative, longer TTL). Every tier speaks the same [`Tier`] contract
//! so any implementation can sit in either position.
//!
//! # Read Outcomes
//!
//! Reads return an explicit [`Lookup`]:
//!
//! - `Found(value)` - the tier holds a value
//! - `NegativeFound` - the tier holds a negative marker: the entry is known
//!   not to exist
//! - `NotFound` - the tier knows nothing about the key
//!
//! A miss is never an error. Errors are reserved for tier failures.
//!
//! # Available Tiers
//!
//! - [`MemoryTier`]: in-process moka cache with per-entry TTL
//! - [`NoopTier`]: stores nothing
//! - [`EncodedTier`]: typed values on top of a [`ByteStore`] through a codec
//! - [`BreakerTier`]: circuit breaker around another tier
//!
//! # Thread Safety
//!
//! Implementations must be `Send + Sync` and safe to call concurrently
//! without external locking.

mod breaker;
mod byte_store;
mod encoded;
mod memory;
mod noop;

pub use breaker::{BreakerConfig, BreakerTier, CircuitState};
pub use byte_store::{ByteStore, ByteStoreError, MemoryByteStore};
pub use encoded::EncodedTier;
pub use memory::{MemoryTier, MemoryTierConfig};
pub use noop::NoopTier;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::codec::CodecError;
use crate::query::Query;

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result of reading a key from a tier.
pub enum Lookup<V> {
    /// The tier holds a value.
    Found(Arc<V>),
    /// The tier holds a negative marker.
    NegativeFound,
    /// The tier has no entry for the key.
    NotFound,
}

impl<V> Lookup<V> {
    /// Whether this lookup produced a value.
    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }

    /// The value, if one was found.
    pub fn into_value(self) -> Option<Arc<V>> {
        match self {
            Lookup::Found(value) => Some(value),
            _ => None,
        }
    }
}

impl<V> Clone for Lookup<V> {
    fn clone(&self) -> Self {
        match self {
            Lookup::Found(value) => Lookup::Found(Arc::clone(value)),
            Lookup::NegativeFound => Lookup::NegativeFound,
            Lookup::NotFound => Lookup::NotFound,
        }
    }
}

impl<V: fmt::Debug> fmt::Debug for Lookup<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lookup::Found(value) => f.debug_tuple("Found").field(value).finish(),
            Lookup::NegativeFound => f.write_str("NegativeFound"),
            Lookup::NotFound => f.write_str("NotFound"),
        }
    }
}

/// What gets written to a tier.
pub enum Entry<V> {
    /// A real value.
    Value(Arc<V>),
    /// The negative marker: the entry is known not to exist.
    Absent,
}

impl<V> Entry<V> {
    /// Wrap an owned value.
    pub fn value(value: V) -> Self {
        Entry::Value(Arc::new(value))
    }

    /// Whether this is the negative marker.
    pub fn is_absent(&self) -> bool {
        matches!(self, Entry::Absent)
    }
}

impl<V> Clone for Entry<V> {
    fn clone(&self) -> Self {
        match self {
            Entry::Value(value) => Entry::Value(Arc::clone(value)),
            Entry::Absent => Entry::Absent,
        }
    }
}

impl<V: fmt::Debug> fmt::Debug for Entry<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entry::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Entry::Absent => f.write_str("Absent"),
        }
    }
}

impl<V> From<Entry<V>> for Lookup<V> {
    fn from(entry: Entry<V>) -> Self {
        match entry {
            Entry::Value(value) => Lookup::Found(value),
            Entry::Absent => Lookup::NegativeFound,
        }
    }
}

/// Errors that can occur during tier operations.
#[derive(Debug, Clone, Error)]
pub enum TierError {
    /// The tier does not implement this operation.
    #[error("{operation} is not supported by the {tier} tier")]
    Unsupported {
        tier: &'static str,
        operation: &'static str,
    },

    /// Encoding or decoding a stored value failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Stored bytes did not match the expected framing.
    #[error("corrupt entry under key {key}")]
    Corrupt { key: String },

    /// A circuit breaker is rejecting calls.
    #[error("circuit breaker for {tier} tier is open")]
    CircuitOpen { tier: String },

    /// The backing store failed.
    #[error("backend error: {0}")]
    Backend(String),
}

impl From<ByteStoreError> for TierError {
    fn from(e: ByteStoreError) -> Self {
        match e {
            ByteStoreError::Unsupported { operation } => TierError::Unsupported {
                tier: "byte store",
                operation,
            },
            other => TierError::Backend(other.to_string()),
        }
    }
}

/// One layer of the cache hierarchy.
///
/// # TTLs
///
/// `ttl` is `None` for entries that never expire.
///
/// # Dyn Compatibility
///
/// Methods return [`BoxFuture`] so tiers can be used as `Arc<dyn Tier<V>>`.
pub trait Tier<V>: Send + Sync {
    /// Short name for logs and errors.
    fn name(&self) -> &str;

    /// Read the entry for `query`.
    fn get<'a>(&'a self, query: &'a Query) -> BoxFuture<'a, Result<Lookup<V>, TierError>>;

    /// Write an entry, replacing any existing one.
    fn set<'a>(
        &'a self,
        query: &'a Query,
        entry: Entry<V>,
        ttl: Option<Duration>,
    ) -> BoxFuture<'a, Result<(), TierError>>;

    /// Remove the entry for `query`. Removing a missing key succeeds.
    fn delete<'a>(&'a self, query: &'a Query) -> BoxFuture<'a, Result<(), TierError>>;

    /// Remove every entry in `namespace`.
    ///
    /// Tiers that cannot do this must return [`TierError::Unsupported`].
    fn delete_namespace<'a>(&'a self, namespace: &'a str) -> BoxFuture<'a, Result<(), TierError>>;
}

impl<V, T> Tier<V> for Arc<T>
where
    T: Tier<V> + ?Sized,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    fn get<'a>(&'a self, query: &'a Query) -> BoxFuture<'a, Result<Lookup<V>, TierError>> {
        (**self).get(query)
    }

    fn set<'a>(
        &'a self,
        query: &'a Query,
        entry: Entry<V>,
        ttl: Option<Duration>,
    ) -> BoxFuture<'a, Result<(), TierError>> {
        (**self).set(query, entry, ttl)
    }

    fn delete<'a>(&'a self, query: &'a Query) -> BoxFuture<'a, Result<(), TierError>> {
        (**self).delete(query)
    }

    fn delete_namespace<'a>(&'a self, namespace: &'a str) -> BoxFuture<'a, Result<(), TierError>> {
        (**self).delete_namespace(namespace)
    }
}

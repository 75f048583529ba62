//! Loaders: the source of truth behind the cache.
//!
//! A [`Loader`] produces the value for a query on a cache miss. Loaders are
//! registered per namespace in a [`LoaderRegistry`], or passed ad hoc to
//! [`Orchestrator::get_with_loader`](crate::Orchestrator::get_with_loader).
//!
//! A loader reports "this entry does not exist" with [`LoadError::NotFound`].
//! That outcome is authoritative: it is cached as a negative marker and is
//! not treated as a failure.

mod registry;

pub use registry::LoaderRegistry;

use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use crate::expiration::Expiration;
use crate::query::Query;
use crate::tier::BoxFuture;

/// Boxed error type carried by failed loads.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Outcome of a load that produced no value.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The entry does not exist at the source.
    #[error("entry not found")]
    NotFound,

    /// The source failed.
    #[error("load failed: {0}")]
    Failed(#[source] BoxError),
}

impl LoadError {
    /// Wrap any error as a load failure.
    pub fn failed<E>(error: E) -> Self
    where
        E: Into<BoxError>,
    {
        LoadError::Failed(error.into())
    }

    /// Whether this is the authoritative not-found outcome.
    pub fn is_not_found(&self) -> bool {
        matches!(self, LoadError::NotFound)
    }
}

/// Produces values for one namespace.
///
/// The name doubles as the namespace the loader serves when registered.
pub trait Loader<V>: Send + Sync {
    /// Namespace served by this loader.
    fn name(&self) -> &str;

    /// Load the value for `query`.
    fn load<'a>(&'a self, query: &'a Query) -> BoxFuture<'a, Result<V, LoadError>>;

    /// Expiration for values this loader produces.
    ///
    /// `None` falls back to the orchestrator's default expiration.
    fn expiration(&self) -> Option<Expiration> {
        None
    }
}

/// Loader built from an async closure.
///
/// ```ignore
/// let loader = FnLoader::new("user", |query: Query| async move {
///     db.fetch_user(&query.params()[0]).await.map_err(LoadError::failed)
/// })
/// .with_ttl(Duration::from_secs(60));
/// ```
pub struct FnLoader<F> {
    name: String,
    load_fn: F,
    expiration: Option<Expiration>,
}

impl<F> FnLoader<F> {
    /// Create a loader for `name` that runs `load_fn`.
    pub fn new(name: impl Into<String>, load_fn: F) -> Self {
        Self {
            name: name.into(),
            load_fn,
            expiration: None,
        }
    }

    /// Create a loader without a namespace, for ad-hoc use.
    pub fn anonymous(load_fn: F) -> Self {
        Self::new("", load_fn)
    }

    /// Set the expiration policy for loaded values.
    pub fn with_expiration(mut self, expiration: Expiration) -> Self {
        self.expiration = Some(expiration);
        self
    }

    /// Expire loaded values after a fixed TTL.
    pub fn with_ttl(self, ttl: Duration) -> Self {
        self.with_expiration(Expiration::after(ttl))
    }

    /// Expire loaded values after a TTL drawn from `[min, max)`.
    pub fn with_jitter(self, min: Duration, max: Duration) -> Self {
        self.with_expiration(Expiration::jitter(min, max))
    }
}

impl<F> fmt::Debug for FnLoader<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnLoader")
            .field("name", &self.name)
            .field("expiration", &self.expiration)
            .finish_non_exhaustive()
    }
}

impl<V, F, Fut> Loader<V> for FnLoader<F>
where
    F: Fn(Query) -> Fut + Send + Sync,
    Fut: Future<Output = Result<V, LoadError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn load<'a>(&'a self, query: &'a Query) -> BoxFuture<'a, Result<V, LoadError>> {
        Box::pin((self.load_fn)(query.clone()))
    }

    fn expiration(&self) -> Option<Expiration> {
        self.expiration
    }
}

//! A tier that stores nothing.
//!
//! Used as the default local tier and as the shared tier when caching
//! should be switched off without touching call sites: every read misses,
//! so every `get` goes to the loader.

use std::time::Duration;

use super::{BoxFuture, Entry, Lookup, Tier, TierError};
use crate::query::Query;

/// Tier that discards writes and misses every read.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTier;

impl NoopTier {
    pub fn new() -> Self {
        NoopTier
    }
}

impl<V> Tier<V> for NoopTier
where
    V: Send + Sync + 'static,
{
    fn name(&self) -> &str {
        "noop"
    }

    fn get<'a>(&'a self, _query: &'a Query) -> BoxFuture<'a, Result<Lookup<V>, TierError>> {
        Box::pin(async { Ok(Lookup::NotFound) })
    }

    fn set<'a>(
        &'a self,
        _query: &'a Query,
        _entry: Entry<V>,
        _ttl: Option<Duration>,
    ) -> BoxFuture<'a, Result<(), TierError>> {
        Box::pin(async { Ok(()) })
    }

    fn delete<'a>(&'a self, _query: &'a Query) -> BoxFuture<'a, Result<(), TierError>> {
        Box::pin(async { Ok(()) })
    }

    fn delete_namespace<'a>(&'a self, _namespace: &'a str) -> BoxFuture<'a, Result<(), TierError>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_tier_never_holds_anything() {
        let tier = NoopTier::new();
        let query = Query::new("user", ["1"]);

        <NoopTier as Tier<u32>>::set(&tier, &query, Entry::value(1), None)
            .await
            .unwrap();
        <NoopTier as Tier<u32>>::set(&tier, &query, Entry::Absent, None)
            .await
            .unwrap();

        let lookup: Lookup<u32> = tier.get(&query).await.unwrap();
        assert!(matches!(lookup, Lookup::NotFound));
        <NoopTier as Tier<u32>>::delete_namespace(&tier, "user").await.unwrap();
    }
}

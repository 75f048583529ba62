//! Typed tier on top of a byte store.
//!
//! This decorator wraps a generic [`ByteStore`] with:
//! - Key translation: `Query` → `"{namespace}:{sha256(path)}"` (namespace
//!   escaped as in [`Query::namespace_prefix`])
//! - Value framing: a tag byte followed by the codec payload
//!
//! # Framing
//!
//! ```text
//! [0x00]            negative marker (entry known not to exist)
//! [0x01][payload]   value encoded with the tier's codec
//! ```
//!
//! The tag makes the negative marker distinct from every real value,
//! including values whose encoding is empty.
//!
//! # Key Format
//!
//! With path hashing (the default) keys are `namespace:` followed by the
//! hex SHA-256 of the query path, which keeps keys short and free of
//! separator characters. Without hashing the raw path is used.
//!
//! Every key of a namespace starts with the same prefix, so
//! [`delete_namespace`](Tier::delete_namespace) becomes a
//! [`ByteStore::delete_prefix`]. Stores that cannot delete by prefix make
//! it return [`TierError::Unsupported`].

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::{BoxFuture, ByteStore, ByteStoreError, Entry, Lookup, Tier, TierError};
use crate::codec::Codec;
use crate::query::Query;

const NEGATIVE_TAG: u8 = 0x00;
const VALUE_TAG: u8 = 0x01;

/// Tier that stores encoded values in a [`ByteStore`].
pub struct EncodedTier<C> {
    store: Arc<dyn ByteStore>,
    codec: C,
    hash_paths: bool,
    name: String,
}

impl<C: Codec> EncodedTier<C> {
    /// Create an encoded tier over `store` using `codec`.
    pub fn new(store: Arc<dyn ByteStore>, codec: C) -> Self {
        let name = format!("encoded/{}", codec.name());
        Self {
            store,
            codec,
            hash_paths: true,
            name,
        }
    }

    /// Use the raw query path in keys instead of its hash.
    pub fn with_raw_paths(mut self) -> Self {
        self.hash_paths = false;
        self
    }

    /// The underlying byte store.
    pub fn store(&self) -> &Arc<dyn ByteStore> {
        &self.store
    }

    /// The byte-store key for a query.
    pub fn key_for(&self, query: &Query) -> String {
        if self.hash_paths {
            format!(
                "{}{:x}",
                Query::namespace_prefix(query.namespace()),
                Sha256::digest(query.path().as_bytes())
            )
        } else {
            query.full_key().to_string()
        }
    }

    fn encode_entry<V: Serialize>(&self, entry: &Entry<V>) -> Result<Vec<u8>, TierError> {
        match entry {
            Entry::Absent => Ok(vec![NEGATIVE_TAG]),
            Entry::Value(value) => {
                let payload = self.codec.encode(value.as_ref())?;
                let mut frame = Vec::with_capacity(payload.len() + 1);
                frame.push(VALUE_TAG);
                frame.extend_from_slice(&payload);
                Ok(frame)
            }
        }
    }

    fn decode_frame<V: DeserializeOwned>(
        &self,
        key: &str,
        frame: &[u8],
    ) -> Result<Lookup<V>, TierError> {
        match frame.split_first() {
            Some((&NEGATIVE_TAG, [])) => Ok(Lookup::NegativeFound),
            Some((&VALUE_TAG, payload)) => Ok(Lookup::Found(Arc::new(self.codec.decode(payload)?))),
            _ => Err(TierError::Corrupt {
                key: key.to_string(),
            }),
        }
    }
}

impl<V, C> Tier<V> for EncodedTier<C>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
    C: Codec,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn get<'a>(&'a self, query: &'a Query) -> BoxFuture<'a, Result<Lookup<V>, TierError>> {
        Box::pin(async move {
            let key = self.key_for(query);
            match self.store.get(&key).await? {
                Some(frame) => self.decode_frame(&key, &frame),
                None => Ok(Lookup::NotFound),
            }
        })
    }

    fn set<'a>(
        &'a self,
        query: &'a Query,
        entry: Entry<V>,
        ttl: Option<Duration>,
    ) -> BoxFuture<'a, Result<(), TierError>> {
        Box::pin(async move {
            let key = self.key_for(query);
            let frame = self.encode_entry(&entry)?;
            debug!(
                key = %key,
                bytes = frame.len(),
                negative = entry.is_absent(),
                "Encoded tier write"
            );
            self.store.set(&key, frame, ttl).await?;
            Ok(())
        })
    }

    fn delete<'a>(&'a self, query: &'a Query) -> BoxFuture<'a, Result<(), TierError>> {
        Box::pin(async move {
            self.store.delete(&self.key_for(query)).await?;
            Ok(())
        })
    }

    fn delete_namespace<'a>(&'a self, namespace: &'a str) -> BoxFuture<'a, Result<(), TierError>> {
        Box::pin(async move {
            let prefix = Query::namespace_prefix(namespace);
            self.store
                .delete_prefix(&prefix)
                .await
                .map_err(|e| match e {
                    ByteStoreError::Unsupported { .. } => TierError::Unsupported {
                        tier: "encoded",
                        operation: "delete_namespace",
                    },
                    other => other.into(),
                })?;
            debug!(prefix = %prefix, "Encoded tier namespace delete");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{BincodeCodec, JsonCodec};
    use crate::tier::MemoryByteStore;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct User {
        id: u64,
        name: String,
    }

    fn json_tier() -> (Arc<MemoryByteStore>, EncodedTier<JsonCodec>) {
        let store = Arc::new(MemoryByteStore::new(1_000_000));
        let tier = EncodedTier::new(store.clone(), JsonCodec);
        (store, tier)
    }

    #[tokio::test]
    async fn test_encoded_tier_round_trips_values() {
        let (_store, tier) = json_tier();
        let query = Query::new("user", ["42"]);
        let user = User {
            id: 42,
            name: "Alice".to_string(),
        };

        tier.set(&query, Entry::value(user.clone()), None)
            .await
            .unwrap();

        let lookup: Lookup<User> = tier.get(&query).await.unwrap();
        assert_eq!(lookup.into_value().as_deref(), Some(&user));
    }

    #[tokio::test]
    async fn test_encoded_tier_negative_marker_vs_empty_bytes() {
        let store = Arc::new(MemoryByteStore::new(1_000_000));
        let tier = EncodedTier::new(store, BincodeCodec);
        let empty = Query::new("blob", ["empty"]);
        let absent = Query::new("blob", ["absent"]);

        tier.set(&empty, Entry::value(Vec::<u8>::new()), None)
            .await
            .unwrap();
        <EncodedTier<BincodeCodec> as Tier<Vec<u8>>>::set(&tier, &absent, Entry::Absent, None)
            .await
            .unwrap();

        let lookup: Lookup<Vec<u8>> = tier.get(&empty).await.unwrap();
        assert_eq!(lookup.into_value().as_deref(), Some(&Vec::new()));

        let lookup: Lookup<Vec<u8>> = tier.get(&absent).await.unwrap();
        assert!(matches!(lookup, Lookup::NegativeFound));
    }

    #[tokio::test]
    async fn test_encoded_tier_hashes_paths() {
        let (store, tier) = json_tier();
        let query = Query::new("user", ["a&b", "c"]);

        let key = tier.key_for(&query);
        assert!(key.starts_with("user:"));
        assert_eq!(key.len(), "user:".len() + 64);

        tier.set(&query, Entry::value(1u32), None).await.unwrap();
        assert!(store.contains(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_encoded_tier_raw_paths() {
        let store = Arc::new(MemoryByteStore::new(1_000_000));
        let tier = EncodedTier::new(store, JsonCodec).with_raw_paths();
        assert_eq!(tier.key_for(&Query::new("user", ["42"])), "user:?42");
    }

    #[tokio::test]
    async fn test_encoded_tier_corrupt_frame() {
        let (store, tier) = json_tier();
        let query = Query::new("user", ["bad"]);
        store
            .set(&tier.key_for(&query), vec![0x7f, 1, 2], None)
            .await
            .unwrap();

        let err = <EncodedTier<JsonCodec> as Tier<User>>::get(&tier, &query)
            .await
            .unwrap_err();
        assert!(matches!(err, TierError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn test_encoded_tier_decode_failure_is_codec_error() {
        let (_store, tier) = json_tier();
        let query = Query::new("user", ["1"]);
        tier.set(&query, Entry::value("not a user".to_string()), None)
            .await
            .unwrap();

        let err = <EncodedTier<JsonCodec> as Tier<User>>::get(&tier, &query)
            .await
            .unwrap_err();
        assert!(matches!(err, TierError::Codec(_)));
    }

    #[tokio::test]
    async fn test_encoded_tier_delete() {
        let (_store, tier) = json_tier();
        let query = Query::new("user", ["1"]);

        tier.set(&query, Entry::value(1u32), None).await.unwrap();
        <EncodedTier<JsonCodec> as Tier<u32>>::delete(&tier, &query)
            .await
            .unwrap();

        let lookup: Lookup<u32> = tier.get(&query).await.unwrap();
        assert!(matches!(lookup, Lookup::NotFound));
    }

    #[tokio::test]
    async fn test_encoded_tier_namespace_delete() {
        for raw in [false, true] {
            let store = Arc::new(MemoryByteStore::new(1_000_000));
            let mut tier = EncodedTier::new(store, JsonCodec);
            if raw {
                tier = tier.with_raw_paths();
            }
            let users = [Query::new("user", ["1"]), Query::new("user", ["2"])];
            let other = Query::new("user:?1", ["x"]);

            for query in users.iter().chain([&other]) {
                tier.set(query, Entry::value(1u32), None).await.unwrap();
            }

            <EncodedTier<JsonCodec> as Tier<u32>>::delete_namespace(&tier, "user")
                .await
                .unwrap();

            for query in &users {
                let lookup: Lookup<u32> = tier.get(query).await.unwrap();
                assert!(matches!(lookup, Lookup::NotFound));
            }
            let lookup: Lookup<u32> = tier.get(&other).await.unwrap();
            assert!(lookup.is_found());
        }
    }

    /// Byte store that keeps the default `delete_prefix`.
    struct PlainStore(MemoryByteStore);

    impl ByteStore for PlainStore {
        fn set(
            &self,
            key: &str,
            value: Vec<u8>,
            ttl: Option<Duration>,
        ) -> BoxFuture<'_, Result<(), ByteStoreError>> {
            self.0.set(key, value, ttl)
        }

        fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<Vec<u8>>, ByteStoreError>> {
            self.0.get(key)
        }

        fn delete(&self, key: &str) -> BoxFuture<'_, Result<bool, ByteStoreError>> {
            self.0.delete(key)
        }

        fn contains(&self, key: &str) -> BoxFuture<'_, Result<bool, ByteStoreError>> {
            self.0.contains(key)
        }

        fn entry_count(&self) -> u64 {
            self.0.entry_count()
        }

        fn size_bytes(&self) -> u64 {
            self.0.size_bytes()
        }
    }

    #[tokio::test]
    async fn test_encoded_tier_namespace_delete_unsupported_by_store() {
        let store = Arc::new(PlainStore(MemoryByteStore::new(1_000_000)));
        let tier = EncodedTier::new(store, JsonCodec);

        let err = <EncodedTier<JsonCodec> as Tier<u32>>::delete_namespace(&tier, "user")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TierError::Unsupported {
                tier: "encoded",
                operation: "delete_namespace"
            }
        ));
    }
}

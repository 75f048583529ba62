//! Byte-level key-value stores.
//!
//! A [`ByteStore`] is the raw storage a remote cache offers: string keys,
//! byte values, per-entry TTL. It imposes no serialization opinions; the
//! [`EncodedTier`](super::EncodedTier) decorator layers typed values and
//! negative markers on top of it.
//!
//! # Design Principles
//!
//! - **String keys**: Human-readable for debugging, same format for any backend
//! - **Vec<u8> values**: Raw bytes, codecs live one layer up
//! - **Minimal interface**: Only the operations the encoded tier needs
//! - **Dyn-compatible**: Uses `Pin<Box<dyn Future>>` for trait object support

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::future::Cache as MokaCache;
use moka::Expiry;
use thiserror::Error;

use super::BoxFuture;

/// Errors that can occur in a byte store.
#[derive(Debug, Clone, Error)]
pub enum ByteStoreError {
    /// Value exceeds the store's capacity.
    #[error("value too large: {size} bytes (max: {max})")]
    ValueTooLarge { size: usize, max: u64 },

    /// Store-specific failure.
    #[error("store error: {0}")]
    Backend(String),

    /// The store does not implement this operation.
    #[error("{operation} is not supported by this store")]
    Unsupported { operation: &'static str },
}

/// Generic key-value interface for byte storage.
///
/// # Thread Safety
///
/// All implementations must be `Send + Sync` for use across async tasks.
pub trait ByteStore: Send + Sync {
    /// Store a value, replacing any existing one.
    ///
    /// `ttl` of `None` means the value never expires.
    fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> BoxFuture<'_, Result<(), ByteStoreError>>;

    /// Retrieve a value.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(data))` if the key exists
    /// - `Ok(None)` if the key is not found
    /// - `Err(_)` if the store failed
    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<Vec<u8>>, ByteStoreError>>;

    /// Delete a value.
    ///
    /// Returns `true` if the key existed.
    fn delete(&self, key: &str) -> BoxFuture<'_, Result<bool, ByteStoreError>>;

    /// Check if a key exists without retrieving the value.
    fn contains(&self, key: &str) -> BoxFuture<'_, Result<bool, ByteStoreError>>;

    /// Delete every key starting with `prefix`.
    ///
    /// Stores without a way to enumerate or partition keys keep the default,
    /// which returns [`ByteStoreError::Unsupported`].
    fn delete_prefix(&self, _prefix: &str) -> BoxFuture<'_, Result<(), ByteStoreError>> {
        Box::pin(async {
            Err(ByteStoreError::Unsupported {
                operation: "delete_prefix",
            })
        })
    }

    /// Current number of entries.
    fn entry_count(&self) -> u64;

    /// Current size of stored values in bytes.
    fn size_bytes(&self) -> u64;
}

#[derive(Clone)]
struct StoredBytes {
    data: Arc<Vec<u8>>,
    ttl: Option<Duration>,
}

struct StoredExpiry;

impl Expiry<String, StoredBytes> for StoredExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &StoredBytes,
        _created_at: Instant,
    ) -> Option<Duration> {
        value.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &StoredBytes,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.ttl
    }
}

/// In-memory byte store using moka.
///
/// Entries are weighted by their byte size, so the store is bounded by
/// memory rather than entry count. Stands in for a remote key-value
/// server in tests and single-process deployments.
pub struct MemoryByteStore {
    /// The underlying moka cache.
    cache: MokaCache<String, StoredBytes>,

    /// Maximum size in bytes.
    max_size_bytes: u64,

    /// Writes rejected for being larger than the store.
    rejected_writes: AtomicU64,
}

impl MemoryByteStore {
    /// Create a new memory byte store.
    ///
    /// # Arguments
    ///
    /// * `max_size_bytes` - Maximum total size of stored values
    pub fn new(max_size_bytes: u64) -> Self {
        let cache = MokaCache::builder()
            // Weight each entry by its data size
            .weigher(|_key: &String, value: &StoredBytes| -> u32 {
                // moka uses u32 for weights, cap at u32::MAX for very large entries
                value.data.len().min(u32::MAX as usize) as u32
            })
            .max_capacity(max_size_bytes)
            .expire_after(StoredExpiry)
            .support_invalidation_closures()
            .build();

        Self {
            cache,
            max_size_bytes,
            rejected_writes: AtomicU64::new(0),
        }
    }

    /// Maximum configured size in bytes.
    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_bytes
    }

    /// Number of writes rejected with [`ByteStoreError::ValueTooLarge`].
    pub fn rejected_writes(&self) -> u64 {
        self.rejected_writes.load(Ordering::Relaxed)
    }

    /// Run moka's pending maintenance work so counters are current.
    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }
}

impl ByteStore for MemoryByteStore {
    fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> BoxFuture<'_, Result<(), ByteStoreError>> {
        let key = key.to_string();
        Box::pin(async move {
            if value.len() as u64 > self.max_size_bytes {
                self.rejected_writes.fetch_add(1, Ordering::Relaxed);
                return Err(ByteStoreError::ValueTooLarge {
                    size: value.len(),
                    max: self.max_size_bytes,
                });
            }

            let stored = StoredBytes {
                data: Arc::new(value),
                ttl: ttl.filter(|ttl| !ttl.is_zero()),
            };
            self.cache.insert(key, stored).await;
            Ok(())
        })
    }

    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<Vec<u8>>, ByteStoreError>> {
        let key = key.to_string();
        Box::pin(async move {
            Ok(self
                .cache
                .get(&key)
                .await
                .map(|stored| stored.data.as_ref().clone()))
        })
    }

    fn delete(&self, key: &str) -> BoxFuture<'_, Result<bool, ByteStoreError>> {
        let key = key.to_string();
        Box::pin(async move { Ok(self.cache.remove(&key).await.is_some()) })
    }

    fn contains(&self, key: &str) -> BoxFuture<'_, Result<bool, ByteStoreError>> {
        let key = key.to_string();
        Box::pin(async move { Ok(self.cache.contains_key(&key)) })
    }

    fn delete_prefix(&self, prefix: &str) -> BoxFuture<'_, Result<(), ByteStoreError>> {
        let prefix = prefix.to_string();
        Box::pin(async move {
            self.cache
                .invalidate_entries_if(move |key, _| key.starts_with(&prefix))
                .map(|_| ())
                .map_err(|e| ByteStoreError::Backend(e.to_string()))
        })
    }

    fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    fn size_bytes(&self) -> u64 {
        self.cache.weighted_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_byte_store_set_and_get() {
        let store = MemoryByteStore::new(1_000_000);

        store.set("key1", vec![1, 2, 3], None).await.unwrap();

        let value = store.get("key1").await.unwrap();
        assert_eq!(value, Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn test_byte_store_get_missing() {
        let store = MemoryByteStore::new(1_000_000);
        assert!(store.get("nonexistent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_byte_store_delete() {
        let store = MemoryByteStore::new(1_000_000);

        store.set("key1", vec![1], None).await.unwrap();
        assert!(store.contains("key1").await.unwrap());

        assert!(store.delete("key1").await.unwrap());
        assert!(!store.delete("key1").await.unwrap());
        assert!(!store.contains("key1").await.unwrap());
    }

    #[tokio::test]
    async fn test_byte_store_delete_prefix() {
        let store = MemoryByteStore::new(1_000_000);

        store.set("user:1", vec![1], None).await.unwrap();
        store.set("user:2", vec![2], None).await.unwrap();
        store.set("users:1", vec![3], None).await.unwrap();

        store.delete_prefix("user:").await.unwrap();

        assert!(store.get("user:1").await.unwrap().is_none());
        assert!(store.get("user:2").await.unwrap().is_none());
        assert_eq!(store.get("users:1").await.unwrap(), Some(vec![3]));
    }

    #[tokio::test]
    async fn test_byte_store_ttl() {
        let store = MemoryByteStore::new(1_000_000);

        store
            .set("short", vec![1], Some(Duration::from_millis(50)))
            .await
            .unwrap();
        assert!(store.get("short").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(store.get("short").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_byte_store_rejects_oversized_value() {
        let store = MemoryByteStore::new(100);

        let err = store.set("big", vec![0u8; 101], None).await.unwrap_err();
        assert!(matches!(
            err,
            ByteStoreError::ValueTooLarge { size: 101, max: 100 }
        ));
        assert_eq!(store.rejected_writes(), 1);
    }

    #[tokio::test]
    async fn test_byte_store_size_tracking() {
        let store = MemoryByteStore::new(1_000_000);

        store.set("key1", vec![0u8; 1000], None).await.unwrap();
        store.set("key2", vec![0u8; 2000], None).await.unwrap();
        store.run_pending_tasks().await;

        assert!(store.size_bytes() >= 3000);
        assert_eq!(store.entry_count(), 2);
    }
}

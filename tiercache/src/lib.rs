//! tiercache - Read-through two-tier caching for async services
//!
//! This library puts a local (in-process) tier and a shared tier in front of
//! per-namespace loaders. Concurrent misses on one key share a single load,
//! "not found" results are cached as negative markers, and entries can be
//! given fixed or jittered expirations.
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────────────────────────────────────┐
//!   get(query) ──►│                 Orchestrator                 │
//!                 │  local tier ─► shared tier ─► single-flight  │
//!                 └──────┬──────────────┬──────────────┬─────────┘
//!                        │              │              │
//!                  MemoryTier      EncodedTier     LoaderRegistry
//!                  NoopTier        BreakerTier     (namespace → Loader)
//!                                  MemoryTier
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use tiercache::{FnLoader, LoadError, MemoryTierConfig, Orchestrator, Query};
//!
//! let cache = Orchestrator::<String>::in_memory(MemoryTierConfig::default());
//! cache.register_loader(
//!     FnLoader::new("user", |query: Query| async move {
//!         match query.params()[0].as_str() {
//!             "42" => Ok("Alice".to_string()),
//!             _ => Err(LoadError::NotFound),
//!         }
//!     })
//!     .with_jitter(Duration::from_secs(60), Duration::from_secs(90)),
//! );
//!
//! let name = cache.get(&Query::new("user", ["42"])).await?;
//! assert_eq!(name.as_str(), "Alice");
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod expiration;
pub mod flight;
pub mod loader;
pub mod orchestrator;
pub mod query;
pub mod telemetry;
pub mod tier;

pub use codec::{BincodeCodec, Codec, CodecError, CodecKind, JsonCodec};
pub use config::{CacheConfig, DEFAULT_LOCAL_TTL, DEFAULT_NEGATIVE_TTL};
pub use error::{CacheError, CancelReason, SharedError};
pub use expiration::Expiration;
pub use flight::{FlightAborted, FlightGroup, NoDedup, SingleFlight};
pub use loader::{BoxError, FnLoader, LoadError, Loader, LoaderRegistry};
pub use orchestrator::{
    CacheValue, CallContext, Delivery, FlightResult, Orchestrator, OrchestratorBuilder,
};
pub use query::{Payload, Query, QueryError};
pub use telemetry::{CacheStats, StatsSnapshot};
pub use tier::{
    BoxFuture, BreakerConfig, BreakerTier, ByteStore, ByteStoreError, CircuitState, EncodedTier,
    Entry, Lookup, MemoryByteStore, MemoryTier, MemoryTierConfig, NoopTier, Tier, TierError,
};

//! Cache telemetry.
//!
//! Lock-free counters recorded by the orchestrator on every call, and a
//! point-in-time snapshot for reporting.
//!
//! # Architecture
//!
//! ```text
//! Orchestrator ─────► CacheStats ─────► StatsSnapshot ─────► Views
//!                     (atomic counters)  (point-in-time copy)  (CLI, logs)
//! ```
//!
//! # Example
//!
//! ```ignore
//! let cache = Orchestrator::<String>::in_memory(MemoryTierConfig::default());
//! // ... serve traffic ...
//! let snapshot = cache.stats().snapshot();
//! println!("{snapshot}");
//! println!("Hit rate: {:.1}%", snapshot.hit_rate() * 100.0);
//! ```

mod metrics;
mod snapshot;

pub use metrics::CacheStats;
pub use snapshot::StatsSnapshot;

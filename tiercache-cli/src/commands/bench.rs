//! Benchmark command: concurrent random reads against a warmed cache.
//!
//! Every key gets a random payload up front. The loader serves those
//! payloads, so every value returned by the cache can be checked against the
//! original bytes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Args, ValueEnum};
use rand::Rng;
use tiercache::{
    BincodeCodec, CacheConfig, CodecKind, EncodedTier, FnLoader, LoadError, MemoryByteStore,
    MemoryTier, MemoryTierConfig, Orchestrator, Query, StatsSnapshot,
};
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::error::CliError;

/// Namespace used for benchmark keys.
const NAMESPACE: &str = "bench";

/// Shared tier implementation to benchmark.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum Backend {
    /// In-process moka tier holding values directly
    Memory,
    /// Byte store behind the encoded tier (bincode)
    Encoded,
    /// Encoded shared tier with an in-process local tier in front
    EncodedLocal,
}

/// Arguments for `tiercache bench`.
#[derive(Debug, Args)]
pub struct BenchArgs {
    /// Shared tier to use
    #[arg(long, value_enum, default_value_t = Backend::Memory)]
    pub backend: Backend,

    /// Number of distinct keys
    #[arg(long, default_value_t = 1000)]
    pub keys: usize,

    /// Concurrent gets fired per second
    #[arg(long, default_value_t = 100)]
    pub clients: usize,

    /// How long to run, in seconds
    #[arg(long, default_value_t = 5)]
    pub seconds: u64,

    /// Payload size in bytes
    #[arg(long, default_value_t = 1024)]
    pub value_size: usize,

    /// Give every caller its own copy of the value
    #[arg(long)]
    pub isolate: bool,
}

/// Validated benchmark settings.
#[derive(Debug, Clone)]
pub struct BenchConfig {
    pub backend: Backend,
    pub keys: usize,
    pub clients: usize,
    pub duration: Duration,
    pub value_size: usize,
    pub isolate: bool,
    /// Byte store capacity: room for every payload plus framing, twice over.
    pub store_bytes: u64,
}

impl TryFrom<BenchArgs> for BenchConfig {
    type Error = CliError;

    fn try_from(args: BenchArgs) -> Result<Self, Self::Error> {
        if args.keys == 0 {
            return Err(CliError::Args("--keys must be at least 1".to_string()));
        }
        if args.clients == 0 {
            return Err(CliError::Args("--clients must be at least 1".to_string()));
        }
        if args.seconds == 0 {
            return Err(CliError::Args("--seconds must be at least 1".to_string()));
        }
        let store_bytes = (args.value_size as u64)
            .checked_add(64)
            .and_then(|entry| entry.checked_mul(args.keys as u64))
            .and_then(|total| total.checked_mul(2))
            .ok_or_else(|| {
                CliError::Args("--keys times --value-size is too large".to_string())
            })?;
        Ok(Self {
            backend: args.backend,
            keys: args.keys,
            clients: args.clients,
            duration: Duration::from_secs(args.seconds),
            value_size: args.value_size,
            isolate: args.isolate,
            store_bytes,
        })
    }
}

/// Outcome of a benchmark run.
#[derive(Debug, Clone)]
pub struct BenchReport {
    pub requests: u64,
    pub elapsed: Duration,
    pub stats: StatsSnapshot,
}

/// Run the bench command and print its report.
pub async fn run(args: BenchArgs) -> Result<(), CliError> {
    let config = BenchConfig::try_from(args)?;
    let report = run_bench(&config).await?;

    println!("Backend:   {:?}", config.backend);
    println!(
        "Requests:  {} in {:.2}s ({:.0}/s)",
        report.requests,
        report.elapsed.as_secs_f64(),
        report.requests as f64 / report.elapsed.as_secs_f64().max(f64::EPSILON)
    );
    println!("Loads:     {}", report.stats.loads);
    println!("Hit rate:  {:.1}%", report.stats.hit_rate() * 100.0);
    println!("Stats:     {}", report.stats);
    Ok(())
}

/// Warm every key, then fire `clients` verified gets per second.
///
/// Batches fire at the end of each second, so a run takes at least the
/// configured duration.
pub async fn run_bench(config: &BenchConfig) -> Result<BenchReport, CliError> {
    let payloads = Arc::new(random_payloads(config.keys, config.value_size));
    let cache = build_cache(config, Arc::clone(&payloads));

    info!(
        backend = ?config.backend,
        keys = config.keys,
        value_size = config.value_size,
        "Warming cache"
    );
    for (index, expected) in payloads.iter().enumerate() {
        let query = key(index);
        let value = cache.get(&query).await?;
        verify(&query, &value, expected)?;
    }

    let start = Instant::now();
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let mut batches = JoinSet::new();
    let seconds = config.duration.as_secs();
    // The first tick completes immediately.
    ticker.tick().await;

    for second in 1..=seconds {
        ticker.tick().await;
        debug!(second, clients = config.clients, "Firing batch");

        for _ in 0..config.clients {
            let index = rand::rng().random_range(0..config.keys);
            let cache = cache.clone();
            let payloads = Arc::clone(&payloads);
            batches.spawn(async move {
                let query = key(index);
                let value = cache.get(&query).await?;
                verify(&query, &value, &payloads[index])
            });
        }
    }

    let mut requests = 0u64;
    while let Some(joined) = batches.join_next().await {
        joined.map_err(|e| CliError::Verification {
            key: NAMESPACE.to_string(),
            reason: format!("client task failed: {e}"),
        })??;
        requests += 1;
    }

    let report = BenchReport {
        requests,
        elapsed: start.elapsed(),
        stats: cache.stats().snapshot(),
    };
    info!(requests = report.requests, "Benchmark finished");
    Ok(report)
}

fn build_cache(config: &BenchConfig, payloads: Arc<Vec<Vec<u8>>>) -> Orchestrator<Vec<u8>> {
    let mut cache_config = CacheConfig::default();
    if config.isolate {
        cache_config = cache_config.with_isolation(CodecKind::Bincode);
    }

    let store_bytes = config.store_bytes;
    let tier_entries = (config.keys as u64).saturating_mul(2);

    let builder = match config.backend {
        Backend::Memory => Orchestrator::builder(MemoryTier::new(
            MemoryTierConfig::default().with_max_entries(tier_entries),
        )),
        Backend::Encoded => Orchestrator::builder(EncodedTier::new(
            Arc::new(MemoryByteStore::new(store_bytes)),
            BincodeCodec,
        )),
        Backend::EncodedLocal => Orchestrator::builder(EncodedTier::new(
            Arc::new(MemoryByteStore::new(store_bytes)),
            BincodeCodec,
        ))
        .local_memory(MemoryTierConfig::default().with_max_entries(tier_entries)),
    };

    builder
        .config(cache_config)
        .loader(FnLoader::new(NAMESPACE, move |query: Query| {
            let payloads = Arc::clone(&payloads);
            async move {
                let index: usize = query.params()[0].parse().map_err(LoadError::failed)?;
                payloads.get(index).cloned().ok_or(LoadError::NotFound)
            }
        }))
        .build()
}

fn random_payloads(keys: usize, value_size: usize) -> Vec<Vec<u8>> {
    let mut rng = rand::rng();
    (0..keys)
        .map(|_| {
            let mut payload = vec![0u8; value_size];
            rng.fill(&mut payload[..]);
            payload
        })
        .collect()
}

fn key(index: usize) -> Query {
    Query::new(NAMESPACE, [index.to_string()])
}

fn verify(query: &Query, value: &[u8], expected: &[u8]) -> Result<(), CliError> {
    if value == expected {
        Ok(())
    } else {
        Err(CliError::Verification {
            key: query.full_key().to_string(),
            reason: format!("got {} bytes, expected {}", value.len(), expected.len()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(backend: Backend) -> BenchArgs {
        BenchArgs {
            backend,
            keys: 20,
            clients: 10,
            seconds: 1,
            value_size: 64,
            isolate: false,
        }
    }

    #[test]
    fn test_config_rejects_zero_values() {
        let mut zero_keys = args(Backend::Memory);
        zero_keys.keys = 0;
        assert!(matches!(
            BenchConfig::try_from(zero_keys),
            Err(CliError::Args(_))
        ));

        let mut zero_seconds = args(Backend::Memory);
        zero_seconds.seconds = 0;
        assert!(BenchConfig::try_from(zero_seconds).is_err());
    }

    #[test]
    fn test_config_rejects_oversized_store() {
        let mut huge = args(Backend::Encoded);
        huge.keys = usize::MAX;
        huge.value_size = usize::MAX;
        assert!(matches!(
            BenchConfig::try_from(huge),
            Err(CliError::Args(_))
        ));

        let config = BenchConfig::try_from(args(Backend::Encoded)).unwrap();
        assert_eq!(config.store_bytes, 20 * (64 + 64) * 2);
    }

    #[test]
    fn test_verify_detects_mismatch() {
        let query = key(1);
        assert!(verify(&query, &[1, 2], &[1, 2]).is_ok());
        assert!(matches!(
            verify(&query, &[1, 2], &[1, 3]),
            Err(CliError::Verification { .. })
        ));
    }

    #[tokio::test]
    async fn test_bench_runs_on_every_backend() {
        for backend in [Backend::Memory, Backend::Encoded, Backend::EncodedLocal] {
            let config = BenchConfig::try_from(args(backend)).unwrap();
            let report = run_bench(&config).await.unwrap();

            assert_eq!(report.requests, 10);
            assert!(report.elapsed >= config.duration);
            // Warm-up loads every key exactly once.
            assert_eq!(report.stats.loads, 20);
        }
    }

    #[tokio::test]
    async fn test_bench_with_isolation() {
        let mut args = args(Backend::EncodedLocal);
        args.isolate = true;
        let config = BenchConfig::try_from(args).unwrap();

        let report = run_bench(&config).await.unwrap();
        assert_eq!(report.requests, 10);
    }
}

//! CLI error types.

use thiserror::Error;

/// Errors surfaced by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid command-line arguments.
    #[error("invalid arguments: {0}")]
    Args(String),

    /// The async runtime could not be started.
    #[error("failed to start runtime: {0}")]
    Runtime(#[source] std::io::Error),

    /// A cache operation failed.
    #[error("cache error: {0}")]
    Cache(#[from] tiercache::CacheError),

    /// A returned value did not match what the loader produced.
    #[error("verification failed for {key}: {reason}")]
    Verification { key: String, reason: String },
}

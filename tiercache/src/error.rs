//! Errors returned by the orchestrator.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::codec::CodecError;
use crate::flight::FlightAborted;
use crate::tier::TierError;

/// Shared loader error.
///
/// Loader errors are fanned out to every caller of a single-flight
/// execution, so they are reference counted rather than boxed.
pub type SharedError = Arc<dyn StdError + Send + Sync>;

/// Why a bounded call gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The call's deadline passed.
    DeadlineExceeded,
    /// The call's cancellation token fired.
    Cancelled,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::DeadlineExceeded => write!(f, "deadline exceeded"),
            CancelReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Errors returned by orchestrator operations.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// The entry does not exist, either at the source or as a cached
    /// negative marker.
    #[error("entry not found: {key}")]
    NotFound { key: String },

    /// No loader is registered for the namespace and none was supplied.
    #[error("no loader registered for namespace '{namespace}'")]
    LoaderMissing { namespace: String },

    /// The loader failed.
    #[error("loader failed for {key}: {source}")]
    Loader {
        key: String,
        #[source]
        source: SharedError,
    },

    /// The shared tier read failed and the fallback load failed too.
    #[error("shared tier failed for {key}: {source}; loader also failed: {loader}")]
    SharedTierAndLoader {
        key: String,
        #[source]
        source: TierError,
        loader: SharedError,
    },

    /// A tier operation requested by the caller failed.
    #[error("store operation failed for {key}: {source}")]
    Store {
        key: String,
        #[source]
        source: TierError,
    },

    /// The call gave up before a result was available. Work already started
    /// on its behalf keeps running.
    #[error("call {0}")]
    Cancelled(CancelReason),

    /// A result could not be copied for the caller.
    #[error("result isolation failed: {0}")]
    Isolation(#[from] CodecError),

    /// The task running the operation ended without a result.
    #[error("operation aborted: {0}")]
    Aborted(String),
}

impl CacheError {
    /// Whether the entry is known not to exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound { .. })
    }

    /// Whether the call gave up on a deadline or cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CacheError::Cancelled(_))
    }

    pub(crate) fn not_found(key: impl Into<String>) -> Self {
        CacheError::NotFound { key: key.into() }
    }
}

impl From<FlightAborted> for CacheError {
    fn from(e: FlightAborted) -> Self {
        CacheError::Aborted(e.reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            CacheError::not_found("user:?1").to_string(),
            "entry not found: user:?1"
        );
        assert_eq!(
            CacheError::LoaderMissing {
                namespace: "user".to_string()
            }
            .to_string(),
            "no loader registered for namespace 'user'"
        );
        assert_eq!(
            CacheError::Cancelled(CancelReason::DeadlineExceeded).to_string(),
            "call deadline exceeded"
        );
    }

    #[test]
    fn test_shared_tier_and_loader_keeps_both() {
        let err = CacheError::SharedTierAndLoader {
            key: "user:?1".to_string(),
            source: TierError::Backend("connection reset".to_string()),
            loader: Arc::new(std::io::Error::other("db down")),
        };

        let text = err.to_string();
        assert!(text.contains("connection reset"));
        assert!(text.contains("db down"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_predicates() {
        assert!(CacheError::not_found("k").is_not_found());
        assert!(CacheError::Cancelled(CancelReason::Cancelled).is_cancelled());
        assert!(!CacheError::Aborted("panic".to_string()).is_not_found());
    }
}

//! Per-call deadlines and cancellation.

use std::future::Future;
use std::time::Duration;

use futures::future;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{CacheError, CancelReason};

/// Bounds on how long a caller is willing to wait.
///
/// A bounded call runs its operation as a spawned task and races it against
/// the deadline and the cancellation token. When either fires the caller gets
/// [`CacheError::Cancelled`] right away; the operation keeps running, so a
/// load started on the caller's behalf still populates the cache.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
    token: Option<CancellationToken>,
}

impl CallContext {
    /// No deadline, no cancellation.
    pub fn background() -> Self {
        Self::default()
    }

    /// Give up after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// Give up at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            token: None,
        }
    }

    /// Give up when `token` is cancelled.
    pub fn with_cancellation(token: CancellationToken) -> Self {
        Self {
            deadline: None,
            token: Some(token),
        }
    }

    /// Add a cancellation token to this context.
    pub fn and_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the context has a deadline or a cancellation token.
    pub fn is_bounded(&self) -> bool {
        self.deadline.is_some() || self.token.is_some()
    }

    /// The reason the call should stop now, if any.
    fn expired(&self) -> Option<CancelReason> {
        if self.token.as_ref().is_some_and(|t| t.is_cancelled()) {
            return Some(CancelReason::Cancelled);
        }
        if self.deadline.is_some_and(|d| d <= Instant::now()) {
            return Some(CancelReason::DeadlineExceeded);
        }
        None
    }

    /// Run `work` within this context's bounds.
    ///
    /// Unbounded contexts await `work` in place. Bounded ones spawn it and
    /// stop waiting when the deadline passes or the token fires. Work is not
    /// started at all if the context has already expired.
    pub async fn run<T, F>(&self, work: F) -> Result<T, CacheError>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, CacheError>> + Send + 'static,
    {
        if !self.is_bounded() {
            return work.await;
        }
        if let Some(reason) = self.expired() {
            return Err(CacheError::Cancelled(reason));
        }

        let handle = tokio::spawn(work);

        let deadline = async {
            match self.deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => future::pending::<()>().await,
            }
        };
        let cancelled = async {
            match &self.token {
                Some(token) => token.cancelled().await,
                None => future::pending::<()>().await,
            }
        };

        tokio::select! {
            joined = handle => {
                joined.unwrap_or_else(|e| Err(CacheError::Aborted(e.to_string())))
            }
            _ = deadline => {
                debug!("Deadline exceeded, detaching operation");
                Err(CacheError::Cancelled(CancelReason::DeadlineExceeded))
            }
            _ = cancelled => {
                debug!("Call cancelled, detaching operation");
                Err(CacheError::Cancelled(CancelReason::Cancelled))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_background_runs_in_place() {
        let ctx = CallContext::background();
        assert!(!ctx.is_bounded());

        let result = ctx.run(async { Ok::<_, CacheError>(3) }).await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_timeout_returns_early_and_work_continues() {
        let finished = Arc::new(AtomicBool::new(false));
        let done = Arc::clone(&finished);
        let ctx = CallContext::with_timeout(Duration::from_millis(10));

        let start = std::time::Instant::now();
        let result = ctx
            .run(async move {
                tokio::time::sleep(Duration::from_millis(60)).await;
                done.store(true, Ordering::SeqCst);
                Ok::<_, CacheError>(())
            })
            .await;

        assert!(matches!(
            result,
            Err(CacheError::Cancelled(CancelReason::DeadlineExceeded))
        ));
        assert!(start.elapsed() < Duration::from_millis(50));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancellation_token() {
        let token = CancellationToken::new();
        let ctx = CallContext::with_cancellation(token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token.cancel();
        });

        let result = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, CacheError>(())
            })
            .await;
        canceller.await.unwrap();

        assert!(matches!(
            result,
            Err(CacheError::Cancelled(CancelReason::Cancelled))
        ));
    }

    #[tokio::test]
    async fn test_already_cancelled_does_not_start_work() {
        let token = CancellationToken::new();
        token.cancel();
        let started = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&started);

        let result = CallContext::with_cancellation(token)
            .run(async move {
                flag.store(true, Ordering::SeqCst);
                Ok::<_, CacheError>(())
            })
            .await;

        assert!(result.unwrap_err().is_cancelled());
        tokio::task::yield_now().await;
        assert!(!started.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_bounded_call_completing_in_time() {
        let ctx = CallContext::with_timeout(Duration::from_secs(1))
            .and_cancellation(CancellationToken::new());

        let result = ctx.run(async { Ok::<_, CacheError>("done") }).await;
        assert_eq!(result.unwrap(), "done");
    }
}

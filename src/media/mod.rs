//! Media resolution: turning a [`MediaRef`] into a displayable local path.
//!
//! [`MediaRef`]: chatcore::types::MediaRef

pub mod resolver;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

pub use resolver::{CacheStats, MediaResolver};

/// Outcome of one resolution attempt. Nothing here is fatal: every variant
/// except `Ready` means "not resolved yet".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Ready(PathBuf),
    /// The store does not have the media (yet); retried after the next sync
    Unavailable,
    /// The attempt outlived the resolve timeout. Work continues in the
    /// background and a late result still lands in the cache.
    TimedOut,
    Failed(String),
    Cancelled,
}

impl Resolution {
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Resolution::Ready(path) => Some(path),
            _ => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Resolution::Ready(_))
    }

    /// Whether the host should offer a manual retry
    pub fn is_retryable(&self) -> bool {
        matches!(self, Resolution::TimedOut | Resolution::Failed(_))
    }
}

/// Cooperative cancellation flag for a resolution request.
///
/// Clones share the same flag. Once cancelled, the request stops waiting and
/// no longer counts as interested in the result.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Resolves once [`CancelToken::cancel`] has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_wakes_waiter() {
        let token = CancelToken::new();
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };
        tokio::task::yield_now().await;
        token.cancel();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_resolution_helpers() {
        let ready = Resolution::Ready(PathBuf::from("/tmp/a.jpg"));
        assert!(ready.is_ready());
        assert_eq!(ready.path(), Some(&PathBuf::from("/tmp/a.jpg")));
        assert!(Resolution::TimedOut.is_retryable());
        assert!(Resolution::Failed("io".into()).is_retryable());
        assert!(!Resolution::Unavailable.is_retryable());
        assert!(Resolution::Cancelled.path().is_none());
    }
}

//! Cooperative cancellation for agent turns.
//!
//! A single [`CancelToken`] is created per user turn and shared by the chat
//! stream, every parallel tool execution, and any nested sub-agent loop.
//! Setting the token is idempotent; there is no way to un-cancel.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;

use tokio::sync::Notify;

/// One-shot cancellation signal with an async wait side.
///
/// Cloning is cheap; all clones observe the same signal.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the token. Safe to call more than once.
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve once the token fires. Returns immediately if already fired.
    pub async fn cancelled(&self) {
        // The permit must be registered before re-checking the flag so a
        // concurrent cancel() between the check and the await is not lost.
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Wait `seconds` before a retry, ticking once per second so the caller can
/// surface a live countdown. Returns `false` when the token fired mid-wait
/// (the caller should stop instead of retrying).
pub async fn countdown_retry(seconds: u64, cancel: &CancelToken) -> bool {
    for _ in 0..seconds {
        if cancel.is_cancelled() {
            return false;
        }
        tokio::select! {
            _ = cancel.cancelled() => return false,
            _ = tokio::time::sleep(Duration::from_secs(1)) => {}
        }
    }
    !cancel.is_cancelled()
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn starts_unset() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let token = CancelToken::new();
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn clones_share_state() {
        let token = CancelToken::new();
        let clone = token.clone();
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_resolves_after_fire() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        handle.await.expect("waiter task panicked");
    }

    #[tokio::test]
    async fn cancelled_returns_immediately_when_already_fired() {
        let token = CancelToken::new();
        token.cancel();
        // Must not hang.
        tokio::time::timeout(Duration::from_millis(100), token.cancelled())
            .await
            .expect("cancelled() should resolve immediately");
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_completes_without_cancel() {
        let token = CancelToken::new();
        assert!(countdown_retry(3, &token).await);
    }

    #[tokio::test]
    async fn countdown_aborts_on_cancel() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move { countdown_retry(30, &waiter).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
        assert!(!handle.await.expect("countdown task panicked"));
    }

    #[tokio::test]
    async fn countdown_returns_false_when_already_cancelled() {
        let token = CancelToken::new();
        token.cancel();
        assert!(!countdown_retry(5, &token).await);
    }
}

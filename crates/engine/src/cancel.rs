//! Broadcast cancellation signal shared by a workflow tree.
//!
//! Close-once semantics: the first `cancel()` wins, later calls are no-ops.
//! Every running step and every descendant sub-workflow observes the same
//! signal; blocking step bodies select on [`CancelSignal::cancelled`].

use std::sync::Arc;

use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct CancelSignal {
    inner: Arc<watch::Sender<bool>>,
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { inner: Arc::new(tx) }
    }

    /// Fire the signal. Idempotent.
    pub fn cancel(&self) {
        self.inner.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.borrow()
    }

    /// Resolve once the signal has fired. Returns immediately if it already
    /// has.
    pub async fn cancelled(&self) {
        let mut rx = self.inner.subscribe();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn broadcasts_to_every_clone() {
        let signal = CancelSignal::new();
        let observer = signal.clone();
        assert!(!observer.is_cancelled());

        let waiter = tokio::spawn(async move { observer.cancelled().await });
        signal.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter wakes")
            .expect("waiter task");
        assert!(signal.is_cancelled());
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_immediate_after_fire() {
        let signal = CancelSignal::new();
        signal.cancel();
        signal.cancel();
        // Must not hang when the signal fired before the await.
        tokio::time::timeout(Duration::from_millis(100), signal.cancelled())
            .await
            .expect("already-fired signal resolves immediately");
    }
}

//! Session cancellation primitives.
//!
//! Each running session owns a [`CancelHandle`]; every external call the
//! orchestrator makes receives a [`CancelToken`] derived from it. A
//! cancelled token wins any `select!` race, which is what aborts an
//! in-flight model stream without waiting for the remote to close.

use tokio::sync::watch;

/// Owning side of a cancellation pair. Cloning shares the same signal.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    /// Derive a token that observes this handle's signal.
    #[must_use]
    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Observing side of a cancellation pair.
#[derive(Clone, Debug)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// True once the owning handle has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when the handle is cancelled. If the handle is dropped
    /// without cancelling, this future never resolves.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow() {
                return;
            }
            if self.rx.changed().await.is_err() {
                // Handle dropped uncancelled: stay pending forever so
                // select! races fall through to the real work.
                futures_util::future::pending::<()>().await;
            }
        }
    }

    /// A token that can never be cancelled, for callers outside any
    /// session scope.
    #[must_use]
    pub fn never() -> Self {
        CancelHandle::new().token()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn token_observes_cancel() {
        let handle = CancelHandle::new();
        let mut token = handle.token();
        assert!(!token.is_cancelled());
        handle.cancel();
        token.cancelled().await;
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn cancel_wins_select_race() {
        let handle = CancelHandle::new();
        let mut token = handle.token();
        handle.cancel();
        let raced = tokio::select! {
            () = token.cancelled() => "cancelled",
            () = tokio::time::sleep(std::time::Duration::from_secs(5)) => "slept",
        };
        assert_eq!(raced, "cancelled");
    }
}

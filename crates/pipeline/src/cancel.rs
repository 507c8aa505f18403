//! Cooperative cancellation for workflow executions.

use std::future::Future;

use tokio::sync::watch;

/// Owner side: flips the shared flag once.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

/// Observer side, polled between and during steps.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

/// Signalled when a guarded future lost the race against cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }
}

impl CancelToken {
    /// A token that is never cancelled.
    pub fn never() -> Self {
        let (handle, token) = cancel_pair();
        // The receiver keeps reading `false` once the sender is gone.
        drop(handle);
        token
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested. Pends forever if the handle
    /// is dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Run `fut` unless cancellation wins first. The in-flight future is
    /// dropped on cancellation.
    pub async fn guard<F: Future>(&self, fut: F) -> Result<F::Output, Cancelled> {
        if self.is_cancelled() {
            return Err(Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(Cancelled),
            out = fut => Ok(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn guard_passes_output_through() {
        let (_handle, token) = cancel_pair();
        assert_eq!(token.guard(async { 7 }).await, Ok(7));
    }

    #[tokio::test]
    async fn cancel_interrupts_pending_future() {
        let (handle, token) = cancel_pair();
        let task = tokio::spawn(async move {
            token
                .guard(tokio::time::sleep(Duration::from_secs(30)))
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.cancel();
        let out = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(out, Err(Cancelled));
    }

    #[tokio::test]
    async fn already_cancelled_skips_work() {
        let (handle, token) = cancel_pair();
        handle.cancel();
        assert!(token.is_cancelled());
        assert_eq!(token.guard(async { 1 }).await, Err(Cancelled));
    }

    #[tokio::test]
    async fn extra_tokens_see_the_same_signal() {
        let (handle, first) = cancel_pair();
        let second = handle.token();
        handle.cancel();
        assert!(first.is_cancelled());
        assert!(second.is_cancelled());
    }

    #[tokio::test]
    async fn never_token_does_not_fire() {
        let token = CancelToken::never();
        assert!(!token.is_cancelled());
        let out = tokio::time::timeout(Duration::from_millis(50), token.cancelled()).await;
        assert!(out.is_err());
    }
}

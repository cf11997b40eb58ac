//! Run-wide cancellation.
//!
//! A [`CancelHandle`] is held by whoever may abort the run (signal handler,
//! suite deadline). Every sleep and every call out to an observer or
//! transport races a [`CancelToken`]; losing the race drops the in-flight
//! future.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;

#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

/// Create a linked handle/token pair.
pub fn channel() -> (CancelHandle, CancelToken) {
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
        let (tx, rx) = watch::channel(false);
        // With the sender gone the value stays `false` forever.
        drop(tx);
        CancelToken { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested. Pends forever if the handle is
    /// dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let closed = rx.wait_for(|cancelled| *cancelled).await.is_err();
        if closed {
            std::future::pending::<()>().await;
        }
    }

    /// Drive `work` to completion unless cancelled first, in which case the
    /// future is dropped and `None` returned.
    pub async fn or_cancelled<F: Future>(&self, work: F) -> Option<F::Output> {
        if self.is_cancelled() {
            return None;
        }
        tokio::select! {
            output = work => Some(output),
            _ = self.cancelled() => None,
        }
    }

    /// Sleep for `duration` unless cancelled first. Returns `false` when the
    /// sleep was cut short.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.is_cancelled() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.cancelled() => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn sleep_completes_without_cancel() {
        let token = CancelToken::never();
        assert!(token.sleep(Duration::from_secs(5)).await);
        assert!(!token.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_sleep() {
        let (handle, token) = channel();
        let start = tokio::time::Instant::now();
        let sleeper = tokio::spawn(async move { token.sleep(Duration::from_secs(60)).await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.cancel();
        assert!(!sleeper.await.unwrap());
        assert!(start.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_drops_pending_work() {
        let (handle, token) = channel();
        let waiter = tokio::spawn(async move {
            token
                .or_cancelled(std::future::pending::<u32>())
                .await
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.cancel();
        assert_eq!(waiter.await.unwrap(), None);
    }

    #[tokio::test]
    async fn uncancelled_work_yields_its_output() {
        let token = CancelToken::never();
        assert_eq!(token.or_cancelled(async { 7 }).await, Some(7));
    }

    #[tokio::test]
    async fn already_cancelled_token_returns_immediately() {
        let (handle, _) = channel();
        handle.cancel();
        let token = handle.token();
        assert!(token.is_cancelled());
        assert!(!token.sleep(Duration::from_secs(3600)).await);
    }
}

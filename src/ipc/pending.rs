//! One-shot results that always resolve.
//!
//! A `Promise` is fulfilled at most once because fulfilling consumes it. If it
//! is dropped unfulfilled (its task was stopped or torn down with the
//! runtime) it resolves with its abandon value instead, so the paired
//! `Pending` never waits forever.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

/// Create a linked promise and pending result.
///
/// `on_abandon` produces the value delivered if the promise is dropped
/// without being fulfilled.
pub fn promise<T>(on_abandon: fn() -> T) -> (Promise<T>, Pending<T>) {
    let (tx, rx) = oneshot::channel();
    (
        Promise {
            tx: Some(tx),
            on_abandon,
        },
        Pending { rx, on_abandon },
    )
}

/// Write side of a one-shot result.
#[derive(Debug)]
pub struct Promise<T> {
    tx: Option<oneshot::Sender<T>>,
    on_abandon: fn() -> T,
}

impl<T> Promise<T> {
    /// Resolve with `value`.
    pub fn fulfill(mut self, value: T) {
        if let Some(tx) = self.tx.take() {
            // Receiver may have been dropped by a caller that stopped caring
            let _ = tx.send(value);
        }
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send((self.on_abandon)());
        }
    }
}

/// Read side of a one-shot result; a future that always completes.
#[derive(Debug)]
#[must_use = "a pending result does nothing unless awaited or waited on"]
pub struct Pending<T> {
    rx: oneshot::Receiver<T>,
    on_abandon: fn() -> T,
}

impl<T> Pending<T> {
    /// Already-resolved result.
    pub fn ready(value: T, on_abandon: fn() -> T) -> Self {
        let (promise, pending) = promise(on_abandon);
        promise.fulfill(value);
        pending
    }

    /// Block the calling thread until resolved.
    ///
    /// Must not be called from inside an async context.
    pub fn wait(self) -> T {
        let on_abandon = self.on_abandon;
        self.rx.blocking_recv().unwrap_or_else(|_| on_abandon())
    }

    /// Non-blocking check; returns the pending result back if unresolved.
    pub fn try_take(mut self) -> Result<T, Self> {
        match self.rx.try_recv() {
            Ok(value) => Ok(value),
            Err(oneshot::error::TryRecvError::Empty) => Err(self),
            Err(oneshot::error::TryRecvError::Closed) => Ok((self.on_abandon)()),
        }
    }
}

impl<T> Future for Pending<T> {
    type Output = T;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let on_abandon = self.on_abandon;
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or_else(|_| on_abandon()))
    }
}

//! Single-assignment completion cells that correlate batch results with callers.
//!
//! Each submitted request gets a [`Completer`] (kept by the queue, resolved by
//! the handler-invocation path) and a [`Pending`] (awaited by the caller). The
//! pair wraps a `tokio::sync::oneshot` channel, so a waiting caller never spins.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tracing::warn;

use crate::error::BatchError;

type Outcome<T> = Result<T, BatchError>;

/// Create a linked writer/reader pair for one request
pub fn completion_cell<T>() -> (Completer<T>, Pending<T>) {
    let (tx, rx) = oneshot::channel();
    (Completer { tx: Some(tx) }, Pending { rx })
}

/// What happened when a completion cell was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The caller is waiting and will receive the value
    Delivered,
    /// The caller stopped waiting; the value was dropped
    Abandoned,
    /// The cell had already been resolved; the value was dropped
    AlreadyResolved,
}

/// Writer half of a completion cell
#[derive(Debug)]
pub struct Completer<T> {
    tx: Option<oneshot::Sender<Outcome<T>>>,
}

impl<T> Completer<T> {
    /// Resolve the cell with a result or failure
    ///
    /// Resolving twice never overwrites the first value: the second call is
    /// logged and ignored.
    pub fn resolve(&mut self, outcome: Outcome<T>) -> Resolution {
        let Some(tx) = self.tx.take() else {
            warn!("Completion cell resolved twice, ignoring second result");
            return Resolution::AlreadyResolved;
        };

        match tx.send(outcome) {
            Ok(()) => Resolution::Delivered,
            Err(_) => Resolution::Abandoned,
        }
    }

    /// Whether a value has already been written
    pub fn is_resolved(&self) -> bool {
        self.tx.is_none()
    }

    /// Whether the caller dropped its [`Pending`] before resolution
    pub fn is_abandoned(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| tx.is_closed())
    }
}

/// Reader half of a completion cell
///
/// Resolves to the value written by the [`Completer`], or to
/// [`BatchError::Shutdown`] if the completer was dropped unresolved.
#[derive(Debug)]
pub struct Pending<T> {
    rx: oneshot::Receiver<Outcome<T>>,
}

impl<T> Future for Pending<T> {
    type Output = Outcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(BatchError::Shutdown)))
    }
}

//! Single-lane execution of document mutations.
//!
//! A [`WriteSerializer`] owns a piece of state and a bounded mailbox. One
//! worker task pulls steps off the mailbox in arrival order and runs each
//! to completion with exclusive `&mut` access to the state, so no two
//! steps ever interleave. A failing or panicking step is reported to its
//! own caller only; the worker moves on to the next step.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};

use crate::error::SyncError;

type Step<S> = Box<dyn for<'a> FnOnce(&'a mut S) -> BoxFuture<'a, ()> + Send>;

fn step<S, F>(f: F) -> Step<S>
where
    F: for<'a> FnOnce(&'a mut S) -> BoxFuture<'a, ()> + Send + 'static,
{
    Box::new(f)
}

/// Handle to a serializer worker. Cloning shares the same queue.
pub struct WriteSerializer<S> {
    tx: mpsc::Sender<Step<S>>,
}

impl<S> Clone for WriteSerializer<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<S: Send + 'static> WriteSerializer<S> {
    /// Spawn the worker. Must be called inside a Tokio runtime.
    ///
    /// The worker exits once every handle is dropped and the mailbox is
    /// drained.
    pub fn spawn(state: S, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<Step<S>>(capacity.max(1));

        tokio::spawn(async move {
            let mut state = state;
            while let Some(step) = rx.recv().await {
                step(&mut state).await;
            }
            tracing::debug!("Write serializer drained, worker exiting");
        });

        Self { tx }
    }

    /// Append `op` to the queue. Waits only for mailbox space, not for
    /// the step to run; await the returned handle for its result.
    pub async fn enqueue<T, F>(&self, op: F) -> QueueHandle<T>
    where
        T: Send + 'static,
        F: for<'a> FnOnce(&'a mut S) -> BoxFuture<'a, Result<T, SyncError>> + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();

        let job = step(move |state: &mut S| {
            async move {
                let outcome = AssertUnwindSafe(async move { op(state).await })
                    .catch_unwind()
                    .await;
                let result = match outcome {
                    Ok(result) => result,
                    Err(panic) => {
                        let message = panic_message(panic.as_ref());
                        tracing::error!(error = %message, "Queued step panicked");
                        Err(SyncError::StepPanicked(message))
                    }
                };
                // The caller may have stopped waiting; the step still ran.
                let _ = reply_tx.send(result);
            }
            .boxed()
        });

        if self.tx.send(job).await.is_err() {
            tracing::warn!("Write serializer is closed; step dropped");
        }

        QueueHandle { rx: reply_rx }
    }

    /// Enqueue `op` and wait for its result.
    pub async fn run<T, F>(&self, op: F) -> Result<T, SyncError>
    where
        T: Send + 'static,
        F: for<'a> FnOnce(&'a mut S) -> BoxFuture<'a, Result<T, SyncError>> + Send + 'static,
    {
        self.enqueue(op).await.await
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Completion of one queued step.
///
/// Resolves to [`SyncError::QueueClosed`] when the step was dropped
/// without running.
pub struct QueueHandle<T> {
    rx: oneshot::Receiver<Result<T, SyncError>>,
}

impl<T> Future for QueueHandle<T> {
    type Output = Result<T, SyncError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(SyncError::QueueClosed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

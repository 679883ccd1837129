//! Lazy, single-consumer event streams for long-running operations.
//!
//! An [`EventStream`] owns the future that performs an operation together with
//! the receiving half of a channel the operation reports into through an
//! [`EventSink`]. Nothing runs until the stream is polled, it can only be
//! consumed once, and dropping it drops the operation future, which cancels
//! any in-flight I/O.
//!
//! The stream yields zero or more `Ok(Event)` items followed by exactly one
//! terminal signal: end of stream on success, or a final `Err` item on
//! failure.

use crate::event::Event;
use futures::Stream;
use futures::StreamExt;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::trace;

type Driver<E> = Pin<Box<dyn Future<Output = Result<(), E>> + Send>>;

/// Producer handle handed to an operation so it can report progress.
#[derive(Debug, Clone)]
pub struct EventSink {
    inner: mpsc::UnboundedSender<Event>,
}

impl EventSink {
    /// Create a sink together with the receiver that observes it.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (inner, receiver) = mpsc::unbounded_channel();
        (Self { inner }, receiver)
    }

    /// Create a sink whose events are dropped.
    ///
    /// Useful when an operation is driven directly as a future and the caller
    /// only cares about the result.
    #[must_use]
    pub fn discard() -> Self {
        let (sink, _receiver) = Self::channel();
        sink
    }

    /// Report an event.
    ///
    /// Events sent after the consumer went away are silently dropped: the
    /// consumer has stopped listening, and the operation is about to be
    /// cancelled with it.
    pub fn emit(&self, event: Event) {
        trace!(event_type = event.kind(), "Emitting event");
        let _ = self.inner.send(event);
    }

    /// Check whether the consumer has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

/// A lazily-evaluated sequence of [`Event`]s terminated by success or failure.
#[must_use = "event streams do nothing unless polled"]
pub struct EventStream<E> {
    driver: Option<Driver<E>>,
    receiver: mpsc::UnboundedReceiver<Event>,
    failure: Option<E>,
}

// The driver is boxed and `E` is never pinned in place.
impl<E> Unpin for EventStream<E> {}

impl<E: Send + 'static> EventStream<E> {
    /// Build a stream from an operation.
    ///
    /// `operation` is called immediately to construct its future, but the
    /// future is not polled until the stream is.
    pub fn new<F, Fut>(operation: F) -> Self
    where
        F: FnOnce(EventSink) -> Fut,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
    {
        let (sink, receiver) = EventSink::channel();
        Self {
            driver: Some(Box::pin(operation(sink))),
            receiver,
            failure: None,
        }
    }

    /// A stream that completes successfully without any events.
    pub fn empty() -> Self {
        Self::new(|_| async { Ok(()) })
    }

    /// A stream that fails immediately without any events.
    pub fn failed(error: E) -> Self {
        Self::new(move |_| async move { Err(error) })
    }
}

impl<E> EventStream<E> {
    /// Drive the stream to completion, returning every event in order.
    ///
    /// Events observed before a failure are discarded along with it.
    pub async fn collect_events(mut self) -> Result<Vec<Event>, E> {
        let mut events = Vec::new();
        while let Some(item) = self.next().await {
            events.push(item?);
        }
        Ok(events)
    }

    /// Drive the stream to completion, ignoring progress.
    pub async fn wait(mut self) -> Result<(), E> {
        while let Some(item) = self.next().await {
            item?;
        }
        Ok(())
    }

    /// Returns `true` once the underlying operation has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.driver.is_none()
    }
}

impl<E> Stream for EventStream<E> {
    type Item = Result<Event, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if let Ok(event) = this.receiver.try_recv() {
            return Poll::Ready(Some(Ok(event)));
        }

        if let Some(driver) = this.driver.as_mut() {
            match driver.as_mut().poll(cx) {
                Poll::Ready(result) => {
                    this.driver = None;
                    if let Err(error) = result {
                        this.failure = Some(error);
                    }
                }
                Poll::Pending => {
                    // The operation may have reported progress before suspending.
                    return match this.receiver.try_recv() {
                        Ok(event) => Poll::Ready(Some(Ok(event))),
                        Err(_) => Poll::Pending,
                    };
                }
            }
        }

        // Operation finished: flush what it reported, then the terminal signal.
        if let Ok(event) = this.receiver.try_recv() {
            return Poll::Ready(Some(Ok(event)));
        }
        Poll::Ready(this.failure.take().map(Err))
    }
}

impl<E> fmt::Debug for EventStream<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("finished", &self.driver.is_none())
            .field("failed", &self.failure.is_some())
            .finish_non_exhaustive()
    }
}

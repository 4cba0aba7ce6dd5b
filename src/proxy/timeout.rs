//! Fixed timeouts for proxied exchanges.
//!
//! One blanket set applies to every route; none are configurable. The
//! `inbound` bound covers the client side of every connection: reading the
//! request head, reading the request body, and any stretch with no bytes
//! moving in either direction.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Bytes;
use axum::BoxError;
use futures_core::Stream;
use thiserror::Error;
use tokio::time::Sleep;

/// Timeout configuration for proxy requests
#[derive(Debug, Clone, Copy)]
pub struct TimeoutConfig {
    /// Time to establish the upstream TCP connection
    pub connect: Duration,
    /// Whole upstream exchange, including streaming the response body
    pub request: Duration,
    /// Client-side read, write and idle bound for every inbound connection
    pub inbound: Duration,
}

impl TimeoutConfig {
    /// Create a new timeout configuration with explicit values
    pub fn new(connect_secs: u64, request_secs: u64, inbound_secs: u64) -> Self {
        Self {
            connect: Duration::from_secs(connect_secs),
            request: Duration::from_secs(request_secs),
            inbound: Duration::from_secs(inbound_secs),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(30),
            request: Duration::from_secs(120),
            inbound: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Error)]
#[error("request body not received within {0}s")]
pub struct BodyReadTimeout(pub u64);

/// Shared flag telling a handler that its request body hit the deadline.
///
/// Lets the passthrough route tell a stalled client apart from an upstream
/// failure once the body error has travelled through the transport.
#[derive(Debug, Clone, Default)]
pub struct BodyDeadline {
    expired: Arc<AtomicBool>,
}

impl BodyDeadline {
    pub fn expired(&self) -> bool {
        self.expired.load(Ordering::SeqCst)
    }

    fn expire(&self) {
        self.expired.store(true, Ordering::SeqCst);
    }
}

/// Request body stream that fails once `limit` has passed without reaching
/// the end.
pub struct DeadlineBody<S> {
    inner: S,
    sleep: Pin<Box<Sleep>>,
    limit: Duration,
    deadline: BodyDeadline,
    done: bool,
}

impl<S> DeadlineBody<S> {
    pub fn new(inner: S, limit: Duration, deadline: BodyDeadline) -> Self {
        Self {
            inner,
            sleep: Box::pin(tokio::time::sleep(limit)),
            limit,
            deadline,
            done: false,
        }
    }
}

impl<S, E> Stream for DeadlineBody<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Into<BoxError>,
{
    type Item = Result<Bytes, BoxError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        if this.sleep.as_mut().poll(cx).is_ready() {
            this.done = true;
            this.deadline.expire();
            return Poll::Ready(Some(Err(BodyReadTimeout(this.limit.as_secs()).into())));
        }

        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => Poll::Ready(Some(Ok(chunk))),
            Poll::Ready(Some(Err(e))) => {
                this.done = true;
                Poll::Ready(Some(Err(e.into())))
            }
            Poll::Ready(None) => {
                this.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

//! Incremental relay of upstream bodies to the client.
//!
//! Each non-empty upstream chunk becomes one body frame, which hyper writes
//! and flushes before polling for the next. When the client goes away hyper
//! drops the body, which drops the upstream stream with it.

use std::fmt::Display;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::Bytes;
use futures_core::Stream;

pub struct RelayStream<S> {
    inner: S,
    request_id: String,
    chunks: usize,
    bytes: usize,
    finished: bool,
}

impl<S> RelayStream<S> {
    pub fn new(inner: S, request_id: impl Into<String>) -> Self {
        Self {
            inner,
            request_id: request_id.into(),
            chunks: 0,
            bytes: 0,
            finished: false,
        }
    }
}

impl<S, E> Stream for RelayStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
{
    type Item = Result<Bytes, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }

        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) if chunk.is_empty() => continue,
                Poll::Ready(Some(Ok(chunk))) => {
                    self.chunks += 1;
                    self.bytes += chunk.len();
                    return Poll::Ready(Some(Ok(chunk)));
                }
                // The status line is already out; end the body where the upstream broke off.
                Poll::Ready(Some(Err(err))) => {
                    tracing::warn!(
                        request_id = %self.request_id,
                        chunks = self.chunks,
                        error = %err,
                        "Upstream body failed mid-relay"
                    );
                    self.finished = true;
                    return Poll::Ready(None);
                }
                Poll::Ready(None) => {
                    self.finished = true;
                    tracing::debug!(
                        request_id = %self.request_id,
                        chunks = self.chunks,
                        bytes = self.bytes,
                        "Relay complete"
                    );
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl<S> Drop for RelayStream<S> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!(
                request_id = %self.request_id,
                chunks = self.chunks,
                bytes = self.bytes,
                "Client disconnected mid-stream"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream::{self, StreamExt};

    #[tokio::test]
    async fn test_empty_chunks_are_skipped() {
        let upstream = stream::iter(vec![
            Ok::<_, std::io::Error>(Bytes::from("a")),
            Ok(Bytes::new()),
            Ok(Bytes::from("b")),
        ]);
        let chunks: Vec<_> = RelayStream::new(upstream, "req-1").collect().await;
        let chunks: Vec<Bytes> = chunks.into_iter().map(Result::unwrap).collect();
        assert_eq!(chunks, vec![Bytes::from("a"), Bytes::from("b")]);
    }

    #[tokio::test]
    async fn test_upstream_error_ends_relay() {
        let upstream = stream::iter(vec![
            Ok(Bytes::from("data: 1\n\n")),
            Err(std::io::Error::other("reset by peer")),
            Ok(Bytes::from("data: never\n\n")),
        ]);
        let mut relay = RelayStream::new(upstream, "req-2");
        assert_eq!(relay.next().await.unwrap().unwrap(), Bytes::from("data: 1\n\n"));
        assert!(relay.next().await.is_none());
        assert!(relay.next().await.is_none());
    }
}

//! Per-connection plumbing for the accept loop.
//!
//! Every accepted socket is wrapped in [`ActivityIo`] so the connection task
//! can see when bytes last moved. [`drive_connection`] closes a connection
//! that has been silent in both directions for the inbound bound: an idle
//! keep-alive, a client that stopped sending mid-request, or one that stopped
//! reading a streamed response. A [`ConnectionToken`] keeps the live count in
//! [`ShutdownManager`] accurate for as long as the task runs.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::proxy::shutdown::ShutdownManager;

/// When the socket last made progress.
#[derive(Debug)]
pub struct Activity {
    origin: Instant,
    last_ms: AtomicU64,
}

impl Activity {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        let elapsed = self.origin.elapsed().as_millis() as u64;
        self.last_ms.store(elapsed, Ordering::Relaxed);
    }

    pub fn last_seen(&self) -> Instant {
        self.origin + Duration::from_millis(self.last_ms.load(Ordering::Relaxed))
    }

    pub fn idle_for(&self) -> Duration {
        self.last_seen().elapsed()
    }
}

impl Default for Activity {
    fn default() -> Self {
        Self::new()
    }
}

/// IO wrapper that records every read or write that moved bytes.
pub struct ActivityIo<T> {
    inner: T,
    activity: Arc<Activity>,
}

impl<T> ActivityIo<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            activity: Arc::new(Activity::new()),
        }
    }

    pub fn activity(&self) -> Arc<Activity> {
        self.activity.clone()
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for ActivityIo<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let result = Pin::new(&mut this.inner).poll_read(cx, buf);
        if matches!(result, Poll::Ready(Ok(()))) && buf.filled().len() > before {
            this.activity.touch();
        }
        result
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for ActivityIo<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let result = Pin::new(&mut this.inner).poll_write(cx, buf);
        if matches!(result, Poll::Ready(Ok(n)) if n > 0) {
            this.activity.touch();
        }
        result
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let result = Pin::new(&mut this.inner).poll_write_vectored(cx, bufs);
        if matches!(result, Poll::Ready(Ok(n)) if n > 0) {
            this.activity.touch();
        }
        result
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// Counts one live connection until dropped.
pub struct ConnectionToken {
    shutdown: Arc<ShutdownManager>,
}

impl ConnectionToken {
    pub fn acquire(shutdown: Arc<ShutdownManager>) -> Self {
        shutdown.increment_connections();
        Self { shutdown }
    }
}

impl Drop for ConnectionToken {
    fn drop(&mut self) {
        self.shutdown.decrement_connections();
    }
}

/// A served connection that can be asked to finish its current request and
/// close.
pub trait GracefulConnection: Future {
    fn begin_shutdown(self: Pin<&mut Self>);
}

/// How a connection task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEnd {
    Closed,
    Idle,
}

/// Run `conn` to completion, closing it after `idle` without socket progress
/// and asking it to wind down once shutdown is signalled.
pub async fn drive_connection<C, E>(
    conn: C,
    activity: Arc<Activity>,
    idle: Duration,
    shutdown: Arc<ShutdownManager>,
) -> ConnectionEnd
where
    C: GracefulConnection<Output = Result<(), E>>,
    E: std::fmt::Display,
{
    let _token = ConnectionToken::acquire(shutdown.clone());
    tokio::pin!(conn);
    let mut draining = false;

    loop {
        let idle_deadline = tokio::time::Instant::from_std(activity.last_seen() + idle);
        tokio::select! {
            result = conn.as_mut() => {
                if let Err(e) = result {
                    tracing::debug!(error = %e, "Connection ended with error");
                }
                return ConnectionEnd::Closed;
            }
            _ = shutdown.wait_for_shutdown(), if !draining => {
                conn.as_mut().begin_shutdown();
                draining = true;
            }
            _ = tokio::time::sleep_until(idle_deadline) => {
                if activity.idle_for() >= idle {
                    tracing::debug!(idle_secs = idle.as_secs(), "Closing inactive connection");
                    return ConnectionEnd::Idle;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Never finishes on its own; completes once asked to shut down.
    struct Parked {
        stop: Arc<AtomicBool>,
    }

    impl Future for Parked {
        type Output = Result<(), io::Error>;

        fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
            if self.stop.load(Ordering::SeqCst) {
                Poll::Ready(Ok(()))
            } else {
                Poll::Pending
            }
        }
    }

    impl GracefulConnection for Parked {
        fn begin_shutdown(self: Pin<&mut Self>) {
            self.stop.store(true, Ordering::SeqCst);
        }
    }

    fn parked() -> Parked {
        Parked {
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    #[tokio::test]
    async fn test_io_progress_moves_last_seen() {
        let (client, server) = tokio::io::duplex(64);
        let mut server = ActivityIo::new(server);
        let activity = server.activity();
        let start = activity.last_seen();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let mut client = client;
        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();

        assert!(activity.last_seen() > start);
        assert!(activity.idle_for() < Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_silent_connection_is_closed_after_idle_bound() {
        let shutdown = Arc::new(ShutdownManager::new());
        let activity = Arc::new(Activity::new());

        let end = tokio::time::timeout(
            Duration::from_secs(2),
            drive_connection(parked(), activity, Duration::from_millis(100), shutdown.clone()),
        )
        .await
        .expect("idle connection should be closed");

        assert_eq!(end, ConnectionEnd::Idle);
        assert_eq!(shutdown.active_connections(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_asks_connection_to_finish() {
        let shutdown = Arc::new(ShutdownManager::new());
        let task = tokio::spawn(drive_connection(
            parked(),
            Arc::new(Activity::new()),
            Duration::from_secs(60),
            shutdown.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(shutdown.active_connections(), 1);
        shutdown.signal_shutdown();

        let end = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("connection should finish")
            .unwrap();
        assert_eq!(end, ConnectionEnd::Closed);
        assert_eq!(shutdown.active_connections(), 0);
    }
}

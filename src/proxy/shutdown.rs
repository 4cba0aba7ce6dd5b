use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::signal;
use tokio::sync::watch;

/// How long in-flight connections may run after a shutdown signal.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Shutdown flag plus a count of live connections.
pub struct ShutdownManager {
    shutdown: watch::Sender<bool>,
    active_connections: AtomicUsize,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shutdown,
            active_connections: AtomicUsize::new(0),
        }
    }

    /// Block until SIGINT or SIGTERM, then flag shutdown.
    pub async fn listen_for_signals(&self) -> io::Result<()> {
        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
            tokio::select! {
                result = signal::ctrl_c() => result?,
                _ = sigterm.recv() => {},
            }
        }

        #[cfg(not(unix))]
        {
            signal::ctrl_c().await?;
        }

        tracing::info!("Shutdown signal received");
        self.signal_shutdown();
        Ok(())
    }

    pub fn signal_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Resolves once shutdown has been flagged, immediately if it already was.
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.shutdown.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|down| *down).await;
    }

    pub fn increment_connections(&self) {
        self.active_connections.fetch_add(1, Ordering::SeqCst);
    }

    pub fn decrement_connections(&self) {
        self.active_connections.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::SeqCst)
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

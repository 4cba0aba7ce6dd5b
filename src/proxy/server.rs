use std::error::Error as StdError;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use axum::http::header::InvalidHeaderValue;
use axum::Router;
use hyper::body::{Body as HttpBody, Incoming};
use hyper::rt::{Read, Write};
use hyper::server::conn::http1;
use hyper::service::{service_fn, HttpService};
use hyper::Request;
use hyper_util::rt::{TokioIo, TokioTimer};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tower::ServiceExt;

use crate::config::Settings;
use crate::proxy::connection::{drive_connection, ActivityIo, GracefulConnection};
use crate::proxy::pool::PoolConfig;
use crate::proxy::router::{build_router, RouterEngine};
use crate::proxy::shutdown::{ShutdownManager, SHUTDOWN_GRACE};
use crate::proxy::timeout::TimeoutConfig;
use crate::proxy::upstream::{HttpUpstream, UpstreamClient, UpstreamError};

/// Pause after a failed accept, e.g. when out of file descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[source] io::Error),

    #[error("failed to build upstream client: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("invalid upstream credential: {0}")]
    Credential(#[from] InvalidHeaderValue),
}

pub struct ProxyServer {
    pub addr: SocketAddr,
    router: RouterEngine,
    inbound_timeout: Duration,
    shutdown: Arc<ShutdownManager>,
}

impl ProxyServer {
    pub fn new(settings: &Settings) -> Result<Self, ServerError> {
        let timeouts = TimeoutConfig::default();
        let upstream = HttpUpstream::new(timeouts, PoolConfig::default())?;
        Self::with_upstream(settings, Arc::new(upstream), timeouts)
    }

    /// Build around a caller-supplied upstream client.
    pub fn with_upstream(
        settings: &Settings,
        upstream: Arc<dyn UpstreamClient>,
        timeouts: TimeoutConfig,
    ) -> Result<Self, ServerError> {
        let router = RouterEngine::new(settings, upstream, timeouts)?;
        Ok(Self {
            addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, settings.port)),
            router,
            inbound_timeout: timeouts.inbound,
            shutdown: Arc::new(ShutdownManager::new()),
        })
    }

    pub fn shutdown_handle(&self) -> Arc<ShutdownManager> {
        self.shutdown.clone()
    }

    pub fn handle(&self) -> ProxyHandle {
        ProxyHandle {
            shutdown: self.shutdown.clone(),
        }
    }

    pub async fn run(&self) -> Result<(), ServerError> {
        tracing::info!("Starting proxy server on {}", self.addr);
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: self.addr,
                source,
            })?;
        self.serve(listener).await
    }

    /// Serve on an already-bound listener until shutdown is signalled.
    ///
    /// Each connection gets the inbound timeout as its header read bound and
    /// its inactivity bound. After the signal the listener closes and
    /// in-flight connections get [`SHUTDOWN_GRACE`] to finish; whatever
    /// remains is aborted.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let local = listener.local_addr().map_err(ServerError::Serve)?;
        tracing::info!("Proxy server listening on {}", local);

        let app = build_router(self.router.clone());
        let mut http = http1::Builder::new();
        http.timer(TokioTimer::new())
            .header_read_timeout(self.inbound_timeout);

        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracing::trace!(peer = %peer, "Accepted connection");
                        connections.spawn(self.serve_connection(stream, &http, app.clone()));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                _ = self.shutdown.wait_for_shutdown() => break,
            }
        }
        drop(listener);

        tracing::info!(
            active_connections = self.shutdown.active_connections(),
            "Draining connections"
        );
        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                active_connections = self.shutdown.active_connections(),
                "Grace period elapsed, abandoning open connections"
            );
            connections.shutdown().await;
        }

        tracing::info!("Shutting down gracefully");
        Ok(())
    }

    fn serve_connection(
        &self,
        stream: TcpStream,
        http: &http1::Builder,
        app: Router,
    ) -> impl std::future::Future<Output = ()> + Send + 'static {
        let io = ActivityIo::new(stream);
        let activity = io.activity();
        let service = service_fn(move |req: Request<Incoming>| {
            let app = app.clone();
            async move { app.oneshot(req).await }
        });
        let conn = http.serve_connection(TokioIo::new(io), service);
        let idle = self.inbound_timeout;
        let shutdown = self.shutdown.clone();

        async move {
            drive_connection(conn, activity, idle, shutdown).await;
        }
    }
}

impl<I, S, B> GracefulConnection for http1::Connection<I, S>
where
    S: HttpService<Incoming, ResBody = B>,
    S::Error: Into<Box<dyn StdError + Send + Sync>>,
    I: Read + Write + Unpin,
    B: HttpBody + 'static,
    B::Error: Into<Box<dyn StdError + Send + Sync>>,
{
    fn begin_shutdown(self: Pin<&mut Self>) {
        self.graceful_shutdown();
    }
}

#[derive(Clone)]
pub struct ProxyHandle {
    shutdown: Arc<ShutdownManager>,
}

impl ProxyHandle {
    pub fn shutdown(&self) {
        self.shutdown.signal_shutdown();
    }
}

//! HTTP server implementation.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};

use super::service::router;
use crate::error::Result;
use crate::ratelimit::Registry;

/// HTTP server exposing a registry as a rate limit authority.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The registry being served
    registry: Arc<Registry>,
}

impl HttpServer {
    /// Create a new HTTP server for `registry`.
    pub fn new(addr: SocketAddr, registry: Arc<Registry>) -> Self {
        Self { addr, registry }
    }

    /// Bind and serve until `signal` resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            e
        })?;

        Self::serve_listener(listener, self.registry, signal).await
    }

    /// Serve on an already bound listener until `signal` resolves.
    pub async fn serve_listener<F>(listener: TcpListener, registry: Arc<Registry>, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "Starting HTTP server for rate limit authority");

        axum::serve(listener, router(registry))
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                e
            })?;

        info!(addr = %local_addr, "HTTP server stopped");
        Ok(())
    }
}

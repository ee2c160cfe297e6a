//! HTTP Server
//!
//! Binds the listener up front, so a port conflict fails startup, then
//! serves the router until the shutdown token fires.

use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// HTTP server errors.
#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    /// Failed to bind to the address.
    #[error("failed to bind to {0}: {1}")]
    BindFailed(SocketAddr, String),

    /// Bound address could not be read back.
    #[error("failed to read local address: {0}")]
    LocalAddr(String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

/// Bound HTTP server.
pub struct HttpServer {
    listener: TcpListener,
    router: Router,
    cancel: CancellationToken,
}

impl HttpServer {
    /// Bind `addr`.
    ///
    /// # Errors
    ///
    /// Returns `HttpServerError::BindFailed` if the address is unavailable.
    pub async fn bind(
        addr: SocketAddr,
        router: Router,
        cancel: CancellationToken,
    ) -> Result<Self, HttpServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HttpServerError::BindFailed(addr, e.to_string()))?;
        Ok(Self {
            listener,
            router,
            cancel,
        })
    }

    /// Address the listener is bound to.
    ///
    /// # Errors
    ///
    /// Returns `HttpServerError::LocalAddr` if the OS cannot report it.
    pub fn local_addr(&self) -> Result<SocketAddr, HttpServerError> {
        self.listener
            .local_addr()
            .map_err(|e| HttpServerError::LocalAddr(e.to_string()))
    }

    /// Serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HttpServerError::ServerFailed` if the server hits a fatal
    /// error while running.
    pub async fn run(self) -> Result<(), HttpServerError> {
        tracing::info!(addr = ?self.listener.local_addr().ok(), "HTTP server listening");

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HttpServerError::ServerFailed(e.to_string()))?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

// ────────────────────────────────
// src/server/builder.rs
// ────────────────────────────────
use crate::server::handler::RequestHandler;
use crate::server::listener::bind_tcp;
use crate::signal::shutdown_requested;
use anyhow::{Context, Result};
use hyper::server::conn::{AddrIncoming, AddrStream};
use hyper::service::make_service_fn;
use hyper::Server;
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Builder pattern so `main.rs` can inject its handler and shutdown signal.
pub struct ServerBuilder {
    addr: SocketAddr,
    handler: Option<RequestHandler>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl ServerBuilder {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            handler: None,
            shutdown: None,
        }
    }

    pub fn with_handler(mut self, handler: RequestHandler) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Stop accepting once this flag turns true; in-flight requests finish first.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Consume the builder, bind the configured address and serve until shutdown.
    pub async fn serve(self) -> Result<()> {
        let listener = bind_tcp(self.addr).await?;
        self.serve_listener(listener).await
    }

    /// Serve on an already bound listener (lets callers bind port 0).
    pub async fn serve_listener(self, listener: TcpListener) -> Result<()> {
        let handler = self
            .handler
            .context("handler must be set via with_handler()")?;
        let local_addr = listener.local_addr()?;
        let incoming = AddrIncoming::from_listener(listener)?;

        // One handler per connection, carrying the peer address.
        let make_service = make_service_fn(move |conn: &AddrStream| {
            let svc = handler.for_client(conn.remote_addr());
            async move { Ok::<_, Infallible>(svc) }
        });

        let server = Server::builder(incoming).serve(make_service);
        tracing::info!("HTTP server listening on {}", local_addr);

        match self.shutdown {
            Some(shutdown) => {
                server
                    .with_graceful_shutdown(shutdown_requested(shutdown))
                    .await?;
                tracing::info!("HTTP server on {} drained", local_addr);
            }
            None => server.await?,
        }

        Ok(())
    }
}

// ────────────────────────────────
// src/proxy/proxy.rs
// Selection, connection accounting and response tagging for one request
// ────────────────────────────────

use super::backend::{Backend, ConnectionGuard};
use super::forwarder::{ForwardError, Forwarder};
use super::pool::BackendPool;
use crate::load_balancer::LoadBalancer;
use crate::metrics::MetricsCollector;
use futures::StreamExt;
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use hyper::{Body, Request, Response, StatusCode};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Response header naming the backend that served the request.
pub const LB_FROM_HEADER: &str = "lb-from";

pub struct Proxy {
    pool: Arc<BackendPool>,
    balancer: Arc<dyn LoadBalancer>,
    forwarder: Arc<dyn Forwarder>,
    trace: bool,
    metrics: Option<Arc<MetricsCollector>>,
}

impl Proxy {
    pub fn new(
        pool: Arc<BackendPool>,
        balancer: Arc<dyn LoadBalancer>,
        forwarder: Arc<dyn Forwarder>,
        trace: bool,
    ) -> Self {
        Self {
            pool,
            balancer,
            forwarder,
            trace,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn pool(&self) -> &Arc<BackendPool> {
        &self.pool
    }

    pub fn select(&self, client_addr: Option<SocketAddr>) -> Result<Arc<Backend>, ProxyError> {
        self.balancer
            .select_backend(self.pool.all_backends(), client_addr)
            .ok_or(ProxyError::NoHealthyBackends)
    }

    /// Runs one request to completion. Every outcome is an HTTP response:
    /// 503 when nothing is healthy, 502 when the chosen backend fails.
    pub async fn handle(&self, req: Request<Body>, client_addr: Option<SocketAddr>) -> Response<Body> {
        let backend = match self.select(client_addr) {
            Ok(backend) => backend,
            Err(err) => {
                warn!(method = %req.method(), path = %req.uri().path(), "{}", err);
                if let Some(metrics) = &self.metrics {
                    metrics.record_rejected();
                }
                return err.into();
            }
        };

        let start = Instant::now();
        let guard = backend.acquire();
        debug!(
            backend = %backend.address,
            active = backend.active_connections(),
            balancer = self.balancer.name(),
            "forwarding request"
        );

        let mut response = match self.forwarder.forward(&backend, req, client_addr).await {
            Ok(response) => hold_until_complete(response, guard),
            Err(source) => {
                drop(guard);
                backend.record_failure();
                let err = ProxyError::Upstream {
                    backend: backend.address.clone(),
                    source,
                };
                warn!(%err, "forwarding failed");
                err.into()
            }
        };

        if self.trace {
            tag_response(&mut response, &backend);
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_request(response.status().as_u16(), &backend.address, start.elapsed());
        }

        response
    }
}

/// Keeps the connection counted until the response body has been streamed
/// to the client or dropped.
fn hold_until_complete(response: Response<Body>, guard: ConnectionGuard) -> Response<Body> {
    let (parts, body) = response.into_parts();
    let body = body.map(move |chunk| {
        let _held: &ConnectionGuard = &guard;
        chunk
    });
    Response::from_parts(parts, Body::wrap_stream(body))
}

fn tag_response(response: &mut Response<Body>, backend: &Backend) {
    match HeaderValue::from_str(&backend.address) {
        Ok(value) => {
            response
                .headers_mut()
                .insert(HeaderName::from_static(LB_FROM_HEADER), value);
        }
        Err(e) => warn!(backend = %backend.address, %e, "cannot tag response"),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("No healthy backends available")]
    NoHealthyBackends,

    #[error("Backend {backend} failed: {source}")]
    Upstream {
        backend: String,
        #[source]
        source: ForwardError,
    },
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::NoHealthyBackends => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::Upstream { .. } => StatusCode::BAD_GATEWAY,
        }
    }
}

// Convert ProxyError to Hyper Response for error handling
impl From<ProxyError> for Response<Body> {
    fn from(err: ProxyError) -> Self {
        let message = match err {
            ProxyError::NoHealthyBackends => "no healthy backends",
            ProxyError::Upstream { .. } => "bad gateway",
        };

        let mut response = Response::new(Body::from(message));
        *response.status_mut() = err.status();
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
        response
    }
}

//! Shared utilities for integration testing.

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use least_conn_balancer::config::BackendScheme;
use least_conn_balancer::load_balancer::LeastConnectionsBalancer;
use least_conn_balancer::proxy::{BackendPool, HyperForwarder, Proxy};
use least_conn_balancer::server::{bind_tcp, RequestHandler, ServerBuilder};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

/// In-process upstream: `/health` answers 200 or 503 depending on a flag,
/// every other path sleeps `delay` and echoes the backend address.
pub struct TestBackend {
    pub addr: SocketAddr,
    healthy: Arc<AtomicBool>,
    hits: Arc<AtomicUsize>,
    _stop: oneshot::Sender<()>,
}

impl TestBackend {
    pub async fn start(delay: Duration) -> Self {
        let healthy = Arc::new(AtomicBool::new(true));
        let hits = Arc::new(AtomicUsize::new(0));
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let make_svc = {
            let healthy = healthy.clone();
            let hits = hits.clone();
            make_service_fn(move |_| {
                let healthy = healthy.clone();
                let hits = hits.clone();
                async move {
                    Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                        let healthy = healthy.clone();
                        let hits = hits.clone();
                        async move { Ok::<_, Infallible>(respond(req, &healthy, &hits, delay).await) }
                    }))
                }
            })
        };

        let server = Server::bind(&SocketAddr::from(([127, 0, 0, 1], 0))).serve(make_svc);
        let addr = server.local_addr();
        tokio::spawn(server.with_graceful_shutdown(async {
            let _ = stop_rx.await;
        }));

        Self {
            addr,
            healthy,
            hits,
            _stop: stop_tx,
        }
    }

    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Requests served, excluding health probes.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn respond(
    req: Request<Body>,
    healthy: &AtomicBool,
    hits: &AtomicUsize,
    delay: Duration,
) -> Response<Body> {
    if req.uri().path() == "/health" {
        let mut response = Response::new(Body::from("health"));
        if !healthy.load(Ordering::SeqCst) {
            *response.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
        }
        return response;
    }

    hits.fetch_add(1, Ordering::SeqCst);
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    Response::new(Body::from(format!("{} {}", req.method(), req.uri().path())))
}

/// A running balancer bound to an ephemeral port.
pub struct TestBalancer {
    pub addr: SocketAddr,
    pub pool: Arc<BackendPool>,
    pub shutdown: watch::Sender<bool>,
    pub server: JoinHandle<anyhow::Result<()>>,
}

impl TestBalancer {
    pub async fn start(addresses: &[String], trace: bool) -> Self {
        let pool = Arc::new(BackendPool::new(BackendScheme::Http, addresses).unwrap());
        let forwarder = Arc::new(HyperForwarder::new(BackendScheme::Http, Duration::from_secs(1)));
        let proxy = Arc::new(Proxy::new(
            pool.clone(),
            Arc::new(LeastConnectionsBalancer::new()),
            forwarder,
            trace,
        ));

        let listener = bind_tcp(SocketAddr::from(([127, 0, 0, 1], 0))).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let server = tokio::spawn(
            ServerBuilder::new(addr)
                .with_handler(RequestHandler::new(proxy))
                .with_shutdown(shutdown_rx)
                .serve_listener(listener),
        );

        Self {
            addr,
            pool,
            shutdown,
            server,
        }
    }

    pub fn url(&self, path: &str) -> hyper::Uri {
        format!("http://{}{}", self.addr, path).parse().unwrap()
    }

    pub fn total_active(&self) -> usize {
        self.pool
            .all_backends()
            .iter()
            .map(|b| b.active_connections())
            .sum()
    }
}

/// Polls `condition` until it holds or `timeout` elapses.
pub async fn eventually<F: Fn() -> bool>(timeout: Duration, condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// An address nothing listens on.
pub async fn closed_port_address() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr.to_string()
}

// src/main.rs
use anyhow::{Context, Result};
use clap::Parser;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Body, Request, Response, Server, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

use least_conn_balancer::{
    cli::Cli,
    config,
    health::{HealthChecker, ProbeSettings},
    load_balancer::LeastConnectionsBalancer,
    metrics::MetricsRegistry,
    proxy::{BackendPool, HyperForwarder, Proxy},
    server::{RequestHandler, ServerBuilder},
    signal::{shutdown_requested, wait_for_termination},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("least_conn_balancer=info,hyper=info")
            }),
        )
        .init();

    let cli = Cli::parse();
    if let Some(path) = &cli.config {
        info!("Loading configuration from: {}", path.display());
    }
    let config = config::resolve(&cli).await?;

    // Initialize metrics
    let metrics_registry = Arc::new(MetricsRegistry::new()?);
    let metrics = metrics_registry.collector();

    let pool = Arc::new(
        BackendPool::new(config.scheme, config.backends.as_slice()).context("Failed to build backend pool")?,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // One health monitor per backend
    let checker = Arc::new(HealthChecker::new(
        ProbeSettings::from_config(&config),
        pool.clone(),
        Some(metrics.clone()),
    )?);
    let monitors = checker.spawn(shutdown_rx.clone());

    let forwarder = Arc::new(HyperForwarder::new(config.scheme, config.timeout()));
    let proxy = Arc::new(
        Proxy::new(
            pool.clone(),
            Arc::new(LeastConnectionsBalancer::new()),
            forwarder,
            config.trace,
        )
        .with_metrics(metrics),
    );

    if config.metrics.enabled {
        let metrics_addr: SocketAddr = ([0, 0, 0, 0], config.metrics.port).into();
        start_metrics_server(
            metrics_addr,
            metrics_registry,
            pool.clone(),
            config.metrics.path.clone(),
            shutdown_rx.clone(),
        )?;
    }

    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    info!(
        "Starting LB on :{} (trace={}, scheme={}, backends={:?})",
        config.port, config.trace, config.scheme, config.backends
    );

    let mut server = tokio::spawn(
        ServerBuilder::new(addr)
            .with_handler(RequestHandler::new(proxy))
            .with_shutdown(shutdown_rx)
            .serve(),
    );

    tokio::select! {
        result = wait_for_termination() => result?,
        joined = &mut server => {
            // Only a bind or accept failure ends the server before shutdown.
            let _ = shutdown_tx.send(true);
            joined.context("Server task panicked")??;
            anyhow::bail!("HTTP server stopped unexpectedly");
        }
    }

    info!("Shutting down...");
    let _ = shutdown_tx.send(true);

    server.await.context("Server task panicked")??;
    for monitor in futures::future::join_all(monitors).await {
        if let Err(e) = monitor {
            error!("Health monitor task failed: {}", e);
        }
    }

    Ok(())
}

fn start_metrics_server(
    addr: SocketAddr,
    registry: Arc<MetricsRegistry>,
    pool: Arc<BackendPool>,
    path: String,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let metrics_path = Arc::new(path);
    let service_path = metrics_path.clone();

    let make_service = hyper::service::make_service_fn(move |_| {
        let registry = registry.clone();
        let pool = pool.clone();
        let path = service_path.clone();

        async move {
            Ok::<_, Infallible>(hyper::service::service_fn(move |req: Request<Body>| {
                let registry = registry.clone();
                let pool = pool.clone();
                let path = path.clone();

                async move {
                    if req.uri().path() != path.as_str() {
                        let mut response = Response::new(Body::from("Not Found"));
                        *response.status_mut() = StatusCode::NOT_FOUND;
                        return Ok::<_, Infallible>(response);
                    }

                    registry.collector().observe_backends(pool.all_backends());
                    let response = match registry.gather() {
                        Ok(metrics) => {
                            let mut response = Response::new(Body::from(metrics));
                            response.headers_mut().insert(
                                CONTENT_TYPE,
                                HeaderValue::from_static("text/plain; version=0.0.4"),
                            );
                            response
                        }
                        Err(e) => {
                            error!("Failed to encode metrics: {}", e);
                            let mut response = Response::new(Body::empty());
                            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                            response
                        }
                    };
                    Ok::<_, Infallible>(response)
                }
            }))
        }
    });

    let server = Server::try_bind(&addr)
        .with_context(|| format!("Failed to bind metrics server on {}", addr))?
        .serve(make_service)
        .with_graceful_shutdown(shutdown_requested(shutdown));

    info!(
        "Metrics server listening on http://{}{}",
        addr,
        metrics_path.as_str()
    );

    tokio::spawn(async move {
        if let Err(e) = server.await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(())
}

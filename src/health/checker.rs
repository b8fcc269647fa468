// src/health/checker.rs
use crate::config::Config;
use crate::metrics::MetricsCollector;
use crate::proxy::{Backend, BackendPool};
use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// How each backend is probed.
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub interval: Duration,
    pub timeout: Duration,
    pub path: String,
}

impl ProbeSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: config.health_check.interval(),
            timeout: config.timeout(),
            path: config.health_check.path.clone(),
        }
    }
}

pub struct HealthChecker {
    settings: ProbeSettings,
    pool: Arc<BackendPool>,
    client: Client,
    metrics: Option<Arc<MetricsCollector>>,
}

#[derive(Debug)]
pub struct HealthCheckResult {
    pub backend: String,
    pub healthy: bool,
    pub response_time_ms: u64,
    pub error: Option<String>,
}

impl HealthChecker {
    pub fn new(
        settings: ProbeSettings,
        pool: Arc<BackendPool>,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .no_proxy()
            .build()
            .context("Failed to create health check client")?;

        Ok(Self {
            settings,
            pool,
            client,
            metrics,
        })
    }

    /// Starts one monitor task per backend. Each runs until `shutdown` turns true.
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        self.pool
            .all_backends()
            .iter()
            .cloned()
            .map(|backend| {
                let checker = self.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move { checker.monitor(backend, shutdown).await })
            })
            .collect()
    }

    async fn monitor(&self, backend: Arc<Backend>, mut shutdown: watch::Receiver<bool>) {
        let period = self.settings.interval;
        // Backends start healthy, so the first probe waits a full period.
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Starting health monitor for {} with interval: {:?}",
            backend.address, period
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    self.check_backend(&backend).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Health monitor for {} shutting down", backend.address);
    }

    /// Probes once and records the outcome on the backend.
    pub async fn check_backend(&self, backend: &Backend) -> HealthCheckResult {
        let result = self.probe(backend).await;
        let was_healthy = backend.set_healthy(result.healthy);

        if let Some(metrics) = &self.metrics {
            metrics.update_backend_health(&backend.address, result.healthy);
        }

        match (was_healthy, result.healthy) {
            (false, true) => info!("Backend {} is now healthy", backend.address),
            (true, false) => warn!(
                "Backend {} is now unhealthy: {}",
                backend.address,
                result.error.as_deref().unwrap_or("unknown error")
            ),
            _ => {}
        }

        debug!(
            backend = %backend.address,
            healthy = result.healthy,
            active = backend.active_connections(),
            response_time_ms = result.response_time_ms,
            "health probe"
        );

        result
    }

    /// Healthy only when the request succeeds with exactly 200 OK.
    pub async fn probe(&self, backend: &Backend) -> HealthCheckResult {
        let start = std::time::Instant::now();

        let (healthy, error) = match backend.url.join(&self.settings.path) {
            Ok(url) => {
                let result = timeout(self.settings.timeout, self.client.get(url).send()).await;
                match result {
                    Ok(Ok(response)) if response.status() == StatusCode::OK => (true, None),
                    Ok(Ok(response)) => (false, Some(format!("HTTP {}", response.status()))),
                    Ok(Err(e)) => (false, Some(e.to_string())),
                    Err(_) => (false, Some("Request timeout".to_string())),
                }
            }
            Err(e) => (false, Some(format!("invalid health url: {}", e))),
        };

        HealthCheckResult {
            backend: backend.address.clone(),
            healthy,
            response_time_ms: start.elapsed().as_millis() as u64,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendScheme;
    use tokio::net::TcpListener;

    fn settings(interval_ms: u64) -> ProbeSettings {
        ProbeSettings {
            interval: Duration::from_millis(interval_ms),
            timeout: Duration::from_millis(300),
            path: "/health".to_string(),
        }
    }

    fn checker_for(addresses: &[String], interval_ms: u64) -> Arc<HealthChecker> {
        let pool = Arc::new(BackendPool::new(BackendScheme::Http, addresses).unwrap());
        Arc::new(HealthChecker::new(settings(interval_ms), pool, None).unwrap())
    }

    async fn closed_port_address() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        addr.to_string()
    }

    #[tokio::test]
    async fn test_probe_ok() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/health")
            .with_status(200)
            .create_async()
            .await;

        let checker = checker_for(&[server.host_with_port()], 1000);
        let backend = checker.pool.all_backends()[0].clone();
        let result = checker.probe(&backend).await;

        assert!(result.healthy);
        assert!(result.error.is_none());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_probe_requires_exactly_200() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/health")
            .with_status(204)
            .create_async()
            .await;

        let checker = checker_for(&[server.host_with_port()], 1000);
        let backend = checker.pool.all_backends()[0].clone();
        let result = checker.probe(&backend).await;

        assert!(!result.healthy);
        assert_eq!(result.error.as_deref(), Some("HTTP 204 No Content"));
    }

    #[tokio::test]
    async fn test_probe_unreachable() {
        let checker = checker_for(&[closed_port_address().await], 1000);
        let backend = checker.pool.all_backends()[0].clone();
        let result = checker.probe(&backend).await;

        assert!(!result.healthy);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn test_probe_times_out() {
        // Accepts connections but never answers.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let silent = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let checker = checker_for(&[addr], 1000);
        let backend = checker.pool.all_backends()[0].clone();
        let result = checker.probe(&backend).await;

        assert!(!result.healthy);
        assert!(result.response_time_ms < 2000);
        silent.abort();
    }

    #[tokio::test]
    async fn test_check_backend_flips_flag_both_ways() {
        let mut server = mockito::Server::new_async().await;
        let failing = server
            .mock("GET", "/health")
            .with_status(500)
            .create_async()
            .await;

        let checker = checker_for(&[server.host_with_port()], 1000);
        let backend = checker.pool.all_backends()[0].clone();

        assert!(!checker.check_backend(&backend).await.healthy);
        assert!(!backend.is_healthy());

        failing.remove_async().await;
        server
            .mock("GET", "/health")
            .with_status(200)
            .create_async()
            .await;

        assert!(checker.check_backend(&backend).await.healthy);
        assert!(backend.is_healthy());
    }

    #[tokio::test]
    async fn test_monitors_only_touch_their_backend_and_stop_on_shutdown() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/health")
            .with_status(200)
            .create_async()
            .await;

        let dead = closed_port_address().await;
        let checker = checker_for(&[server.host_with_port(), dead.clone()], 50);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = checker.clone().spawn(shutdown_rx);
        assert_eq!(handles.len(), 2);

        let down = checker.pool.get_backend(&dead).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while down.is_healthy() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert!(!down.is_healthy());
        assert!(checker.pool.all_backends()[0].is_healthy());

        shutdown_tx.send(true).unwrap();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(2), handle)
                .await
                .expect("monitor did not stop")
                .unwrap();
        }
    }
}
